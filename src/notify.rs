use async_trait::async_trait;
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client as SnsClient;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct DispatchError(pub String);

/// Dual-channel owner notification: a human-readable mobile text plus a
/// machine-readable payload for the in-vehicle display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub mobile: String,
    pub payload: serde_json::Value,
}

impl NotificationMessage {
    pub fn new(kind: &str, mobile: String, payload: serde_json::Value) -> Self {
        NotificationMessage {
            kind: kind.to_string(),
            mobile,
            payload,
        }
    }
}

/// The notification transport collaborator. Delivery is fire-and-forget from
/// the caller's perspective; no confirmation is surfaced beyond the publish
/// result.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, vin: &str, message: &NotificationMessage) -> Result<(), DispatchError>;
}

/// SNS-backed dispatcher. Publishes the JSON envelope to the configured topic
/// with the vin and message kind as attributes, so subscribers can filter.
pub struct SnsDispatcher {
    client: SnsClient,
    topic_arn: String,
}

impl SnsDispatcher {
    pub fn new(client: SnsClient, topic_arn: String) -> Self {
        SnsDispatcher { client, topic_arn }
    }
}

#[async_trait]
impl NotificationDispatcher for SnsDispatcher {
    async fn notify(&self, vin: &str, message: &NotificationMessage) -> Result<(), DispatchError> {
        let envelope = serde_json::json!({
            "vin": vin,
            "message": message,
        });

        let vin_attr = MessageAttributeValue::builder()
            .set_data_type(Some("String".to_string()))
            .set_string_value(Some(vin.to_string()))
            .build()
            .map_err(|e| DispatchError(e.to_string()))?;
        let kind_attr = MessageAttributeValue::builder()
            .set_data_type(Some("String".to_string()))
            .set_string_value(Some(message.kind.clone()))
            .build()
            .map_err(|e| DispatchError(e.to_string()))?;

        debug!("publishing {} notification for vin {}", message.kind, vin);
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(envelope.to_string())
            .message_attributes("vin", vin_attr)
            .message_attributes("type", kind_attr)
            .send()
            .await
            .map_err(|e| DispatchError(e.into_service_error().to_string()))?;

        Ok(())
    }
}
