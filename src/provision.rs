use aws_sdk_iot::types::CertificateStatus;
use aws_sdk_iot::Client as IotClient;
use serde_json::json;
use tracing::{info, warn};

use crate::events::CertificateRegistrationEvent;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProvisionError(pub String);

/// Activates just-in-time registered device certificates: create the
/// connected-car policy, attach it to the certificate, flip the certificate
/// to ACTIVE. The IoT control plane does the real work; this only sequences
/// the three calls.
pub struct ProvisioningService {
    client: IotClient,
}

impl ProvisioningService {
    pub fn new(client: IotClient) -> Self {
        ProvisioningService { client }
    }

    pub async fn register_certificate(
        &self,
        event: &CertificateRegistrationEvent,
        region: &str,
    ) -> Result<String, ProvisionError> {
        let certificate_id = event.certificate_id.trim();
        let account_id = event.aws_account_id.trim();
        let certificate_arn = format!(
            "arn:aws:iot:{}:{}:cert/{}",
            region, account_id, certificate_id
        );
        let policy_name = format!("Policy_{}", certificate_id);
        let policy = connected_car_policy(region, account_id);

        info!("provisioning certificate {}", certificate_id);
        match self
            .client
            .create_policy()
            .policy_name(&policy_name)
            .policy_document(policy.to_string())
            .send()
            .await
        {
            Ok(_) => {}
            Err(e) => {
                let service_error = e.into_service_error();
                // a re-registered certificate already carries its policy
                if !service_error.is_resource_already_exists_exception() {
                    return Err(ProvisionError(format!(
                        "failed to create policy {} - {}",
                        policy_name, service_error
                    )));
                }
                warn!("policy {} already exists, reusing it", policy_name);
            }
        }

        self.client
            .attach_policy()
            .policy_name(&policy_name)
            .target(&certificate_arn)
            .send()
            .await
            .map_err(|e| {
                ProvisionError(format!(
                    "failed to attach policy {} to {} - {}",
                    policy_name,
                    certificate_arn,
                    e.into_service_error()
                ))
            })?;

        self.client
            .update_certificate()
            .certificate_id(certificate_id)
            .new_status(CertificateStatus::Active)
            .send()
            .await
            .map_err(|e| {
                ProvisionError(format!(
                    "failed to activate certificate {} - {}",
                    certificate_id,
                    e.into_service_error()
                ))
            })?;

        Ok(format!(
            "Success, created, attached policy and activated the certificate {}",
            certificate_id
        ))
    }
}

/// Connect/publish/subscribe permissions on the connected-car topic families,
/// scoped by the certificate subject so a device can only use its own topics.
fn connected_car_policy(region: &str, account_id: &str) -> serde_json::Value {
    let topic = |family: &str, suffix: &str| {
        format!(
            "arn:aws:iot:{}:{}:topic/connectedcar/{}/${{iot:Certificate.Subject.Pseudonym}}{}",
            region, account_id, family, suffix
        )
    };
    let topic_filter = |family: &str, suffix: &str| {
        format!(
            "arn:aws:iot:{}:{}:topicfilter/connectedcar/{}/${{iot:Certificate.Subject.Pseudonym}}{}",
            region, account_id, family, suffix
        )
    };

    json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Effect": "Allow",
                "Action": ["iot:Connect"],
                "Resource": format!(
                    "arn:aws:iot:{}:{}:client/${{iot:Certificate.Subject.CommonName}}",
                    region, account_id
                )
            },
            {
                "Effect": "Allow",
                "Action": ["iot:Publish", "iot:Receive"],
                "Resource": [
                    topic("telemetry", ""),
                    topic("trip", ""),
                    topic("dtc", ""),
                    topic("alert", "/*")
                ]
            },
            {
                "Effect": "Allow",
                "Action": ["iot:Subscribe"],
                "Resource": [
                    topic_filter("telemetry", ""),
                    topic_filter("dtc", ""),
                    topic_filter("alert", "/*")
                ]
            }
        ]
    })
}
