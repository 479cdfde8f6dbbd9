use aws_lambda_events::event::apigw::ApiGatewayProxyRequest;
use aws_lambda_events::event::kinesis::KinesisEvent;
use serde::de::{self, Deserialize, Deserializer};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// Lifecycle event published when a device certificate is just-in-time
/// registered against the fleet CA.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRegistrationEvent {
    pub certificate_id: String,
    pub ca_certificate_id: String,
    pub timestamp: i64,
    pub certificate_status: String,
    pub aws_account_id: String,
}

/// The event sources this function can be invoked from.
#[derive(Debug)]
pub enum Combined {
    ApiGateway(Box<ApiGatewayProxyRequest>),
    Kinesis(KinesisEvent),
    CertificateRegistration(CertificateRegistrationEvent),
}

impl<'de> Deserialize<'de> for Combined {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw_value: Value = Deserialize::deserialize(deserializer)?;

        // The registration event is probed first: its field set is small and
        // specific, while the API gateway request is almost entirely optional
        // fields and would happily absorb arbitrary JSON.
        if raw_value.get("certificateId").is_some() && raw_value.get("awsAccountId").is_some() {
            debug!("certificate registration event detected");
            return CertificateRegistrationEvent::deserialize(&raw_value)
                .map(Combined::CertificateRegistration)
                .map_err(de::Error::custom);
        }

        if raw_value.get("Records").is_some() {
            debug!("kinesis event detected");
            return KinesisEvent::deserialize(&raw_value)
                .map(Combined::Kinesis)
                .map_err(de::Error::custom);
        }

        if raw_value.get("httpMethod").is_some() {
            debug!("api gateway event detected");
            return ApiGatewayProxyRequest::deserialize(&raw_value)
                .map(|request| Combined::ApiGateway(Box::new(request)))
                .map_err(de::Error::custom);
        }

        Err(de::Error::custom(format!(
            "unsupported event type: {raw_value}"
        )))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_detects_certificate_registration() {
        let raw = r#"{
            "certificateId": "f0e9a8d7c6b5",
            "caCertificateId": "a1b2c3d4e5f6",
            "timestamp": 1582044151000,
            "certificateStatus": "PENDING_ACTIVATION",
            "awsAccountId": "123456789012"
        }"#;
        let event: Combined = serde_json::from_str(raw).unwrap();
        match event {
            Combined::CertificateRegistration(e) => {
                assert_eq!(e.certificate_id, "f0e9a8d7c6b5");
                assert_eq!(e.certificate_status, "PENDING_ACTIVATION");
            }
            other => panic!("expected certificate registration, got {:?}", other),
        }
    }

    #[test]
    fn test_detects_api_gateway_request() {
        let raw = r#"{
            "resource": "/vehicles",
            "path": "/vehicles",
            "httpMethod": "GET",
            "requestContext": {
                "httpMethod": "GET",
                "authorizer": {"claims": {"cognito:username": "user-1"}}
            }
        }"#;
        let event: Combined = serde_json::from_str(raw).unwrap();
        match event {
            Combined::ApiGateway(request) => {
                assert_eq!(request.resource.as_deref(), Some("/vehicles"));
            }
            other => panic!("expected api gateway request, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_event() {
        let raw = r#"{"hello": "world"}"#;
        let result: Result<Combined, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }
}
