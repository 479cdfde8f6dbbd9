use std::collections::HashMap;
use std::sync::Arc;

use aws_lambda_events::encodings::Body;
use aws_lambda_events::event::apigw::{ApiGatewayProxyRequest, ApiGatewayProxyResponse};
use http::header::HeaderValue;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::anomaly::AnomalyService;
use crate::driversafety::DriverSafetyService;
use crate::dtc::DtcService;
use crate::error::ServiceError;
use crate::vehicle::{HealthReportService, VehicleService};

/// Maps inbound API paths onto the vehicle, dtc, anomaly, trip and health
/// report operations. Every per-vehicle route proves ownership before
/// touching dependent tables. Services are shared with the streaming path.
pub struct Router {
    vehicles: Arc<VehicleService>,
    dtcs: Arc<DtcService>,
    anomalies: Arc<AnomalyService>,
    driversafety: Arc<DriverSafetyService>,
    health_reports: Arc<HealthReportService>,
}

impl Router {
    pub fn new(
        vehicles: Arc<VehicleService>,
        dtcs: Arc<DtcService>,
        anomalies: Arc<AnomalyService>,
        driversafety: Arc<DriverSafetyService>,
        health_reports: Arc<HealthReportService>,
    ) -> Self {
        Router {
            vehicles,
            dtcs,
            anomalies,
            driversafety,
            health_reports,
        }
    }

    pub async fn route(&self, request: ApiGatewayProxyRequest) -> ApiGatewayProxyResponse {
        let resource = request.resource.clone().unwrap_or_default();
        let method = request.http_method.clone();

        match self.dispatch(&request).await {
            Ok(data) => build_response(200, data.to_string()),
            Err(err) => {
                warn!("{} {} failed: {}", method, resource, err);
                let body = json!({"error": {"message": err.to_string()}});
                build_response(err.status_code(), body.to_string())
            }
        }
    }

    async fn dispatch(&self, request: &ApiGatewayProxyRequest) -> Result<Value, ServiceError> {
        let principal = principal_id(request)?;
        let resource = request.resource.as_deref().unwrap_or_default();
        let method = request.http_method.as_str();
        let params = &request.path_parameters;

        info!("{} {} for principal {}", method, resource, principal);
        match (resource, method) {
            ("/vehicles", "GET") => to_value(self.vehicles.list(&principal).await?),
            ("/vehicles", "POST") => {
                let registration = parse_body(request)?;
                to_value(self.vehicles.register(&principal, registration).await?)
            }
            ("/vehicles/{vin}", "GET") => {
                let vin = path_param(params, "vin")?;
                to_value(self.vehicles.get(&principal, vin).await?)
            }
            ("/vehicles/{vin}/dtc", "GET") => {
                let vin = path_param(params, "vin")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.dtcs.list_by_vehicle(vin, target_page(request)).await?)
            }
            ("/vehicles/{vin}/dtc/{dtc_id}", "GET") => {
                let vin = path_param(params, "vin")?;
                let dtc_id = path_param(params, "dtc_id")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.dtcs.get(vin, dtc_id).await?)
            }
            ("/vehicles/{vin}/dtc/{dtc_id}/acknowledge", "PUT") => {
                let vin = path_param(params, "vin")?;
                let dtc_id = path_param(params, "dtc_id")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.dtcs.acknowledge(vin, dtc_id).await?)
            }
            ("/vehicles/{vin}/anomalies", "GET") => {
                let vin = path_param(params, "vin")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(
                    self.anomalies
                        .list_by_vehicle(vin, target_page(request))
                        .await?,
                )
            }
            ("/vehicles/{vin}/anomalies/{anomaly_id}", "GET") => {
                let vin = path_param(params, "vin")?;
                let anomaly_id = path_param(params, "anomaly_id")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.anomalies.get(vin, anomaly_id).await?)
            }
            ("/vehicles/{vin}/anomalies/{anomaly_id}/acknowledge", "PUT") => {
                let vin = path_param(params, "vin")?;
                let anomaly_id = path_param(params, "anomaly_id")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.anomalies.acknowledge(vin, anomaly_id).await?)
            }
            ("/vehicles/{vin}/trips", "GET") => {
                let vin = path_param(params, "vin")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.driversafety.list_trips_by_vehicle(vin).await?)
            }
            ("/vehicles/{vin}/trips/{trip_id}", "GET") => {
                let vin = path_param(params, "vin")?;
                let trip_id = path_param(params, "trip_id")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.driversafety.get_trip(vin, trip_id).await?)
            }
            ("/vehicles/{vin}/healthreports", "GET") => {
                let vin = path_param(params, "vin")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.health_reports.list_by_vehicle(vin).await?)
            }
            ("/vehicles/{vin}/healthreports/{report_id}", "GET") => {
                let vin = path_param(params, "vin")?;
                let report_id = path_param(params, "report_id")?;
                self.vehicles.assert_ownership(&principal, vin).await?;
                to_value(self.health_reports.get(vin, report_id).await?)
            }
            _ => Err(ServiceError::Validation(format!(
                "Invalid path request {}, {}",
                resource, method
            ))),
        }
    }
}

fn principal_id(request: &ApiGatewayProxyRequest) -> Result<String, ServiceError> {
    request
        .request_context
        .authorizer
        .fields
        .get("claims")
        .and_then(|claims| claims.get("cognito:username"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ServiceError::Unauthorized("The request carries no authorizer claims.".to_string())
        })
}

fn path_param<'a>(
    params: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, ServiceError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| ServiceError::Validation(format!("missing path parameter {}", name)))
}

// Mirrors the loose page handling of the streaming-side readers: anything
// unparseable falls back to the first page.
fn target_page(request: &ApiGatewayProxyRequest) -> usize {
    request
        .query_string_parameters
        .first("page")
        .and_then(|p| p.parse::<usize>().ok())
        .unwrap_or(0)
}

fn parse_body<T: DeserializeOwned>(request: &ApiGatewayProxyRequest) -> Result<T, ServiceError> {
    let body = request
        .body
        .as_deref()
        .ok_or_else(|| ServiceError::Validation("A request body is required.".to_string()))?;
    serde_json::from_str(body)
        .map_err(|e| ServiceError::Validation(format!("malformed request body - {}", e)))
}

fn to_value<T: serde::Serialize>(data: T) -> Result<Value, ServiceError> {
    serde_json::to_value(data)
        .map_err(|e| ServiceError::Validation(format!("failed to serialize response - {}", e)))
}

fn build_response(status_code: i64, body: String) -> ApiGatewayProxyResponse {
    let mut headers = HeaderMap::new();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));

    ApiGatewayProxyResponse {
        status_code,
        headers,
        multi_value_headers: HeaderMap::new(),
        body: Some(Body::Text(body)),
        is_base64_encoded: false,
    }
}
