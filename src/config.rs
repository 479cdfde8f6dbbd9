use std::env;

/// Runtime configuration, resolved once at startup from the function's
/// environment. Missing table names are a startup error, never a runtime
/// panic.
#[derive(Debug, Clone)]
pub struct Config {
    pub owner_table: String,
    pub vehicle_dtc_table: String,
    pub dtc_reference_table: String,
    pub anomaly_table: String,
    pub trip_table: String,
    pub health_report_table: String,
    pub poi_table: String,
    pub marketing_table: String,
    pub notification_topic_arn: String,
    pub region: String,
}

fn required(name: &str) -> Result<String, String> {
    env::var(name).map_err(|e| format!("{} not set - {}", name, e))
}

impl Config {
    pub fn load_from_env() -> Result<Config, String> {
        let conf = Config {
            owner_table: required("VEHICLE_OWNER_TBL")?,
            vehicle_dtc_table: required("VEHICLE_DTC_TBL")?,
            dtc_reference_table: required("DTC_TBL")?,
            anomaly_table: required("VEHICLE_ANOMALY_TBL")?,
            trip_table: required("VEHICLE_TRIP_TBL")?,
            health_report_table: required("VEHICLE_HEALTH_REPORT_TBL")?,
            poi_table: required("POI_TBL")?,
            marketing_table: required("MKT_TBL")?,
            notification_topic_arn: required("NOTIFICATION_TOPIC_ARN")?,
            region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        };

        Ok(conf)
    }
}
