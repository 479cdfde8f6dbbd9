use serde::de::{self, Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::records::Trip;

/// A diagnostic trouble code reading from the vehicle gateway. `value` holds
/// the standardized code (e.g. `P0123`).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DtcReading {
    pub vin: String,
    pub value: String,
    pub timestamp: String,
}

/// A telemetric flagged by the streaming-analytics application. The score
/// field arrives upper-cased from the analytics output schema.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AnomalyReading {
    pub vin: String,
    pub trip_id: String,
    pub ts: i64,
    pub telemetric: String,
    pub value: f64,
    #[serde(alias = "ANOMALY_SCORE")]
    pub anomaly_score: f64,
    pub low_limit: f64,
}

/// A vehicle position sample used for geofence evaluation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LocationUpdate {
    pub vin: String,
    pub trip_id: String,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A classified telemetry record. Discrimination is on the `name` field where
/// the gateway supplies one, with a structural fallback for the
/// streaming-analytics anomaly output (which carries no name).
#[derive(Debug)]
pub enum TelemetryMessage {
    Dtc(DtcReading),
    Location(LocationUpdate),
    TripAggregate(Trip),
    Anomaly(AnomalyReading),
}

impl<'de> Deserialize<'de> for TelemetryMessage {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw_value: Value = Deserialize::deserialize(deserializer)?;

        match raw_value.get("name").and_then(Value::as_str) {
            Some("dtc") => {
                debug!("dtc reading detected");
                return DtcReading::deserialize(&raw_value)
                    .map(TelemetryMessage::Dtc)
                    .map_err(de::Error::custom);
            }
            Some("location") => {
                debug!("location update detected");
                return LocationUpdate::deserialize(&raw_value)
                    .map(TelemetryMessage::Location)
                    .map_err(de::Error::custom);
            }
            Some("aggregated_telemetrics") => {
                debug!("trip aggregate detected");
                return Trip::deserialize(&raw_value)
                    .map(TelemetryMessage::TripAggregate)
                    .map_err(de::Error::custom);
            }
            _ => {}
        }

        // The anomaly stream carries no name field; recognize it by the
        // threshold pair the analytics application attaches.
        if raw_value.get("low_limit").is_some() && raw_value.get("telemetric").is_some() {
            debug!("anomaly reading detected");
            return AnomalyReading::deserialize(&raw_value)
                .map(TelemetryMessage::Anomaly)
                .map_err(de::Error::custom);
        }

        // Trip aggregates published directly (not via the named topic) are
        // recognizable by their aggregate statistics.
        if raw_value.get("high_braking_event").is_some() && raw_value.get("trip_id").is_some() {
            debug!("trip aggregate detected (structural)");
            return Trip::deserialize(&raw_value)
                .map(TelemetryMessage::TripAggregate)
                .map_err(de::Error::custom);
        }

        Err(de::Error::custom(format!(
            "unsupported telemetry record: {raw_value}"
        )))
    }
}
