use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use aws_sdk_dynamodb::types::AttributeValue;

use crate::store::Item;

/// Raised when a stored item is missing an attribute or carries one of the
/// wrong type.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("missing attribute {0}")]
    Missing(String),
    #[error("attribute {name} is not a valid {expected}")]
    Invalid { name: String, expected: &'static str },
}

fn attr_s(item: &Item, name: &str) -> Result<String, RecordError> {
    match item.get(name) {
        Some(AttributeValue::S(v)) => Ok(v.clone()),
        Some(_) => Err(RecordError::Invalid {
            name: name.to_string(),
            expected: "string",
        }),
        None => Err(RecordError::Missing(name.to_string())),
    }
}

fn attr_n(item: &Item, name: &str) -> Result<f64, RecordError> {
    match item.get(name) {
        Some(AttributeValue::N(v)) => v.parse::<f64>().map_err(|_| RecordError::Invalid {
            name: name.to_string(),
            expected: "number",
        }),
        Some(_) => Err(RecordError::Invalid {
            name: name.to_string(),
            expected: "number",
        }),
        None => Err(RecordError::Missing(name.to_string())),
    }
}

fn attr_opt_n(item: &Item, name: &str) -> Result<Option<f64>, RecordError> {
    if item.contains_key(name) {
        attr_n(item, name).map(Some)
    } else {
        Ok(None)
    }
}

fn attr_bool_or(item: &Item, name: &str, default: bool) -> Result<bool, RecordError> {
    match item.get(name) {
        Some(AttributeValue::Bool(v)) => Ok(*v),
        Some(_) => Err(RecordError::Invalid {
            name: name.to_string(),
            expected: "boolean",
        }),
        None => Ok(default),
    }
}

fn attr_time(item: &Item, name: &str) -> Result<DateTime<Utc>, RecordError> {
    let raw = attr_s(item, name)?;
    parse_telemetry_timestamp(&raw).map_err(|_| RecordError::Invalid {
        name: name.to_string(),
        expected: "timestamp",
    })
}

fn av_s(value: &str) -> AttributeValue {
    AttributeValue::S(value.to_string())
}

fn av_n(value: f64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn av_time(value: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(value.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Parses the timestamps the vehicle gateway emits. Device payloads use a
/// space-separated format with fractional seconds; records written by this
/// service use RFC 3339. Both are accepted.
pub fn parse_telemetry_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f").map(|n| Utc.from_utc_datetime(&n))
}

/// Serde adapter for the gateway timestamp format (see
/// [parse_telemetry_timestamp]).
pub mod telemetry_time {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_telemetry_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

/// A registered vehicle, keyed by `(owner_id, vin)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub owner_id: String,
    pub vin: String,
    pub nickname: String,
    pub odometer: f64,
}

impl Vehicle {
    pub fn key(owner_id: &str, vin: &str) -> Item {
        let mut key = Item::new();
        key.insert("owner_id".to_string(), av_s(owner_id));
        key.insert("vin".to_string(), av_s(vin));
        key
    }

    pub fn to_item(&self) -> Item {
        let mut item = Vehicle::key(&self.owner_id, &self.vin);
        item.insert("nickname".to_string(), av_s(&self.nickname));
        item.insert("odometer".to_string(), av_n(self.odometer));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(Vehicle {
            owner_id: attr_s(item, "owner_id")?,
            vin: attr_s(item, "vin")?,
            nickname: attr_s(item, "nickname")?,
            odometer: attr_n(item, "odometer")?,
        })
    }
}

/// A diagnostic trouble code ingested for a vehicle, keyed by `(vin, dtc_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtcRecord {
    pub dtc_id: String,
    pub vin: String,
    pub dtc: String,
    pub description: String,
    pub generated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged: bool,
}

impl DtcRecord {
    pub fn key(vin: &str, dtc_id: &str) -> Item {
        let mut key = Item::new();
        key.insert("vin".to_string(), av_s(vin));
        key.insert("dtc_id".to_string(), av_s(dtc_id));
        key
    }

    pub fn to_item(&self) -> Item {
        let mut item = DtcRecord::key(&self.vin, &self.dtc_id);
        item.insert("dtc".to_string(), av_s(&self.dtc));
        item.insert("description".to_string(), av_s(&self.description));
        item.insert("generated_at".to_string(), av_time(&self.generated_at));
        item.insert("created_at".to_string(), av_time(&self.created_at));
        item.insert("updated_at".to_string(), av_time(&self.updated_at));
        item.insert(
            "acknowledged".to_string(),
            AttributeValue::Bool(self.acknowledged),
        );
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(DtcRecord {
            dtc_id: attr_s(item, "dtc_id")?,
            vin: attr_s(item, "vin")?,
            dtc: attr_s(item, "dtc")?,
            description: attr_s(item, "description")?,
            generated_at: attr_time(item, "generated_at")?,
            created_at: attr_time(item, "created_at")?,
            updated_at: attr_time(item, "updated_at")?,
            acknowledged: attr_bool_or(item, "acknowledged", false)?,
        })
    }
}

/// Static reference entry mapping a trouble code to its description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DtcReferenceEntry {
    pub dtc: String,
    pub description: String,
}

impl DtcReferenceEntry {
    pub fn key(code: &str) -> Item {
        let mut key = Item::new();
        key.insert("dtc".to_string(), av_s(code));
        key
    }

    pub fn to_item(&self) -> Item {
        let mut item = DtcReferenceEntry::key(&self.dtc);
        item.insert("description".to_string(), av_s(&self.description));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(DtcReferenceEntry {
            dtc: attr_s(item, "dtc")?,
            description: attr_s(item, "description")?,
        })
    }
}

/// A telemetry anomaly. At most one record should exist per
/// `(vin, trip_id, telemetric)`; the evaluator enforces this with a pre-insert
/// query against the `vin-trip_id-index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub anomaly_id: String,
    pub vin: String,
    pub trip_id: String,
    pub value: f64,
    pub anomaly_score: f64,
    pub telemetric: String,
    pub identified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged: bool,
}

impl AnomalyRecord {
    pub fn key(vin: &str, anomaly_id: &str) -> Item {
        let mut key = Item::new();
        key.insert("vin".to_string(), av_s(vin));
        key.insert("anomaly_id".to_string(), av_s(anomaly_id));
        key
    }

    pub fn to_item(&self) -> Item {
        let mut item = AnomalyRecord::key(&self.vin, &self.anomaly_id);
        item.insert("trip_id".to_string(), av_s(&self.trip_id));
        item.insert("value".to_string(), av_n(self.value));
        item.insert("anomaly_score".to_string(), av_n(self.anomaly_score));
        item.insert("telemetric".to_string(), av_s(&self.telemetric));
        item.insert("identified_at".to_string(), av_time(&self.identified_at));
        item.insert("created_at".to_string(), av_time(&self.created_at));
        item.insert("updated_at".to_string(), av_time(&self.updated_at));
        item.insert(
            "acknowledged".to_string(),
            AttributeValue::Bool(self.acknowledged),
        );
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(AnomalyRecord {
            anomaly_id: attr_s(item, "anomaly_id")?,
            vin: attr_s(item, "vin")?,
            trip_id: attr_s(item, "trip_id")?,
            value: attr_n(item, "value")?,
            anomaly_score: attr_n(item, "anomaly_score")?,
            telemetric: attr_s(item, "telemetric")?,
            identified_at: attr_time(item, "identified_at")?,
            created_at: attr_time(item, "created_at")?,
            updated_at: attr_time(item, "updated_at")?,
            acknowledged: attr_bool_or(item, "acknowledged", false)?,
        })
    }
}

/// A closed-out driving session with its aggregate statistics, keyed by
/// `(vin, trip_id)`. `driver_safety_score` is derived by the scorer, never
/// settable from outside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub vin: String,
    pub trip_id: String,
    #[serde(with = "telemetry_time")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "telemetry_time")]
    pub end_time: DateTime<Utc>,
    pub odometer: f64,
    pub idle_duration: f64,
    pub high_braking_event: f64,
    pub high_acceleration_event: f64,
    pub high_speed_duration: f64,
    pub vehicle_speed_mean: f64,
    #[serde(default)]
    pub driver_safety_score: Option<f64>,
}

impl Trip {
    pub fn key(vin: &str, trip_id: &str) -> Item {
        let mut key = Item::new();
        key.insert("vin".to_string(), av_s(vin));
        key.insert("trip_id".to_string(), av_s(trip_id));
        key
    }

    pub fn to_item(&self) -> Item {
        let mut item = Trip::key(&self.vin, &self.trip_id);
        item.insert("start_time".to_string(), av_time(&self.start_time));
        item.insert("end_time".to_string(), av_time(&self.end_time));
        item.insert("odometer".to_string(), av_n(self.odometer));
        item.insert("idle_duration".to_string(), av_n(self.idle_duration));
        item.insert(
            "high_braking_event".to_string(),
            av_n(self.high_braking_event),
        );
        item.insert(
            "high_acceleration_event".to_string(),
            av_n(self.high_acceleration_event),
        );
        item.insert(
            "high_speed_duration".to_string(),
            av_n(self.high_speed_duration),
        );
        item.insert(
            "vehicle_speed_mean".to_string(),
            av_n(self.vehicle_speed_mean),
        );
        if let Some(score) = self.driver_safety_score {
            item.insert("driver_safety_score".to_string(), av_n(score));
        }
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(Trip {
            vin: attr_s(item, "vin")?,
            trip_id: attr_s(item, "trip_id")?,
            start_time: attr_time(item, "start_time")?,
            end_time: attr_time(item, "end_time")?,
            odometer: attr_n(item, "odometer")?,
            idle_duration: attr_n(item, "idle_duration")?,
            high_braking_event: attr_n(item, "high_braking_event")?,
            high_acceleration_event: attr_n(item, "high_acceleration_event")?,
            high_speed_duration: attr_n(item, "high_speed_duration")?,
            vehicle_speed_mean: attr_n(item, "vehicle_speed_mean")?,
            driver_safety_score: attr_opt_n(item, "driver_safety_score")?,
        })
    }
}

/// A generated vehicle health report, keyed by `(vin, report_id)`. Reports
/// are produced by an upstream pipeline; this service only reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub report_id: String,
    pub vin: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn key(vin: &str, report_id: &str) -> Item {
        let mut key = Item::new();
        key.insert("vin".to_string(), av_s(vin));
        key.insert("report_id".to_string(), av_s(report_id));
        key
    }

    pub fn to_item(&self) -> Item {
        let mut item = HealthReport::key(&self.vin, &self.report_id);
        item.insert("owner_id".to_string(), av_s(&self.owner_id));
        item.insert("created_at".to_string(), av_time(&self.created_at));
        item.insert("updated_at".to_string(), av_time(&self.updated_at));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(HealthReport {
            report_id: attr_s(item, "report_id")?,
            vin: attr_s(item, "vin")?,
            owner_id: attr_s(item, "owner_id")?,
            created_at: attr_time(item, "created_at")?,
            updated_at: attr_time(item, "updated_at")?,
        })
    }
}

/// A geofenced marketing location. Static reference data, read-only at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub poi_id: String,
    pub poi: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub message: String,
    pub address: String,
    pub city: String,
    pub state: String,
}

impl PointOfInterest {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("poi_id".to_string(), av_s(&self.poi_id));
        item.insert("poi".to_string(), av_s(&self.poi));
        item.insert("latitude".to_string(), av_n(self.latitude));
        item.insert("longitude".to_string(), av_n(self.longitude));
        item.insert("radius".to_string(), av_n(self.radius));
        item.insert("message".to_string(), av_s(&self.message));
        item.insert("address".to_string(), av_s(&self.address));
        item.insert("city".to_string(), av_s(&self.city));
        item.insert("state".to_string(), av_s(&self.state));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(PointOfInterest {
            poi_id: attr_s(item, "poi_id")?,
            poi: attr_s(item, "poi")?,
            latitude: attr_n(item, "latitude")?,
            longitude: attr_n(item, "longitude")?,
            radius: attr_n(item, "radius")?,
            message: attr_s(item, "message")?,
            address: attr_s(item, "address")?,
            city: attr_s(item, "city")?,
            state: attr_s(item, "state")?,
        })
    }
}

/// A delivered advertisement, keyed by `(trip_id, poi_id)`. At most one per
/// key pair for the lifetime of a trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Advertisement {
    pub vin: String,
    pub trip_id: String,
    pub poi_id: String,
    pub message: String,
    pub action: String,
    pub identified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Advertisement {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert("vin".to_string(), av_s(&self.vin));
        item.insert("trip_id".to_string(), av_s(&self.trip_id));
        item.insert("poi_id".to_string(), av_s(&self.poi_id));
        item.insert("message".to_string(), av_s(&self.message));
        item.insert("action".to_string(), av_s(&self.action));
        item.insert("identified_at".to_string(), av_time(&self.identified_at));
        item.insert("created_at".to_string(), av_time(&self.created_at));
        item.insert("updated_at".to_string(), av_time(&self.updated_at));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, RecordError> {
        Ok(Advertisement {
            vin: attr_s(item, "vin")?,
            trip_id: attr_s(item, "trip_id")?,
            poi_id: attr_s(item, "poi_id")?,
            message: attr_s(item, "message")?,
            action: attr_s(item, "action")?,
            identified_at: attr_time(item, "identified_at")?,
            created_at: attr_time(item, "created_at")?,
            updated_at: attr_time(item, "updated_at")?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_vehicle_item_round_trip() {
        let vehicle = Vehicle {
            owner_id: "user-1".to_string(),
            vin: "SAMPLEVIN123".to_string(),
            nickname: "the wagon".to_string(),
            odometer: 42000.5,
        };
        let decoded = Vehicle::from_item(&vehicle.to_item()).unwrap();
        assert_eq!(decoded.owner_id, "user-1");
        assert_eq!(decoded.odometer, 42000.5);
    }

    #[test]
    fn test_anomaly_missing_attribute() {
        let mut item = AnomalyRecord::key("SAMPLEVIN123", "a-1");
        item.insert("trip_id".to_string(), av_s("trip-9"));
        let err = AnomalyRecord::from_item(&item).unwrap_err();
        assert!(matches!(err, RecordError::Missing(_)));
    }

    #[test]
    fn test_trip_accepts_gateway_timestamp_format() {
        let payload = serde_json::json!({
            "vin": "SAMPLEVIN123",
            "trip_id": "trip-9",
            "start_time": "2020-02-18 16:42:31.000000000",
            "end_time": "2020-02-18T17:42:31.000Z",
            "odometer": 50.0,
            "idle_duration": 600000.0,
            "high_braking_event": 2.0,
            "high_acceleration_event": 1.0,
            "high_speed_duration": 300000.0,
            "vehicle_speed_mean": 45.2
        });
        let trip: Trip = serde_json::from_value(payload).unwrap();
        assert_eq!(trip.driver_safety_score, None);
        assert_eq!(
            (trip.end_time - trip.start_time).num_milliseconds(),
            3_600_000
        );
    }

    #[test]
    fn test_anomaly_acknowledged_defaults_to_false() {
        let record = AnomalyRecord {
            anomaly_id: "a-1".to_string(),
            vin: "SAMPLEVIN123".to_string(),
            trip_id: "trip-9".to_string(),
            value: 310.0,
            anomaly_score: 0.97,
            telemetric: "oil_temp".to_string(),
            identified_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            acknowledged: false,
        };
        let mut item = record.to_item();
        item.remove("acknowledged");
        let decoded = AnomalyRecord::from_item(&item).unwrap();
        assert!(!decoded.acknowledged);
    }
}
