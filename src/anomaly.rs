use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::notify::{NotificationDispatcher, NotificationMessage};
use crate::records::AnomalyRecord;
use crate::store::{query_page, KeyCondition, RecordStore};
use crate::telemetry::AnomalyReading;

/// Secondary index used for the per-trip dedup query.
const TRIP_INDEX: &str = "vin-trip_id-index";

/// Maps a telemetric to the phrase used in owner notifications. Unknown
/// telemetrics map to an empty phrase.
pub fn humanize_telemetric(telemetric: &str) -> &'static str {
    match telemetric {
        "oil_temp" => "high oil temperature",
        "vehicle_speed" => "high vehicle speed",
        _ => "",
    }
}

/// Evaluates flagged telemetry readings and manages the resulting anomaly
/// records.
pub struct AnomalyService {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    table: String,
}

impl AnomalyService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        table: String,
    ) -> Self {
        AnomalyService {
            store,
            dispatcher,
            table,
        }
    }

    /// Creates at most one anomaly record per `(vin, trip_id, telemetric)`.
    ///
    /// Returns `None` when the reading is below its threshold or the triple
    /// was already recorded. The existence check and the insert are separate
    /// store calls, so two concurrent evaluations of the same triple can both
    /// pass the check; the store only promises per-item atomicity and this
    /// service accepts that window.
    pub async fn evaluate(
        &self,
        reading: AnomalyReading,
    ) -> Result<Option<AnomalyRecord>, ServiceError> {
        if reading.value <= reading.low_limit {
            debug!(
                "{} reading {} within limit {} for vin {}",
                reading.telemetric, reading.value, reading.low_limit, reading.vin
            );
            return Ok(None);
        }

        let condition = KeyCondition::equals("vin", &reading.vin)
            .and_equals("trip_id", &reading.trip_id)
            .on_index(TRIP_INDEX);
        let existing = self.store.query(&self.table, &condition, None, None).await?;
        if existing.items.iter().any(|item| {
            matches!(
                item.get("telemetric"),
                Some(aws_sdk_dynamodb::types::AttributeValue::S(t)) if *t == reading.telemetric
            )
        }) {
            debug!(
                "anomaly for {} already recorded on trip {}",
                reading.telemetric, reading.trip_id
            );
            return Ok(None);
        }

        let identified_at = Utc
            .timestamp_millis_opt(reading.ts)
            .single()
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "anomaly reading carries an out-of-range timestamp {}",
                    reading.ts
                ))
            })?;

        let now = Utc::now();
        let record = AnomalyRecord {
            anomaly_id: Uuid::new_v4().to_string(),
            vin: reading.vin.clone(),
            trip_id: reading.trip_id.clone(),
            value: reading.value,
            anomaly_score: reading.anomaly_score,
            telemetric: reading.telemetric.clone(),
            identified_at,
            created_at: now,
            updated_at: now,
            acknowledged: false,
        };

        info!(
            "recording {} anomaly for vin {} on trip {}",
            record.telemetric, record.vin, record.trip_id
        );
        self.store.put(&self.table, record.to_item()).await?;

        let phrase = humanize_telemetric(&record.telemetric);
        let mobile = format!(
            "Connected Car Notification. Your vehicle issued a anomaly alert for {}",
            phrase
        );
        let hud = format!("An anomaly was detected for {}", phrase);
        let message = NotificationMessage::new("anomaly", mobile, json!(hud));
        self.dispatcher.notify(&record.vin, &message).await?;

        Ok(Some(record))
    }

    /// Returns one page (20 items) of a vehicle's anomaly records.
    pub async fn list_by_vehicle(
        &self,
        vin: &str,
        page: usize,
    ) -> Result<Vec<AnomalyRecord>, ServiceError> {
        let items = query_page(
            self.store.as_ref(),
            &self.table,
            &KeyCondition::equals("vin", vin),
            page,
        )
        .await?;

        items
            .iter()
            .map(|item| AnomalyRecord::from_item(item).map_err(ServiceError::from))
            .collect()
    }

    pub async fn get(&self, vin: &str, anomaly_id: &str) -> Result<AnomalyRecord, ServiceError> {
        let item = self
            .store
            .get(&self.table, AnomalyRecord::key(vin, anomaly_id))
            .await?;

        match item {
            Some(item) => Ok(AnomalyRecord::from_item(&item)?),
            None => Err(ServiceError::not_found(
                "The anomaly record requested does not exist.",
            )),
        }
    }

    pub async fn acknowledge(
        &self,
        vin: &str,
        anomaly_id: &str,
    ) -> Result<AnomalyRecord, ServiceError> {
        let mut record = self.get(vin, anomaly_id).await?;

        debug!("acknowledging anomaly {} for vin {}", anomaly_id, vin);
        record.acknowledged = true;
        record.updated_at = Utc::now();
        self.store.put(&self.table, record.to_item()).await?;

        Ok(record)
    }
}
