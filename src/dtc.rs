use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::notify::{NotificationDispatcher, NotificationMessage};
use crate::records::{parse_telemetry_timestamp, DtcRecord, DtcReferenceEntry};
use crate::store::{query_page, KeyCondition, RecordStore};
use crate::telemetry::DtcReading;

const FALLBACK_DESCRIPTION: &str = "No description available.";

/// Diagnostic trouble code ingestion plus the owner-facing read and
/// acknowledge operations.
pub struct DtcService {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    dtc_table: String,
    reference_table: String,
}

impl DtcService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        dtc_table: String,
        reference_table: String,
    ) -> Self {
        DtcService {
            store,
            dispatcher,
            dtc_table,
            reference_table,
        }
    }

    /// Records an inbound trouble code, resolving its description from the
    /// reference table, and notifies the owner.
    pub async fn ingest(&self, reading: DtcReading) -> Result<DtcRecord, ServiceError> {
        let generated_at = parse_telemetry_timestamp(&reading.timestamp).map_err(|e| {
            ServiceError::Validation(format!(
                "dtc reading carries an unparseable timestamp {} - {}",
                reading.timestamp, e
            ))
        })?;

        let description = match self
            .store
            .get(&self.reference_table, DtcReferenceEntry::key(&reading.value))
            .await?
        {
            Some(item) => DtcReferenceEntry::from_item(&item)?.description,
            None => FALLBACK_DESCRIPTION.to_string(),
        };

        let now = Utc::now();
        let record = DtcRecord {
            dtc_id: Uuid::new_v4().to_string(),
            vin: reading.vin.clone(),
            dtc: reading.value.clone(),
            description,
            generated_at,
            created_at: now,
            updated_at: now,
            acknowledged: false,
        };

        info!("recording dtc {} for vin {}", record.dtc, record.vin);
        self.store.put(&self.dtc_table, record.to_item()).await?;

        let mobile = format!(
            "Connected Car Notification. Your vehicle issued a diagnostic trouble code of {} [ {} ].",
            record.description, record.dtc
        );
        let hud = format!(
            "A trouble code was detected for '{}' [{}].",
            record.description, record.dtc
        );
        let message = NotificationMessage::new("dtc", mobile, json!(hud));
        self.dispatcher.notify(&record.vin, &message).await?;

        Ok(record)
    }

    /// Returns one page (20 items) of a vehicle's trouble codes.
    pub async fn list_by_vehicle(
        &self,
        vin: &str,
        page: usize,
    ) -> Result<Vec<DtcRecord>, ServiceError> {
        let items = query_page(
            self.store.as_ref(),
            &self.dtc_table,
            &KeyCondition::equals("vin", vin),
            page,
        )
        .await?;

        items
            .iter()
            .map(|item| DtcRecord::from_item(item).map_err(ServiceError::from))
            .collect()
    }

    pub async fn get(&self, vin: &str, dtc_id: &str) -> Result<DtcRecord, ServiceError> {
        let item = self
            .store
            .get(&self.dtc_table, DtcRecord::key(vin, dtc_id))
            .await?;

        match item {
            Some(item) => Ok(DtcRecord::from_item(&item)?),
            None => Err(ServiceError::not_found(
                "The dtc record requested does not exist.",
            )),
        }
    }

    /// Marks a trouble code as seen by the owner and refreshes `updated_at`.
    pub async fn acknowledge(&self, vin: &str, dtc_id: &str) -> Result<DtcRecord, ServiceError> {
        let mut record = self.get(vin, dtc_id).await?;

        debug!("acknowledging dtc {} for vin {}", dtc_id, vin);
        record.acknowledged = true;
        record.updated_at = Utc::now();
        self.store.put(&self.dtc_table, record.to_item()).await?;

        Ok(record)
    }
}
