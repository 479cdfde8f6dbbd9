use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use crate::error::ServiceError;
use crate::records::{HealthReport, Vehicle};
use crate::store::{KeyCondition, RecordStore};

/// Registration payload accepted on `POST /vehicles`. The owner id always
/// comes from the authorizer claims, never from the body.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleRegistration {
    pub vin: String,
    pub nickname: String,
    #[serde(default)]
    pub odometer: f64,
}

/// Vehicle registry operations, including the ownership guard every
/// per-vehicle read/write goes through first.
pub struct VehicleService {
    store: Arc<dyn RecordStore>,
    owner_table: String,
}

impl VehicleService {
    pub fn new(store: Arc<dyn RecordStore>, owner_table: String) -> Self {
        VehicleService { store, owner_table }
    }

    /// Proves `(owner_id, vin)` exists before any dependent-table operation.
    /// Absence is terminal, not retryable.
    pub async fn assert_ownership(
        &self,
        owner_id: &str,
        vin: &str,
    ) -> Result<Vehicle, ServiceError> {
        let item = self
            .store
            .get(&self.owner_table, Vehicle::key(owner_id, vin))
            .await?;

        match item {
            Some(item) => Ok(Vehicle::from_item(&item)?),
            None => Err(ServiceError::not_found(
                "The vehicle requested is not registered under the user.",
            )),
        }
    }

    pub async fn list(&self, owner_id: &str) -> Result<Vec<Vehicle>, ServiceError> {
        let page = self
            .store
            .query(
                &self.owner_table,
                &KeyCondition::equals("owner_id", owner_id),
                None,
                None,
            )
            .await?;

        page.items
            .iter()
            .map(|item| Vehicle::from_item(item).map_err(ServiceError::from))
            .collect()
    }

    pub async fn register(
        &self,
        owner_id: &str,
        registration: VehicleRegistration,
    ) -> Result<Vehicle, ServiceError> {
        let vehicle = Vehicle {
            owner_id: owner_id.to_string(),
            vin: registration.vin,
            nickname: registration.nickname,
            odometer: registration.odometer,
        };

        info!("registering vehicle {} for owner {}", vehicle.vin, owner_id);
        self.store
            .put(&self.owner_table, vehicle.to_item())
            .await?;

        Ok(vehicle)
    }

    pub async fn get(&self, owner_id: &str, vin: &str) -> Result<Vehicle, ServiceError> {
        let item = self
            .store
            .get(&self.owner_table, Vehicle::key(owner_id, vin))
            .await?;

        match item {
            Some(item) => Ok(Vehicle::from_item(&item)?),
            None => Err(ServiceError::not_found("The vehicle requested does not exist.")),
        }
    }
}

/// Read-only access to the generated vehicle health reports.
pub struct HealthReportService {
    store: Arc<dyn RecordStore>,
    table: String,
}

impl HealthReportService {
    pub fn new(store: Arc<dyn RecordStore>, table: String) -> Self {
        HealthReportService { store, table }
    }

    pub async fn list_by_vehicle(&self, vin: &str) -> Result<Vec<HealthReport>, ServiceError> {
        let page = self
            .store
            .query(&self.table, &KeyCondition::equals("vin", vin), None, None)
            .await?;

        page.items
            .iter()
            .map(|item| HealthReport::from_item(item).map_err(ServiceError::from))
            .collect()
    }

    pub async fn get(&self, vin: &str, report_id: &str) -> Result<HealthReport, ServiceError> {
        let item = self
            .store
            .get(&self.table, HealthReport::key(vin, report_id))
            .await?;

        match item {
            Some(item) => Ok(HealthReport::from_item(&item)?),
            None => Err(ServiceError::not_found(
                "The health report requested does not exist.",
            )),
        }
    }
}
