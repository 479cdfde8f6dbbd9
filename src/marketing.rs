use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::notify::{NotificationDispatcher, NotificationMessage};
use crate::records::{parse_telemetry_timestamp, Advertisement, PointOfInterest};
use crate::store::{KeyCondition, RecordStore};
use crate::telemetry::LocationUpdate;

/// Mean earth radius in meters, for the haversine distance.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

fn within_radius(poi: &PointOfInterest, latitude: f64, longitude: f64) -> bool {
    distance_meters(poi.latitude, poi.longitude, latitude, longitude) <= poi.radius
}

/// Evaluates location updates against the point-of-interest set and creates
/// at most one advertisement per `(trip_id, poi_id)`.
pub struct MarketingService {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    marketing_table: String,
    poi_table: String,
}

impl MarketingService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        marketing_table: String,
        poi_table: String,
    ) -> Self {
        MarketingService {
            store,
            dispatcher,
            marketing_table,
            poi_table,
        }
    }

    /// Scans the POI set and processes every geofence the vehicle is inside,
    /// one POI at a time in scan order. The first store error aborts the
    /// remaining evaluation. The scan reads a single page, which is
    /// acceptable only while the POI set stays small.
    pub async fn evaluate(&self, update: LocationUpdate) -> Result<&'static str, ServiceError> {
        let items = self.store.scan(&self.poi_table).await?;

        for item in &items {
            let poi = PointOfInterest::from_item(item)?;
            if within_radius(&poi, update.latitude, update.longitude) {
                debug!("vin {} is inside the {} geofence", update.vin, poi.poi);
                self.process_advertisement(&update, &poi).await?;
            }
        }

        Ok("evals complete")
    }

    /// Creates and dispatches the advertisement for one contained POI, unless
    /// the trip has already received it. Same read-then-write window as the
    /// anomaly dedup; the store only promises per-item atomicity.
    async fn process_advertisement(
        &self,
        update: &LocationUpdate,
        poi: &PointOfInterest,
    ) -> Result<Option<Advertisement>, ServiceError> {
        let condition =
            KeyCondition::equals("trip_id", &update.trip_id).and_equals("poi_id", &poi.poi_id);
        let existing = self
            .store
            .query(&self.marketing_table, &condition, None, None)
            .await?;
        if !existing.items.is_empty() {
            debug!(
                "trip {} already received the advertisement for {}",
                update.trip_id, poi.poi_id
            );
            return Ok(None);
        }

        let identified_at = parse_telemetry_timestamp(&update.timestamp).map_err(|e| {
            ServiceError::Validation(format!(
                "location update carries an unparseable timestamp {} - {}",
                update.timestamp, e
            ))
        })?;

        let now = Utc::now();
        let advertisement = Advertisement {
            vin: update.vin.clone(),
            trip_id: update.trip_id.clone(),
            poi_id: poi.poi_id.clone(),
            message: poi.message.clone(),
            action: "none".to_string(),
            identified_at,
            created_at: now,
            updated_at: now,
        };

        info!(
            "creating advertisement for poi {} on trip {}",
            poi.poi_id, update.trip_id
        );
        self.store
            .put(&self.marketing_table, advertisement.to_item())
            .await?;

        let mobile = format!("*Notification from {} - {}", poi.poi, poi.message);
        let message = NotificationMessage::new("info", mobile, json!(poi.message));
        self.dispatcher.notify(&update.vin, &message).await?;

        Ok(Some(advertisement))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn poi(latitude: f64, longitude: f64, radius: f64) -> PointOfInterest {
        PointOfInterest {
            poi_id: "poi-1".to_string(),
            poi: "Spruce Coffee".to_string(),
            latitude,
            longitude,
            radius,
            message: "Fresh roast a block away".to_string(),
            address: "1 Main St".to_string(),
            city: "Denver".to_string(),
            state: "CO".to_string(),
        }
    }

    #[test]
    fn test_point_at_center_is_always_inside() {
        assert!(within_radius(&poi(39.7392, -104.9903, 0.0), 39.7392, -104.9903));
        assert!(within_radius(&poi(39.7392, -104.9903, 250.0), 39.7392, -104.9903));
    }

    #[test]
    fn test_point_just_past_radius_is_outside() {
        // 0.01 degrees of latitude is roughly 1112 meters.
        let inside = poi(39.7392, -104.9903, 1200.0);
        let outside = poi(39.7392, -104.9903, 1000.0);
        assert!(within_radius(&inside, 39.7492, -104.9903));
        assert!(!within_radius(&outside, 39.7492, -104.9903));
    }

    #[test]
    fn test_distance_is_symmetric() {
        let d1 = distance_meters(38.9072, -77.0369, 39.7392, -104.9903);
        let d2 = distance_meters(39.7392, -104.9903, 38.9072, -77.0369);
        assert!((d1 - d2).abs() < 1e-6);
        // DC to Denver is about 2,400 km.
        assert!(d1 > 2_300_000.0 && d1 < 2_500_000.0);
    }
}
