use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::notify::{NotificationDispatcher, NotificationMessage};
use crate::records::Trip;
use crate::store::{KeyCondition, RecordStore};

/// Composite 0-100 driver safety score for a trip's aggregate statistics,
/// rounded to one decimal place.
///
/// The `> 1` normalization guard is inherited behavior: the speed factor can
/// push the raw score well past 1, and upstream chose to rescale rather than
/// rework the formula. Preserved as-is.
pub fn compute_score(trip: &Trip) -> Result<f64, ServiceError> {
    let trip_duration_ms = (trip.end_time - trip.start_time).num_milliseconds() as f64;
    if trip_duration_ms <= 0.0 {
        return Err(ServiceError::Validation(
            "trip duration must be positive".to_string(),
        ));
    }

    let odometer = trip.odometer.ceil();
    if odometer <= 0.0 {
        return Err(ServiceError::Validation(
            "trip odometer must be positive".to_string(),
        ));
    }

    let active_fraction = (trip_duration_ms - trip.idle_duration) / trip_duration_ms;
    let braking_factor = ((odometer - trip.high_braking_event) / odometer).abs();
    let accel_factor = ((odometer - trip.high_acceleration_event) / odometer).abs();
    let speed_factor = (trip.high_speed_duration / trip_duration_ms) * odometer;

    let mut raw_score = (active_fraction + braking_factor + accel_factor + speed_factor) / 4.0;
    if raw_score > 1.0 {
        raw_score /= 100.0;
    }

    Ok((raw_score * 100.0 * 10.0).round() / 10.0)
}

/// Scores closed-out trips and serves the owner-facing trip queries.
pub struct DriverSafetyService {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    trip_table: String,
}

impl DriverSafetyService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        trip_table: String,
    ) -> Self {
        DriverSafetyService {
            store,
            dispatcher,
            trip_table,
        }
    }

    /// Computes the safety score, persists the trip with it, then notifies
    /// the owner with the score and trip statistics. Returns the persisted
    /// trip.
    pub async fn score(&self, mut trip: Trip) -> Result<Trip, ServiceError> {
        let score = compute_score(&trip)?;
        if !(0.0..=100.0).contains(&score) {
            warn!(
                "driver safety score {} out of range for trip {}",
                score, trip.trip_id
            );
        }
        trip.driver_safety_score = Some(score);

        info!(
            "trip {} for vin {} scored {}",
            trip.trip_id, trip.vin, score
        );
        self.store.put(&self.trip_table, trip.to_item()).await?;

        let summary = json!({
            "score": score,
            "high_acceleration_events": trip.high_acceleration_event,
            "high_braking_events": trip.high_braking_event,
            "high_speed_duration": trip.high_speed_duration,
            "vehicle_speed_mean": trip.vehicle_speed_mean,
            "milage": trip.odometer,
        });
        let mobile = format!(
            "Connected Car Notification. Your driver score for your last trip was {}.",
            score
        );
        let message = NotificationMessage::new("driverscore", mobile, summary);
        self.dispatcher.notify(&trip.vin, &message).await?;

        Ok(trip)
    }

    pub async fn list_trips_by_vehicle(&self, vin: &str) -> Result<Vec<Trip>, ServiceError> {
        let page = self
            .store
            .query(
                &self.trip_table,
                &KeyCondition::equals("vin", vin),
                None,
                None,
            )
            .await?;

        page.items
            .iter()
            .map(|item| Trip::from_item(item).map_err(ServiceError::from))
            .collect()
    }

    pub async fn get_trip(&self, vin: &str, trip_id: &str) -> Result<Trip, ServiceError> {
        let item = self
            .store
            .get(&self.trip_table, Trip::key(vin, trip_id))
            .await?;

        match item {
            Some(item) => Ok(Trip::from_item(&item)?),
            None => Err(ServiceError::not_found(
                "The trip record requested does not exist.",
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_trip() -> Trip {
        Trip {
            vin: "SAMPLEVIN123".to_string(),
            trip_id: "trip-9".to_string(),
            start_time: Utc.with_ymd_and_hms(2020, 2, 18, 16, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2020, 2, 18, 17, 0, 0).unwrap(),
            odometer: 50.0,
            idle_duration: 600_000.0,
            high_braking_event: 2.0,
            high_acceleration_event: 1.0,
            high_speed_duration: 300_000.0,
            vehicle_speed_mean: 45.2,
            driver_safety_score: None,
        }
    }

    #[test]
    fn test_score_is_deterministic() {
        let trip = sample_trip();
        let first = compute_score(&trip).unwrap();
        let second = compute_score(&trip).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_worked_example() {
        // active = 5/6, braking = 48/50, accel = 49/50,
        // speed = (300000/3600000) * 50 = 25/6; raw = 1.735 > 1, so /100.
        let score = compute_score(&sample_trip()).unwrap();
        assert_eq!(score, 1.7);
    }

    #[test]
    fn test_score_stays_in_range_and_one_decimal() {
        let mut trip = sample_trip();
        trip.high_speed_duration = 0.0;
        let score = compute_score(&trip).unwrap();
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, (score * 10.0).round() / 10.0);
    }

    #[test]
    fn test_zero_duration_trip_is_rejected() {
        let mut trip = sample_trip();
        trip.end_time = trip.start_time;
        assert!(matches!(
            compute_score(&trip),
            Err(ServiceError::Validation(_))
        ));
    }
}
