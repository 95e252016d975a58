use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{Engine, NearbyDriver};
use crate::{
    api::DriverAvailabilityAPI,
    entities::{Coordinates, DriverAvailabilityRecord, DriverStatus, Outcome, VehicleClass},
    error::{invalid_input_error, not_found_error, Error},
};

// how far ahead of the engine's clock a heartbeat may be stamped
const MAX_CLOCK_SKEW_SECS: i64 = 30;

#[async_trait]
impl DriverAvailabilityAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn update_driver_location(
        &self,
        driver_id: Uuid,
        position: Coordinates,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, Error> {
        if !position.is_valid() {
            return Err(invalid_input_error());
        }
        if timestamp > Utc::now() + Duration::seconds(MAX_CLOCK_SKEW_SECS) {
            tracing::warn!("heartbeat from {} is dated {} in the future", driver_id, timestamp);
            return Err(invalid_input_error());
        }

        if !self.drivers.contains(driver_id).await {
            let profile = self
                .profiles
                .driver_profile(driver_id)
                .await?
                .ok_or_else(not_found_error)?;

            let record = DriverAvailabilityRecord::new(
                driver_id,
                position,
                profile.vehicle_class,
                profile.rating,
                timestamp,
            );

            // a concurrent first heartbeat may have registered the driver already
            if self.drivers.register(record).await.is_ok() {
                return Ok(true);
            }
        }

        match self
            .drivers
            .upsert_position(driver_id, position, timestamp)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_stale_location_update() => {
                tracing::warn!("dropped stale heartbeat from {}", driver_id);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn find_driver(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error> {
        self.drivers.find(driver_id).await
    }

    #[tracing::instrument(skip(self))]
    async fn go_offline(&self, driver_id: Uuid) -> Result<(), Error> {
        let record = self.drivers.remove(driver_id).await?;

        let request_id = match record.status {
            DriverStatus::Offered { request_id } => request_id,
            _ => return Ok(()),
        };

        let ride = match self.ride(request_id).await {
            Ok(ride) => ride,
            Err(_) => return Ok(()),
        };
        let mut ride = ride.lock().await;
        let ride = &mut *ride;
        let now = Utc::now();

        // the negotiation may have ended while the driver was being removed
        if let Some(index) = ride
            .negotiations
            .iter()
            .position(|n| n.driver_id == driver_id && n.is_live())
        {
            tracing::info!("driver {} left negotiation for {}", driver_id, request_id);

            ride.negotiations[index].force_decline(now)?;
            self.negotiation_closed(ride, index, Outcome::Declined, now)
                .await;
            self.advance(ride, now).await?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn start_trip(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error> {
        self.drivers
            .with_driver(driver_id, |driver| {
                driver.start_trip()?;
                Ok(driver.clone())
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn complete_trip(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error> {
        self.drivers
            .with_driver(driver_id, |driver| {
                driver.finish_trip()?;
                Ok(driver.clone())
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn query_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        vehicle_class: VehicleClass,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, Error> {
        if !point.is_valid() || !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(invalid_input_error());
        }

        Ok(self
            .drivers
            .query_nearby(point, radius_km, vehicle_class, limit)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tokio_test::block_on;
    use uuid::Uuid;

    use crate::api::{DriverAvailabilityAPI, NegotiationAPI, RideRequestAPI};
    use crate::config::Config;
    use crate::engine::testing::{harness, pickup};
    use crate::entities::{
        Coordinates, DriverStatus, NegotiationState, ResponseAction, RideStatus, VehicleClass,
    };

    #[test]
    fn going_offline_declines_pending_offer() {
        let h = harness(Config::default());
        let first = h.driver_at(0.5);
        let second = h.driver_at(1.0);
        let request = h.request(Uuid::new_v4());

        block_on(h.engine.go_offline(first)).unwrap();

        assert_eq!(h.negotiations(request.id)[0].state, NegotiationState::Declined);
        assert_eq!(h.status(second), DriverStatus::Offered { request_id: request.id });
        assert_eq!(block_on(h.engine.find_driver(first)).unwrap_err().code, 102);
        assert!(block_on(h.engine.go_offline(first)).is_err());
    }

    #[test]
    fn assigned_driver_cannot_go_offline() {
        let h = harness(Config::default());
        let driver_id = h.driver_at(0.5);
        let request = h.request(Uuid::new_v4());
        let offer = h.pending_offer(request.id, driver_id);

        block_on(h.engine.respond(offer.id, ResponseAction::Accept, None, None)).unwrap();

        let err = block_on(h.engine.go_offline(driver_id)).unwrap_err();
        assert!(err.is_invalid_transition());
        assert_eq!(h.status(driver_id), DriverStatus::Assigned { request_id: request.id });
    }

    #[test]
    fn trip_progression_frees_the_driver() {
        let h = harness(Config::default());
        let driver_id = h.driver_at(0.5);
        let request = h.request(Uuid::new_v4());
        let offer = h.pending_offer(request.id, driver_id);

        assert!(block_on(h.engine.start_trip(driver_id))
            .unwrap_err()
            .is_invalid_transition());

        block_on(h.engine.respond(offer.id, ResponseAction::Accept, None, None)).unwrap();

        let on_trip = block_on(h.engine.start_trip(driver_id)).unwrap();
        assert_eq!(on_trip.status, DriverStatus::OnTrip { request_id: request.id });

        let done = block_on(h.engine.complete_trip(driver_id)).unwrap();
        assert_eq!(done.status, DriverStatus::Idle);
        assert_eq!(
            block_on(h.engine.find_request(request.id)).unwrap().status,
            RideStatus::Assigned {
                driver_id,
                price: 1500.0
            }
        );
    }

    #[test]
    fn stale_heartbeat_is_ignored() {
        let h = harness(Config::default());
        let driver_id = h.driver_at(0.5);
        let before = block_on(h.engine.find_driver(driver_id)).unwrap();

        let applied = block_on(h.engine.update_driver_location(
            driver_id,
            Coordinates::new(6.60, 3.35),
            before.last_seen - Duration::seconds(3),
        ))
        .unwrap();

        assert!(!applied);
        let after = block_on(h.engine.find_driver(driver_id)).unwrap();
        assert_eq!(after.position, before.position);
        assert_eq!(after.position_version, before.position_version);

        let applied = block_on(h.engine.update_driver_location(
            driver_id,
            Coordinates::new(6.60, 3.35),
            before.last_seen + Duration::seconds(3),
        ))
        .unwrap();

        assert!(applied);
        assert_eq!(
            block_on(h.engine.find_driver(driver_id)).unwrap().position_version,
            before.position_version + 1
        );
    }

    #[test]
    fn future_dated_heartbeat_is_rejected() {
        let h = harness(Config::default());
        let driver_id = h.driver_at(0.5);
        let before = block_on(h.engine.find_driver(driver_id)).unwrap();

        let err = block_on(h.engine.update_driver_location(
            driver_id,
            Coordinates::new(6.60, 3.35),
            Utc::now() + Duration::hours(1),
        ))
        .unwrap_err();
        assert_eq!(err.code, 101);

        let after = block_on(h.engine.find_driver(driver_id)).unwrap();
        assert_eq!(after.last_seen, before.last_seen);

        // later real heartbeats still land
        assert!(block_on(h.engine.update_driver_location(
            driver_id,
            Coordinates::new(6.60, 3.35),
            Utc::now(),
        ))
        .unwrap());
    }

    #[test]
    fn nearby_query_validates_input() {
        let h = harness(Config::default());
        h.driver_at(0.5);

        let nearby =
            block_on(h.engine.query_nearby(pickup(), 1.0, VehicleClass::Sedan, 5)).unwrap();
        assert_eq!(nearby.len(), 1);
        assert!(nearby[0].distance_km < 0.6);

        assert!(block_on(h.engine.query_nearby(pickup(), -1.0, VehicleClass::Sedan, 5)).is_err());
        assert!(block_on(h.engine.update_driver_location(
            Uuid::new_v4(),
            Coordinates::new(120.0, 3.0),
            Utc::now()
        ))
        .is_err());
    }
}
