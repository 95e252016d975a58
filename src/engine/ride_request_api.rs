use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Engine, Ride};
use crate::{
    api::RideRequestAPI,
    entities::{
        BargainSummary, Candidate, Coordinates, EventKind, MatchingAttempt, Negotiation,
        RideEvent, RideRequest, RideStatus, VehicleClass,
    },
    error::{
        active_request_exists_error, invalid_input_error, invalid_transition_error,
        no_drivers_available_error, out_of_service_area_error, Error,
    },
    geo,
};

#[async_trait]
impl RideRequestAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn create_request(
        &self,
        rider_id: Uuid,
        pickup: Coordinates,
        destination: Coordinates,
        vehicle_class: VehicleClass,
        initial_price: f64,
    ) -> Result<RideRequest, Error> {
        if !pickup.is_valid()
            || !destination.is_valid()
            || !initial_price.is_finite()
            || initial_price <= 0.0
        {
            return Err(invalid_input_error());
        }

        let zone = geo::containing_zone(&self.zones, pickup)
            .filter(|zone| zone.accepts_requests())
            .ok_or_else(out_of_service_area_error)?;

        let request = RideRequest::new(
            rider_id,
            pickup,
            destination,
            vehicle_class,
            initial_price,
            zone.id,
            self.config.request_ttl,
        );

        {
            let mut active = self.active_riders.lock().await;

            if let Some(existing) = active.get(&rider_id) {
                tracing::info!("rider {} already has request {}", rider_id, existing);
                return Err(active_request_exists_error());
            }

            active.insert(rider_id, request.id);
        }

        let ride = Arc::new(Mutex::new(Ride::new(
            request.clone(),
            self.config.initial_radius_km,
        )));
        let mut ride_guard = ride.lock().await;
        self.rides.write().await.insert(request.id, ride.clone());

        tracing::info!("request {} created in zone {}", request.id, zone.name);
        self.emit(RideEvent::new(EventKind::Created, request.id, rider_id).price(initial_price));

        self.advance(&mut ride_guard, Utc::now()).await?;

        if ride_guard.request.status == RideStatus::Expired {
            return Err(no_drivers_available_error());
        }

        Ok(ride_guard.request.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn find_request(&self, id: Uuid) -> Result<RideRequest, Error> {
        let ride = self.ride(id).await?;
        let request = ride.lock().await.request.clone();

        Ok(request)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_request(&self, id: Uuid) -> Result<RideRequest, Error> {
        let ride = self.ride(id).await?;
        let mut ride = ride.lock().await;
        let ride = &mut *ride;
        let now = Utc::now();

        ride.request.cancel(now)?;
        self.supersede_all(ride, now).await?;
        self.release_rider(ride.request.rider_id, ride.request.id)
            .await;

        self.emit(
            RideEvent::new(
                EventKind::RequestCancelled,
                ride.request.id,
                ride.request.rider_id,
            )
            .notify(ride.request.rider_id),
        );

        Ok(ride.request.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn matching_attempt(&self, id: Uuid) -> Result<MatchingAttempt, Error> {
        let ride = self.ride(id).await?;
        let attempt = ride.lock().await.attempt.clone();

        Ok(attempt)
    }

    #[tracing::instrument(skip(self))]
    async fn find_candidates(&self, id: Uuid) -> Result<Vec<Candidate>, Error> {
        let ride = self.ride(id).await?;
        let ride = ride.lock().await;

        if ride.request.is_terminal() {
            return Err(invalid_transition_error(ride.request.status, RideStatus::Matching));
        }

        // preview only, the ride's own attempt is left as is
        let mut attempt = ride.attempt.clone();
        let candidates = self.search(&ride.request, &mut attempt, Utc::now()).await;

        Ok(candidates)
    }

    #[tracing::instrument(skip(self))]
    async fn negotiation_history(&self, id: Uuid) -> Result<Vec<Negotiation>, Error> {
        let ride = self.ride(id).await?;
        let negotiations = ride.lock().await.negotiations.clone();

        Ok(negotiations)
    }

    #[tracing::instrument(skip(self))]
    async fn bargain_summary(&self, id: Uuid) -> Result<BargainSummary, Error> {
        let ride = self.ride(id).await?;
        let ride = ride.lock().await;

        let agreed_price = ride.request.assigned_driver().map(|(_, price)| price);

        Ok(BargainSummary::new(
            ride.request.id,
            ride.request.initial_price,
            agreed_price,
            &ride.negotiations,
        ))
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::block_on;
    use uuid::Uuid;

    use crate::api::{DriverAvailabilityAPI, RideRequestAPI};
    use crate::config::{Config, OfferPolicy};
    use crate::engine::testing::{destination, harness, pickup};
    use crate::entities::{
        Coordinates, DriverStatus, EventKind, NegotiationState, Outcome, RideStatus,
        VehicleClass,
    };
    use crate::error::{ACTIVE_REQUEST_EXISTS, NO_DRIVERS_AVAILABLE, OUT_OF_SERVICE_AREA};

    #[test]
    fn exhausting_every_candidate_expires_the_request() {
        let h = harness(Config::default());
        let drivers = [h.driver_at(0.5), h.driver_at(1.0), h.driver_at(2.0)];
        let rider_id = Uuid::new_v4();
        let request = h.request(rider_id);

        for driver_id in drivers {
            h.reject(request.id, driver_id);
        }

        let request = block_on(h.engine.find_request(request.id)).unwrap();
        assert_eq!(request.status, RideStatus::Expired);
        assert_eq!(block_on(h.wallet.call_count()), 0);

        for driver_id in drivers {
            assert_eq!(h.status(driver_id), DriverStatus::Idle);
        }

        let attempt = block_on(h.engine.matching_attempt(request.id)).unwrap();
        assert_eq!(attempt.radius_km, 15.0);
        assert_eq!(attempt.expansions, 3);
        assert_eq!(attempt.offered.len(), 3);
        assert!(attempt
            .offered
            .iter()
            .all(|offered| offered.outcome == Outcome::Declined));

        assert_eq!(h.events().last(), Some(&EventKind::RequestExpired));

        // the rider may retry with a better offer, decliners are only ranked lower
        let retry = block_on(h.engine.create_request(
            rider_id,
            pickup(),
            destination(),
            VehicleClass::Sedan,
            2000.0,
        ))
        .unwrap();
        assert_eq!(retry.status, RideStatus::Negotiating);
    }

    #[test]
    fn no_drivers_at_all() {
        let h = harness(Config::default());

        let err = block_on(h.engine.create_request(
            Uuid::new_v4(),
            pickup(),
            destination(),
            VehicleClass::Sedan,
            1500.0,
        ))
        .unwrap_err();

        assert_eq!(err.code, NO_DRIVERS_AVAILABLE);
    }

    #[test]
    fn far_drivers_are_found_by_expanding() {
        let h = harness(Config::default());
        let far = h.driver_at(10.0);
        let request = h.request(Uuid::new_v4());

        assert_eq!(h.status(far), DriverStatus::Offered { request_id: request.id });

        let attempt = block_on(h.engine.matching_attempt(request.id)).unwrap();
        assert_eq!(attempt.radius_km, 15.0);
        assert_eq!(attempt.round, 1);
    }

    #[test]
    fn cancel_supersedes_pending_negotiations() {
        let config = Config {
            offer_policy: OfferPolicy::Simultaneous,
            ..Config::default()
        };
        let h = harness(config);
        let first = h.driver_at(0.5);
        let second = h.driver_at(1.0);
        let rider_id = Uuid::new_v4();
        let request = h.request(rider_id);

        assert_eq!(h.status(first), DriverStatus::Offered { request_id: request.id });
        assert_eq!(h.status(second), DriverStatus::Offered { request_id: request.id });

        let cancelled = block_on(h.engine.cancel_request(request.id)).unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);

        let states: Vec<NegotiationState> =
            h.negotiations(request.id).iter().map(|n| n.state).collect();
        assert_eq!(
            states,
            vec![NegotiationState::Superseded, NegotiationState::Superseded]
        );
        assert_eq!(h.status(first), DriverStatus::Idle);
        assert_eq!(h.status(second), DriverStatus::Idle);

        assert!(block_on(h.engine.cancel_request(request.id))
            .unwrap_err()
            .is_invalid_transition());

        // the rider slot is free again
        assert!(block_on(h.engine.create_request(
            rider_id,
            pickup(),
            destination(),
            VehicleClass::Sedan,
            1500.0,
        ))
        .is_ok());
    }

    #[test]
    fn one_active_request_per_rider() {
        let h = harness(Config::default());
        h.driver_at(0.5);
        h.driver_at(1.0);
        let rider_id = Uuid::new_v4();
        h.request(rider_id);

        let err = block_on(h.engine.create_request(
            rider_id,
            pickup(),
            destination(),
            VehicleClass::Sedan,
            1500.0,
        ))
        .unwrap_err();

        assert_eq!(err.code, ACTIVE_REQUEST_EXISTS);
    }

    #[test]
    fn pickup_outside_every_zone_is_rejected() {
        let h = harness(Config::default());

        let err = block_on(h.engine.create_request(
            Uuid::new_v4(),
            Coordinates::new(9.0765, 7.3986),
            destination(),
            VehicleClass::Sedan,
            1500.0,
        ))
        .unwrap_err();

        assert_eq!(err.code, OUT_OF_SERVICE_AREA);
    }

    #[test]
    fn undrained_events_are_dropped_once_the_buffer_is_full() {
        let config = Config {
            event_buffer: 2,
            ..Config::default()
        };
        let h = harness(config);
        h.driver_at(0.5);
        let request = h.request(Uuid::new_v4());

        assert_eq!(request.status, RideStatus::Negotiating);
        assert_eq!(
            h.events(),
            vec![EventKind::Created, EventKind::MatchingStarted]
        );
    }

    #[test]
    fn candidates_preview_leaves_attempt_alone() {
        let h = harness(Config::default());
        let offered = h.driver_at(0.5);
        let idle = h.driver_at(1.0);
        let request = h.request(Uuid::new_v4());

        let candidates = block_on(h.engine.find_candidates(request.id)).unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].driver_id, idle);
        assert_eq!(h.status(offered), DriverStatus::Offered { request_id: request.id });
        assert_eq!(
            block_on(h.engine.find_driver(idle)).unwrap().status,
            DriverStatus::Idle
        );
        assert_eq!(
            block_on(h.engine.matching_attempt(request.id))
                .unwrap()
                .offered
                .len(),
            1
        );
    }
}
