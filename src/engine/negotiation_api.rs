use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Engine, Ride};
use crate::{
    api::NegotiationAPI,
    entities::{
        EventKind, Negotiation, NegotiationState, OfferView, Outcome, Party, Proposal,
        ResponseAction, RideEvent,
    },
    error::{
        invalid_input_error, invalid_transition_error, negotiation_timeout_error,
        not_found_error, preauthorization_failed_error, Error,
    },
    external::Preauthorization,
};

#[async_trait]
impl NegotiationAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn propose(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
        proposer: Party,
        price: f64,
        message: Option<String>,
    ) -> Result<Negotiation, Error> {
        let ride = self.ride(request_id).await?;
        let mut ride = ride.lock().await;
        let ride = &mut *ride;
        let now = Utc::now();

        let index = ride
            .negotiations
            .iter()
            .rposition(|n| n.driver_id == driver_id)
            .ok_or_else(not_found_error)?;

        if self.time_out_negotiation(ride, index, now).await {
            self.advance(ride, now).await?;
            return Err(negotiation_timeout_error());
        }

        ride.request.validate_price(
            price,
            self.config.min_offer_ratio,
            self.config.max_offer_ratio,
        )?;

        let proposal = ride.negotiations[index].propose(
            proposer,
            price,
            message,
            now,
            self.config.offer_deadline,
            self.config.max_chain_length,
        )?;
        self.proposed(ride, index, proposal, now).await?;

        Ok(ride.negotiations[index].clone())
    }

    #[tracing::instrument(skip(self))]
    async fn respond(
        &self,
        offer_id: Uuid,
        action: ResponseAction,
        counter_price: Option<f64>,
        message: Option<String>,
    ) -> Result<Negotiation, Error> {
        let ride = self.ride_for_offer(offer_id).await?;
        let mut ride = ride.lock().await;
        let ride = &mut *ride;
        let now = Utc::now();

        let index = ride
            .negotiations
            .iter()
            .position(|n| n.has_offer(offer_id))
            .ok_or_else(not_found_error)?;

        if self.time_out_negotiation(ride, index, now).await {
            self.advance(ride, now).await?;
            return Err(negotiation_timeout_error());
        }

        match action {
            ResponseAction::Accept => self.accept(ride, index, offer_id, now).await?,
            ResponseAction::Reject => {
                let offer = ride.negotiations[index].decline(offer_id, now)?;

                if offer.responder() == Party::Driver {
                    self.record_decline(offer.driver_id, now).await;
                }

                self.negotiation_closed(ride, index, Outcome::Declined, now)
                    .await;
                self.advance(ride, now).await?;
            }
            ResponseAction::Counter => {
                let price = counter_price.ok_or_else(invalid_input_error)?;
                ride.request.validate_price(
                    price,
                    self.config.min_offer_ratio,
                    self.config.max_offer_ratio,
                )?;

                let proposal = ride.negotiations[index].counter(
                    offer_id,
                    price,
                    message,
                    now,
                    self.config.offer_deadline,
                    self.config.max_chain_length,
                )?;
                self.proposed(ride, index, proposal, now).await?;
            }
        }

        Ok(ride.negotiations[index].clone())
    }

    #[tracing::instrument(skip(self))]
    async fn find_offer(&self, offer_id: Uuid) -> Result<OfferView, Error> {
        let ride = self.ride_for_offer(offer_id).await?;
        let ride = ride.lock().await;

        let view = ride
            .negotiations
            .iter()
            .flat_map(|negotiation| negotiation.history())
            .find(|view| view.offer.id == offer_id);

        view.ok_or_else(not_found_error)
    }
}

impl Engine {
    async fn proposed(
        &self,
        ride: &mut Ride,
        index: usize,
        proposal: Proposal,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        match proposal {
            Proposal::Offered(offer) => {
                let recipient = offer.responder_id(ride.request.rider_id);

                self.index_offer(offer.id, ride.request.id).await;
                self.emit(
                    RideEvent::new(
                        EventKind::OfferCountered,
                        ride.request.id,
                        ride.request.rider_id,
                    )
                    .driver(offer.driver_id)
                    .offer(offer.id, offer.price)
                    .notify(recipient),
                );

                Ok(())
            }
            Proposal::ChainExhausted => {
                tracing::info!(
                    "negotiation {} hit the chain limit",
                    ride.negotiations[index].id
                );

                self.negotiation_closed(ride, index, Outcome::Declined, now)
                    .await;
                self.advance(ride, now).await
            }
        }
    }

    /// Commits an acceptance. Only the holder of the ride lock gets here, so at
    /// most one negotiation of a request is ever accepted.
    async fn accept(
        &self,
        ride: &mut Ride,
        index: usize,
        offer_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let negotiation = &ride.negotiations[index];
        let offer = negotiation
            .pending_offer()
            .filter(|offer| offer.id == offer_id)
            .cloned()
            .ok_or_else(|| invalid_transition_error(negotiation.state, NegotiationState::Accepted))?;

        let (request_id, rider_id) = (ride.request.id, ride.request.rider_id);
        let driver_id = negotiation.driver_id;

        // the driver is held while the wallet answers
        let preauthorized = self
            .drivers
            .assign_when(driver_id, request_id, async {
                match self.wallet.preauthorize(rider_id, offer.price).await {
                    Ok(Preauthorization::Ok) => true,
                    refused => {
                        tracing::warn!(
                            "preauthorization of {} for {} failed: {:?}",
                            offer.price,
                            request_id,
                            refused
                        );
                        false
                    }
                }
            })
            .await;

        match preauthorized {
            Ok(true) => {}
            Ok(false) => {
                self.abandon(ride, index, now).await?;
                return Err(preauthorization_failed_error());
            }
            Err(err) => {
                tracing::warn!("driver {} could not be assigned: {}", driver_id, err);

                self.abandon(ride, index, now).await?;
                return Err(invalid_transition_error(
                    NegotiationState::Declined,
                    NegotiationState::Accepted,
                ));
            }
        }

        ride.negotiations[index].accept(offer_id, now)?;
        ride.request.assign(driver_id, offer.price, now)?;
        ride.attempt.set_outcome(driver_id, Outcome::Accepted);
        self.supersede_all(ride, now).await?;
        self.release_rider(rider_id, request_id).await;

        self.emit(
            RideEvent::new(EventKind::OfferAccepted, request_id, rider_id)
                .driver(driver_id)
                .offer(offer.id, offer.price)
                .notify(offer.proposer_id(rider_id)),
        );
        self.emit(
            RideEvent::new(EventKind::RequestAssigned, request_id, rider_id)
                .driver(driver_id)
                .price(offer.price)
                .notify(rider_id)
                .notify(driver_id),
        );

        Ok(())
    }

    /// Declines the negotiation and returns the request to matching without the driver.
    async fn abandon(&self, ride: &mut Ride, index: usize, now: DateTime<Utc>) -> Result<(), Error> {
        ride.negotiations[index].force_decline(now)?;
        self.negotiation_closed(ride, index, Outcome::Declined, now)
            .await;

        if ride.live_negotiations().next().is_none() {
            ride.request.start_matching(now)?;
        }

        self.advance(ride, now).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use tokio::sync::{Mutex, OnceCell};
    use tokio::task::JoinHandle;
    use tokio_test::block_on;
    use uuid::Uuid;

    use crate::api::{DriverAvailabilityAPI, NegotiationAPI, RideRequestAPI};
    use crate::config::{Config, OfferPolicy};
    use crate::engine::testing::{destination, harness, lagos, pickup};
    use crate::engine::Engine;
    use crate::entities::{
        Coordinates, DriverStatus, EventKind, NegotiationState, OfferStatus, Outcome, Party,
        ResponseAction, RideStatus, VehicleClass,
    };
    use crate::error::{Error, NEGOTIATION_TIMEOUT, NO_DRIVERS_AVAILABLE, PREAUTHORIZATION_FAILED};
    use crate::external::memory::StaticProfiles;
    use crate::external::{Preauthorization, Wallet};

    #[test]
    fn counter_then_accept_assigns_at_agreed_price() {
        let h = harness(Config::default());
        let nearest = h.driver_at(0.5);
        let second = h.driver_at(1.2);
        let third = h.driver_at(2.0);
        let rider_id = Uuid::new_v4();

        let request = h.request(rider_id);
        assert_eq!(request.status, RideStatus::Negotiating);
        assert_eq!(h.status(nearest), DriverStatus::Offered { request_id: request.id });
        assert_eq!(h.status(second), DriverStatus::Idle);

        let offer = h.pending_offer(request.id, nearest);
        assert_eq!(offer.price, 1500.0);
        assert_eq!(offer.proposer, Party::Rider);

        let negotiation = block_on(h.engine.respond(
            offer.id,
            ResponseAction::Counter,
            Some(1800.0),
            Some("heavy traffic".into()),
        ))
        .unwrap();
        let counter = negotiation.pending_offer().unwrap().clone();
        assert_eq!(counter.proposer, Party::Driver);
        assert_eq!(counter.sequence, 2);

        let negotiation =
            block_on(h.engine.respond(counter.id, ResponseAction::Accept, None, None)).unwrap();
        assert_eq!(negotiation.state, NegotiationState::Accepted);

        let request = block_on(h.engine.find_request(request.id)).unwrap();
        assert_eq!(
            request.status,
            RideStatus::Assigned {
                driver_id: nearest,
                price: 1800.0
            }
        );
        assert_eq!(h.status(nearest), DriverStatus::Assigned { request_id: request.id });
        assert_eq!(h.status(second), DriverStatus::Idle);
        assert_eq!(h.status(third), DriverStatus::Idle);
        assert_eq!(block_on(h.wallet.call_count()), 1);

        let first = block_on(h.engine.find_offer(offer.id)).unwrap();
        assert_eq!(first.status, OfferStatus::Countered);

        let summary = block_on(h.engine.bargain_summary(request.id)).unwrap();
        assert_eq!(summary.total_offers, 2);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.agreed_price, Some(1800.0));

        let events = h.events();
        assert_eq!(events.first(), Some(&EventKind::Created));
        assert!(events.contains(&EventKind::OfferCountered));
        assert_eq!(events.last(), Some(&EventKind::RequestAssigned));

        // an assigned request no longer blocks the rider
        assert!(block_on(h.engine.create_request(
            rider_id,
            request.pickup,
            request.destination,
            request.vehicle_class,
            1500.0,
        ))
        .is_ok());
    }

    #[test]
    fn same_party_cannot_propose_twice() {
        let h = harness(Config::default());
        let driver_id = h.driver_at(1.0);
        let request = h.request(Uuid::new_v4());

        let err = block_on(h.engine.propose(request.id, driver_id, Party::Rider, 1600.0, None))
            .unwrap_err();
        assert!(err.is_invalid_transition());

        let negotiation =
            block_on(h.engine.propose(request.id, driver_id, Party::Driver, 1700.0, None))
                .unwrap();
        assert_eq!(negotiation.offers.len(), 2);

        // outside the price band
        let err = block_on(h.engine.propose(request.id, driver_id, Party::Rider, 5000.0, None))
            .unwrap_err();
        assert_eq!(err.code, 101);
        assert_eq!(h.negotiations(request.id)[0].offers.len(), 2);

        // counters need a price
        let pending = h.pending_offer(request.id, driver_id);
        let err = block_on(h.engine.respond(pending.id, ResponseAction::Counter, None, None))
            .unwrap_err();
        assert_eq!(err.code, 101);
    }

    #[test]
    fn chain_limit_declines_and_moves_on() {
        let config = Config {
            max_chain_length: 2,
            ..Config::default()
        };
        let h = harness(config);
        let first = h.driver_at(0.5);
        let second = h.driver_at(1.0);
        let request = h.request(Uuid::new_v4());

        block_on(h.engine.propose(request.id, first, Party::Driver, 1900.0, None)).unwrap();
        let negotiation =
            block_on(h.engine.propose(request.id, first, Party::Rider, 1700.0, None)).unwrap();

        assert_eq!(negotiation.state, NegotiationState::Declined);
        assert_eq!(negotiation.offers.len(), 2);
        assert_eq!(h.status(first), DriverStatus::Idle);
        assert_eq!(h.status(second), DriverStatus::Offered { request_id: request.id });
    }

    #[test]
    fn failed_preauthorization_moves_to_next_driver() {
        let h = harness(Config::default());
        let first = h.driver_at(0.5);
        let second = h.driver_at(1.0);
        let rider_id = Uuid::new_v4();
        block_on(h.wallet.set_balance(rider_id, 1000.0));

        let request = h.request(rider_id);
        let offer = h.pending_offer(request.id, first);

        let err = block_on(h.engine.respond(offer.id, ResponseAction::Accept, None, None))
            .unwrap_err();

        assert_eq!(err.code, PREAUTHORIZATION_FAILED);
        assert_eq!(h.status(first), DriverStatus::Idle);
        assert_eq!(h.status(second), DriverStatus::Offered { request_id: request.id });
        assert_eq!(
            block_on(h.engine.find_request(request.id)).unwrap().status,
            RideStatus::Negotiating
        );

        let attempt = block_on(h.engine.matching_attempt(request.id)).unwrap();
        assert_eq!(attempt.outcome_of(first), Some(Outcome::Declined));
        assert_eq!(attempt.outcome_of(second), Some(Outcome::Pending));
    }

    #[test]
    fn late_response_times_out() {
        let config = Config {
            offer_deadline: Duration::zero(),
            ..Config::default()
        };
        let h = harness(config);
        let first = h.driver_at(0.5);
        let second = h.driver_at(1.0);
        let request = h.request(Uuid::new_v4());
        let offer = h.pending_offer(request.id, first);

        let err = block_on(h.engine.respond(offer.id, ResponseAction::Accept, None, None))
            .unwrap_err();

        assert_eq!(err.code, NEGOTIATION_TIMEOUT);
        assert_eq!(h.negotiations(request.id)[0].state, NegotiationState::TimedOut);
        assert_eq!(h.status(first), DriverStatus::Idle);
        assert_eq!(h.status(second), DriverStatus::Offered { request_id: request.id });
        assert_eq!(block_on(h.wallet.call_count()), 0);
    }

    #[test]
    fn only_one_concurrent_acceptance_wins() {
        let config = Config {
            offer_policy: OfferPolicy::Simultaneous,
            ..Config::default()
        };
        let h = harness(config);
        let drivers: Vec<Uuid> = [0.5, 1.0, 1.5].iter().map(|km| h.driver_at(*km)).collect();
        let request = h.request(Uuid::new_v4());

        let offers: Vec<Uuid> = drivers
            .iter()
            .map(|driver_id| h.pending_offer(request.id, *driver_id).id)
            .collect();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let results = runtime.block_on(async {
            let handles: Vec<_> = offers
                .into_iter()
                .map(|offer_id| {
                    let engine = h.engine.clone();
                    tokio::spawn(async move {
                        engine
                            .respond(offer_id, ResponseAction::Accept, None, None)
                            .await
                    })
                })
                .collect();

            futures::future::join_all(handles).await
        });

        let accepted = results
            .iter()
            .filter(|result| matches!(result, Ok(Ok(_))))
            .count();
        assert_eq!(accepted, 1);

        let negotiations = h.negotiations(request.id);
        let states: Vec<NegotiationState> = negotiations.iter().map(|n| n.state).collect();
        assert_eq!(
            states.iter().filter(|s| **s == NegotiationState::Accepted).count(),
            1
        );
        assert_eq!(
            states.iter().filter(|s| **s == NegotiationState::Superseded).count(),
            2
        );

        let winner = negotiations
            .iter()
            .find(|n| n.state == NegotiationState::Accepted)
            .unwrap()
            .driver_id;
        for driver_id in drivers {
            let expected = if driver_id == winner {
                DriverStatus::Assigned { request_id: request.id }
            } else {
                DriverStatus::Idle
            };
            assert_eq!(h.status(driver_id), expected);
        }

        assert_eq!(block_on(h.wallet.call_count()), 1);
    }

    #[test]
    fn driver_is_offered_one_request_at_a_time() {
        let h = harness(Config::default());
        let driver_id = h.driver_at(1.0);

        let first = h.request(Uuid::new_v4());
        let err = block_on(h.engine.create_request(
            Uuid::new_v4(),
            first.pickup,
            first.destination,
            first.vehicle_class,
            1500.0,
        ))
        .unwrap_err();

        assert_eq!(err.code, NO_DRIVERS_AVAILABLE);
        assert_eq!(h.status(driver_id), DriverStatus::Offered { request_id: first.id });
    }

    /// Wallet that sends a driver offline while it is deciding.
    struct LeavingDriverWallet {
        engine: OnceCell<Arc<Engine>>,
        leaving: Mutex<Option<Uuid>>,
        went_offline: Mutex<Option<JoinHandle<Result<(), Error>>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Wallet for LeavingDriverWallet {
        async fn preauthorize(&self, _rider_id: Uuid, _amount: f64) -> Result<Preauthorization, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(driver_id) = self.leaving.lock().await.take() {
                let engine = self.engine.get().unwrap().clone();
                let handle = tokio::spawn(async move { engine.go_offline(driver_id).await });
                *self.went_offline.lock().await = Some(handle);

                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }

            Ok(Preauthorization::Ok)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn driver_leaving_during_preauthorization_waits_for_assignment() {
        let wallet = Arc::new(LeavingDriverWallet {
            engine: OnceCell::new(),
            leaving: Mutex::new(None),
            went_offline: Mutex::new(None),
            calls: AtomicUsize::new(0),
        });
        let engine = Arc::new(Engine::new(
            Config::default(),
            vec![lagos()],
            Arc::new(StaticProfiles::new(Some(VehicleClass::Sedan))),
            wallet.clone(),
        ));
        assert!(wallet.engine.set(engine.clone()).is_ok());

        let mut drivers = vec![];
        for km in [0.5, 1.0] {
            let driver_id = Uuid::new_v4();
            let position = Coordinates::new(pickup().lat + km / 111.195, pickup().lng);
            assert!(engine
                .update_driver_location(driver_id, position, Utc::now())
                .await
                .unwrap());
            drivers.push(driver_id);
        }
        let (first, second) = (drivers[0], drivers[1]);

        let request = engine
            .create_request(Uuid::new_v4(), pickup(), destination(), VehicleClass::Sedan, 1500.0)
            .await
            .unwrap();
        let offer = engine.negotiation_history(request.id).await.unwrap()[0]
            .pending_offer()
            .cloned()
            .unwrap();

        *wallet.leaving.lock().await = Some(first);
        let negotiation = engine
            .respond(offer.id, ResponseAction::Accept, None, None)
            .await
            .unwrap();
        assert_eq!(negotiation.state, NegotiationState::Accepted);

        // the driver is already committed once it gets to leave
        let handle = wallet.went_offline.lock().await.take().unwrap();
        assert!(handle.await.unwrap().unwrap_err().is_invalid_transition());

        assert_eq!(
            engine.find_request(request.id).await.unwrap().status,
            RideStatus::Assigned {
                driver_id: first,
                price: 1500.0
            }
        );
        assert_eq!(
            engine.find_driver(first).await.unwrap().status,
            DriverStatus::Assigned { request_id: request.id }
        );
        assert_eq!(engine.find_driver(second).await.unwrap().status, DriverStatus::Idle);
        assert_eq!(wallet.calls.load(Ordering::SeqCst), 1);
    }
}
