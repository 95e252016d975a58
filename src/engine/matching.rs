use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Engine, NearbyDriver, Ride};
use crate::{
    config::{OfferPolicy, RankingWeights},
    entities::{
        Candidate, DriverStatus, EventKind, MatchingAttempt, Negotiation, Outcome, Party,
        Proposal, RideEvent, RideRequest, ScoreBreakdown,
    },
    error::{invalid_input_error, Error},
    geo,
};

const QUERY_LIMIT: usize = 64;
const MAX_ADVANCE_STEPS: usize = 16;

pub(crate) fn score(
    driver: &NearbyDriver,
    declined_recently: bool,
    max_radius_km: f64,
    weights: &RankingWeights,
) -> ScoreBreakdown {
    let distance = (1.0 - driver.distance_km / max_radius_km).clamp(0.0, 1.0);
    let availability = if declined_recently { 0.0 } else { 1.0 };
    // ratings are on a 1-5 scale, unrated drivers sit in the middle
    let rating = driver
        .rating
        .map(|rating| ((rating - 1.0) / 4.0).clamp(0.0, 1.0))
        .unwrap_or(0.5);

    ScoreBreakdown {
        distance,
        availability,
        rating,
        total: weights.distance * distance
            + weights.availability * availability
            + weights.rating * rating,
    }
}

/// Best `limit` drivers by total score, then distance, then id.
pub(crate) fn rank(
    drivers: Vec<NearbyDriver>,
    declines: &HashMap<Uuid, DateTime<Utc>>,
    max_radius_km: f64,
    weights: &RankingWeights,
    limit: usize,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = drivers
        .into_iter()
        .map(|driver| Candidate {
            score: score(
                &driver,
                declines.contains_key(&driver.driver_id),
                max_radius_km,
                weights,
            ),
            driver_id: driver.driver_id,
            position: driver.position,
            distance_km: driver.distance_km,
            eta_minutes: geo::eta_minutes(driver.distance_km),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .total
            .total_cmp(&a.score.total)
            .then_with(|| a.distance_km.total_cmp(&b.distance_km))
            .then_with(|| a.driver_id.cmp(&b.driver_id))
    });
    candidates.truncate(limit);

    candidates
}

impl Engine {
    /// Expanding-ring search from the attempt's current radius, skipping drivers
    /// already offered this request. Widens the attempt in place.
    pub(crate) async fn search(
        &self,
        request: &RideRequest,
        attempt: &mut MatchingAttempt,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let excluded = attempt.excluded();

        loop {
            let found = self
                .drivers
                .query_nearby_excluding(
                    request.pickup,
                    attempt.radius_km,
                    request.vehicle_class,
                    QUERY_LIMIT,
                    &excluded,
                    now,
                )
                .await;

            let can_expand = attempt.expansions < self.config.max_expansions
                && attempt.radius_km < self.config.max_radius_km;

            if found.len() >= self.config.min_candidates || !can_expand {
                let declines = self.recently_declined(now).await;

                return rank(
                    found,
                    &declines,
                    self.config.max_radius_km,
                    &self.config.weights,
                    self.config.candidates_per_round,
                );
            }

            attempt.radius_km =
                (attempt.radius_km * self.config.expansion_factor).min(self.config.max_radius_km);
            attempt.expansions += 1;

            tracing::info!(
                "found {} drivers for {}, expanding to {} km",
                found.len(),
                request.id,
                attempt.radius_km
            );
        }
    }

    /// Moves a request forward until it has a live negotiation or is terminal.
    pub(crate) async fn advance(&self, ride: &mut Ride, now: DateTime<Utc>) -> Result<(), Error> {
        for _ in 0..MAX_ADVANCE_STEPS {
            if ride.request.is_terminal() || ride.live_negotiations().next().is_some() {
                return Ok(());
            }

            if self.offer_queued(ride, now).await > 0 {
                return ride.request.start_negotiating(now);
            }

            ride.request.start_matching(now)?;
            self.emit(
                RideEvent::new(
                    EventKind::MatchingStarted,
                    ride.request.id,
                    ride.request.rider_id,
                )
                .notify(ride.request.rider_id),
            );

            let candidates = self.search(&ride.request, &mut ride.attempt, now).await;

            if candidates.is_empty() {
                tracing::info!("no drivers left for {}", ride.request.id);
                return self.expire(ride, now).await;
            }

            ride.attempt.start_round(candidates);
        }

        // drivers kept slipping away between ranking and offering, the sweep retries
        tracing::warn!("request {} still matching", ride.request.id);
        Ok(())
    }

    /// Opens negotiations from the round's queue, one or all depending on policy.
    async fn offer_queued(&self, ride: &mut Ride, now: DateTime<Utc>) -> usize {
        let mut opened = 0;

        while let Some(candidate) = ride.attempt.next_candidate() {
            match self.open_negotiation(ride, &candidate, now).await {
                Ok(()) => {
                    opened += 1;

                    if self.config.offer_policy == OfferPolicy::Sequential {
                        break;
                    }
                }
                Err(err) => {
                    tracing::info!("skipping candidate {}: {}", candidate.driver_id, err);
                }
            }
        }

        opened
    }

    async fn open_negotiation(
        &self,
        ride: &mut Ride,
        candidate: &Candidate,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        let (request_id, rider_id) = (ride.request.id, ride.request.rider_id);
        let driver_id = candidate.driver_id;

        self.drivers
            .set_status(driver_id, DriverStatus::Offered { request_id })
            .await?;

        let mut negotiation = Negotiation::new(request_id, rider_id, driver_id, ride.attempt.round);
        let offer = match negotiation.propose(
            Party::Rider,
            ride.request.initial_price,
            None,
            now,
            self.config.offer_deadline,
            self.config.max_chain_length,
        ) {
            Ok(Proposal::Offered(offer)) => offer,
            Ok(Proposal::ChainExhausted) => {
                self.release_driver(driver_id, request_id).await;
                return Err(invalid_input_error());
            }
            Err(err) => {
                self.release_driver(driver_id, request_id).await;
                return Err(err);
            }
        };

        ride.attempt.record_offer(candidate, now);
        ride.negotiations.push(negotiation);
        self.index_offer(offer.id, request_id).await;

        self.emit(
            RideEvent::new(EventKind::OfferSent, request_id, rider_id)
                .driver(driver_id)
                .offer(offer.id, offer.price)
                .notify(driver_id),
        );

        Ok(())
    }

    pub(crate) async fn release_driver(&self, driver_id: Uuid, request_id: Uuid) {
        if let Err(err) = self
            .drivers
            .with_driver(driver_id, |driver| driver.release(request_id))
            .await
        {
            tracing::info!("driver {} not released from {}: {}", driver_id, request_id, err);
        }
    }

    /// Bookkeeping once the negotiation at `index` ended without an assignment.
    pub(crate) async fn negotiation_closed(
        &self,
        ride: &mut Ride,
        index: usize,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) {
        let (request_id, rider_id) = (ride.request.id, ride.request.rider_id);
        let negotiation = &ride.negotiations[index];
        let driver_id = negotiation.driver_id;

        let kind = match outcome {
            Outcome::TimedOut => EventKind::OfferTimedOut,
            Outcome::Superseded => EventKind::OfferSuperseded,
            _ => EventKind::OfferDeclined,
        };

        let mut event = RideEvent::new(kind, request_id, rider_id)
            .driver(driver_id)
            .notify(driver_id);
        if outcome != Outcome::Superseded {
            event = event.notify(rider_id);
        }
        if let Some(offer) = negotiation.latest_offer() {
            event = event.offer(offer.id, offer.price);
        }

        ride.attempt.set_outcome(driver_id, outcome);
        self.release_driver(driver_id, request_id).await;
        self.emit(event);

        tracing::debug!("negotiation {} closed at {}", negotiation.id, now);
    }

    /// Times out the negotiation at `index` if its pending offer is past its deadline.
    pub(crate) async fn time_out_negotiation(
        &self,
        ride: &mut Ride,
        index: usize,
        now: DateTime<Utc>,
    ) -> bool {
        let responder = ride.negotiations[index]
            .pending_offer()
            .map(|offer| offer.responder());

        if !ride.negotiations[index].time_out(now) {
            return false;
        }

        if responder == Some(Party::Driver) {
            self.record_decline(ride.negotiations[index].driver_id, now)
                .await;
        }

        self.negotiation_closed(ride, index, Outcome::TimedOut, now)
            .await;
        true
    }

    /// Supersedes every live negotiation of the request.
    pub(crate) async fn supersede_all(&self, ride: &mut Ride, now: DateTime<Utc>) -> Result<(), Error> {
        for index in 0..ride.negotiations.len() {
            if ride.negotiations[index].is_live() {
                ride.negotiations[index].supersede(now)?;
                self.negotiation_closed(ride, index, Outcome::Superseded, now)
                    .await;
            }
        }

        ride.attempt.release();
        Ok(())
    }

    pub(crate) async fn expire(&self, ride: &mut Ride, now: DateTime<Utc>) -> Result<(), Error> {
        ride.request.expire(now)?;
        self.supersede_all(ride, now).await?;
        self.release_rider(ride.request.rider_id, ride.request.id)
            .await;

        self.emit(
            RideEvent::new(
                EventKind::RequestExpired,
                ride.request.id,
                ride.request.rider_id,
            )
            .price(ride.request.initial_price)
            .notify(ride.request.rider_id),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Coordinates;

    fn nearby(distance_km: f64, rating: Option<f64>) -> NearbyDriver {
        NearbyDriver {
            driver_id: Uuid::new_v4(),
            position: Coordinates::new(6.5, 3.4),
            distance_km,
            rating,
        }
    }

    #[test]
    fn closer_drivers_rank_first() {
        let weights = RankingWeights::default();
        let drivers = vec![nearby(2.0, None), nearby(0.5, None), nearby(1.0, None)];

        let ranked = rank(drivers, &HashMap::new(), 15.0, &weights, 3);
        let distances: Vec<f64> = ranked.iter().map(|c| c.distance_km).collect();

        assert_eq!(distances, vec![0.5, 1.0, 2.0]);
        assert_eq!(ranked[0].eta_minutes, 5);
    }

    #[test]
    fn recent_decliners_rank_lower() {
        let weights = RankingWeights::default();
        let decliner = nearby(0.5, None);
        let other = nearby(2.0, None);

        let mut declines = HashMap::new();
        declines.insert(decliner.driver_id, Utc::now());

        let ranked = rank(vec![decliner.clone(), other.clone()], &declines, 15.0, &weights, 1);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].driver_id, other.driver_id);
    }

    #[test]
    fn score_breakdown_adds_up() {
        let weights = RankingWeights::default();
        let score = score(&nearby(7.5, Some(5.0)), false, 15.0, &weights);

        assert_eq!(score.distance, 0.5);
        assert_eq!(score.availability, 1.0);
        assert_eq!(score.rating, 1.0);
        assert!((score.total - (0.6 * 0.5 + 0.25 + 0.15)).abs() < 1e-9);
    }
}
