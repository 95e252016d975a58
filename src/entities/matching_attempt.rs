use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Coordinates;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Accepted,
    Declined,
    TimedOut,
    Superseded,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance: f64,
    pub availability: f64,
    pub rating: f64,
    pub total: f64,
}

/// A ranked driver for one request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub position: Coordinates,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub score: ScoreBreakdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferedCandidate {
    pub driver_id: Uuid,
    pub round: u32,
    pub order: usize,
    pub distance_km: f64,
    pub outcome: Outcome,
    pub offered_at: DateTime<Utc>,
}

/// Bookkeeping of one request's search: rounds, radius and who was already tried.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingAttempt {
    pub request_id: Uuid,
    pub round: u32,
    pub radius_km: f64,
    pub expansions: u32,
    pub offered: Vec<OfferedCandidate>,
    pub queue: VecDeque<Candidate>,
    pub started_at: DateTime<Utc>,
}

impl MatchingAttempt {
    pub fn new(request_id: Uuid, initial_radius_km: f64) -> Self {
        Self {
            request_id,
            round: 0,
            radius_km: initial_radius_km,
            expansions: 0,
            offered: vec![],
            queue: VecDeque::new(),
            started_at: Utc::now(),
        }
    }

    pub fn start_round(&mut self, candidates: Vec<Candidate>) {
        self.round += 1;
        self.queue = candidates.into();
    }

    pub fn next_candidate(&mut self) -> Option<Candidate> {
        self.queue.pop_front()
    }

    /// Drivers never to be offered again for this request.
    pub fn excluded(&self) -> HashSet<Uuid> {
        self.offered.iter().map(|offered| offered.driver_id).collect()
    }

    pub fn record_offer(&mut self, candidate: &Candidate, now: DateTime<Utc>) {
        let order = self.offered.len();

        self.offered.push(OfferedCandidate {
            driver_id: candidate.driver_id,
            round: self.round,
            order,
            distance_km: candidate.distance_km,
            outcome: Outcome::Pending,
            offered_at: now,
        });
    }

    pub fn set_outcome(&mut self, driver_id: Uuid, outcome: Outcome) {
        if let Some(offered) = self
            .offered
            .iter_mut()
            .rev()
            .find(|offered| offered.driver_id == driver_id)
        {
            offered.outcome = outcome;
        }
    }

    pub fn outcome_of(&self, driver_id: Uuid) -> Option<Outcome> {
        self.offered
            .iter()
            .rev()
            .find(|offered| offered.driver_id == driver_id)
            .map(|offered| offered.outcome)
    }

    /// Marks every still-pending candidate superseded and drops the queue.
    pub fn release(&mut self) {
        for offered in self.offered.iter_mut() {
            if offered.outcome == Outcome::Pending {
                offered.outcome = Outcome::Superseded;
            }
        }

        self.queue.clear();
    }
}

#[cfg(test)]
fn candidate(distance_km: f64) -> Candidate {
    Candidate {
        driver_id: Uuid::new_v4(),
        position: Coordinates::new(6.5, 3.4),
        distance_km,
        eta_minutes: 5,
        score: ScoreBreakdown {
            distance: 1.0,
            availability: 1.0,
            rating: 0.5,
            total: 0.9,
        },
    }
}

#[test]
fn tracks_offers_across_rounds() {
    let mut attempt = MatchingAttempt::new(Uuid::new_v4(), 3.0);
    let first = candidate(1.0);
    let second = candidate(2.0);

    attempt.start_round(vec![first.clone(), second.clone()]);
    assert_eq!(attempt.round, 1);

    let next = attempt.next_candidate().unwrap();
    attempt.record_offer(&next, Utc::now());
    attempt.set_outcome(next.driver_id, Outcome::Declined);

    assert!(attempt.excluded().contains(&first.driver_id));
    assert!(!attempt.excluded().contains(&second.driver_id));

    let next = attempt.next_candidate().unwrap();
    attempt.record_offer(&next, Utc::now());
    attempt.release();

    assert_eq!(attempt.outcome_of(first.driver_id), Some(Outcome::Declined));
    assert_eq!(attempt.outcome_of(second.driver_id), Some(Outcome::Superseded));
    assert!(attempt.queue.is_empty());
}
