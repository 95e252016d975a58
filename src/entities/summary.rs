use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Negotiation, OfferStatus, Party};

/// Counts over every offer chain of one request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BargainSummary {
    pub request_id: Uuid,
    pub negotiations: usize,
    pub total_offers: usize,
    pub pending: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub expired: usize,
    pub countered: usize,
    pub rider_offers: usize,
    pub driver_offers: usize,
    /// Largest number of offers one party made in any single chain.
    pub rounds: usize,
    pub initial_price: f64,
    pub agreed_price: Option<f64>,
}

impl BargainSummary {
    pub fn new(
        request_id: Uuid,
        initial_price: f64,
        agreed_price: Option<f64>,
        negotiations: &[Negotiation],
    ) -> Self {
        let mut summary = Self {
            request_id,
            negotiations: negotiations.len(),
            initial_price,
            agreed_price,
            ..Default::default()
        };

        for negotiation in negotiations {
            let (mut rider, mut driver) = (0, 0);

            for view in negotiation.history() {
                summary.total_offers += 1;

                match view.status {
                    OfferStatus::Pending => summary.pending += 1,
                    OfferStatus::Accepted => summary.accepted += 1,
                    OfferStatus::Rejected => summary.rejected += 1,
                    OfferStatus::Expired => summary.expired += 1,
                    OfferStatus::Countered => summary.countered += 1,
                }

                match view.offer.proposer {
                    Party::Rider => rider += 1,
                    Party::Driver => driver += 1,
                }
            }

            summary.rider_offers += rider;
            summary.driver_offers += driver;
            summary.rounds = summary.rounds.max(rider.max(driver));
        }

        summary
    }
}

#[test]
fn counts_offers_per_status_and_party() {
    use chrono::{Duration, Utc};

    let (request_id, rider_id) = (Uuid::new_v4(), Uuid::new_v4());
    let now = Utc::now();
    let window = Duration::seconds(45);

    let mut declined = Negotiation::new(request_id, rider_id, Uuid::new_v4(), 1);
    declined.propose(Party::Rider, 1500.0, None, now, window, 8).unwrap();
    let offer_id = declined.offers[0].id;
    declined.decline(offer_id, now).unwrap();

    let mut accepted = Negotiation::new(request_id, rider_id, Uuid::new_v4(), 1);
    accepted.propose(Party::Rider, 1500.0, None, now, window, 8).unwrap();
    accepted.propose(Party::Driver, 1800.0, None, now, window, 8).unwrap();
    let offer_id = accepted.offers[1].id;
    accepted.accept(offer_id, now).unwrap();

    let summary = BargainSummary::new(request_id, 1500.0, Some(1800.0), &[declined, accepted]);

    assert_eq!(summary.negotiations, 2);
    assert_eq!(summary.total_offers, 3);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.accepted, 1);
    assert_eq!(summary.countered, 1);
    assert_eq!(summary.rider_offers, 2);
    assert_eq!(summary.driver_offers, 1);
    assert_eq!(summary.rounds, 1);
    assert_eq!(summary.agreed_price, Some(1800.0));
}
