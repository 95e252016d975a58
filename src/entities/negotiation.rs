use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{BargainOffer, OfferStatus, OfferView, Party};
use crate::error::{invalid_input_error, invalid_transition_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Opened,
    PendingResponse,
    Accepted,
    Declined,
    TimedOut,
    Superseded,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Opened | Self::PendingResponse)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    Accept,
    Reject,
    Counter,
}

/// Result of appending to a chain.
#[derive(Clone, Debug, PartialEq)]
pub enum Proposal {
    Offered(BargainOffer),
    /// The chain was full, the negotiation ended `DECLINED`.
    ChainExhausted,
}

/// Bargaining between the rider of one request and one candidate driver.
///
/// The chain is append-only, offer statuses are derived from the chain position
/// and the negotiation state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Negotiation {
    pub id: Uuid,
    pub request_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Uuid,
    pub round: u32,
    pub state: State,
    pub offers: Vec<BargainOffer>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Negotiation {
    pub fn new(request_id: Uuid, rider_id: Uuid, driver_id: Uuid, round: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            rider_id,
            driver_id,
            round,
            state: State::Opened,
            offers: vec![],
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    pub fn latest_offer(&self) -> Option<&BargainOffer> {
        self.offers.last()
    }

    pub fn pending_offer(&self) -> Option<&BargainOffer> {
        match self.state {
            State::PendingResponse => self.offers.last(),
            _ => None,
        }
    }

    pub fn has_offer(&self, offer_id: Uuid) -> bool {
        self.offers.iter().any(|offer| offer.id == offer_id)
    }

    /// `None` while opened (either party may open) or once terminal.
    pub fn expected_proposer(&self) -> Option<Party> {
        self.pending_offer().map(|offer| offer.responder())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.pending_offer()
            .map(|offer| offer.deadline <= now)
            .unwrap_or(false)
    }

    /// Appends the next offer. The proposer must not be the author of the pending offer.
    pub fn propose(
        &mut self,
        proposer: Party,
        price: f64,
        message: Option<String>,
        now: DateTime<Utc>,
        response_window: Duration,
        max_chain_length: usize,
    ) -> Result<Proposal, Error> {
        if self.is_terminal() {
            return Err(invalid_transition_error(self.state, State::PendingResponse));
        }

        if let Some(pending) = self.pending_offer() {
            if pending.proposer == proposer {
                return Err(invalid_transition_error(
                    (self.state, proposer),
                    State::PendingResponse,
                ));
            }
        }

        if !price.is_finite() || price <= 0.0 {
            return Err(invalid_input_error());
        }

        if self.offers.len() >= max_chain_length {
            self.close(State::Declined, now);
            return Ok(Proposal::ChainExhausted);
        }

        let offer = BargainOffer::new(
            self.request_id,
            self.driver_id,
            self.offers.len() as u32 + 1,
            proposer,
            price,
            message,
            now,
            now + response_window,
        );

        self.offers.push(offer.clone());
        self.state = State::PendingResponse;

        Ok(Proposal::Offered(offer))
    }

    pub fn accept(&mut self, offer_id: Uuid, now: DateTime<Utc>) -> Result<BargainOffer, Error> {
        let offer = self.ensure_pending(offer_id, State::Accepted)?.clone();
        self.close(State::Accepted, now);

        Ok(offer)
    }

    pub fn decline(&mut self, offer_id: Uuid, now: DateTime<Utc>) -> Result<BargainOffer, Error> {
        let offer = self.ensure_pending(offer_id, State::Declined)?.clone();
        self.close(State::Declined, now);

        Ok(offer)
    }

    /// Answers the pending offer with a new one from the responder.
    pub fn counter(
        &mut self,
        offer_id: Uuid,
        price: f64,
        message: Option<String>,
        now: DateTime<Utc>,
        response_window: Duration,
        max_chain_length: usize,
    ) -> Result<Proposal, Error> {
        let responder = self.ensure_pending(offer_id, State::PendingResponse)?.responder();

        self.propose(
            responder,
            price,
            message,
            now,
            response_window,
            max_chain_length,
        )
    }

    /// Applies the deadline of the pending offer. Returns whether the state changed.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_expired(now) {
            return false;
        }

        self.close(State::TimedOut, now);
        true
    }

    /// Ends a live negotiation early, e.g. when the driver went offline.
    pub fn force_decline(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.is_terminal() {
            return Err(invalid_transition_error(self.state, State::Declined));
        }

        self.close(State::Declined, now);
        Ok(())
    }

    pub fn supersede(&mut self, now: DateTime<Utc>) -> Result<(), Error> {
        if self.is_terminal() {
            return Err(invalid_transition_error(self.state, State::Superseded));
        }

        self.close(State::Superseded, now);
        Ok(())
    }

    pub fn offer_status(&self, offer: &BargainOffer) -> OfferStatus {
        let is_latest = self
            .latest_offer()
            .map(|latest| latest.id == offer.id)
            .unwrap_or(false);

        if !is_latest {
            return OfferStatus::Countered;
        }

        match self.state {
            State::Opened | State::PendingResponse => OfferStatus::Pending,
            State::Accepted => OfferStatus::Accepted,
            State::Declined => OfferStatus::Rejected,
            State::TimedOut | State::Superseded => OfferStatus::Expired,
        }
    }

    pub fn history(&self) -> Vec<OfferView> {
        self.offers
            .iter()
            .map(|offer| OfferView {
                offer: offer.clone(),
                status: self.offer_status(offer),
            })
            .collect()
    }

    fn ensure_pending(&self, offer_id: Uuid, target: State) -> Result<&BargainOffer, Error> {
        match self.pending_offer() {
            Some(offer) if offer.id == offer_id => Ok(offer),
            _ => Err(invalid_transition_error(self.state, target)),
        }
    }

    fn close(&mut self, state: State, now: DateTime<Utc>) {
        self.state = state;
        self.closed_at = Some(now);
    }
}

#[cfg(test)]
fn propose(negotiation: &mut Negotiation, proposer: Party, price: f64) -> Result<Proposal, Error> {
    negotiation.propose(proposer, price, None, Utc::now(), Duration::seconds(45), 8)
}

#[cfg(test)]
fn offered(proposal: Proposal) -> BargainOffer {
    match proposal {
        Proposal::Offered(offer) => offer,
        Proposal::ChainExhausted => panic!("chain exhausted"),
    }
}

#[test]
fn strict_alternation() {
    let mut negotiation = Negotiation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1);

    let first = offered(propose(&mut negotiation, Party::Rider, 1500.0).unwrap());
    assert_eq!(first.sequence, 1);
    assert_eq!(negotiation.expected_proposer(), Some(Party::Driver));

    let err = propose(&mut negotiation, Party::Rider, 1600.0).unwrap_err();
    assert!(err.is_invalid_transition());
    assert_eq!(negotiation.offers.len(), 1);

    let second = offered(propose(&mut negotiation, Party::Driver, 1800.0).unwrap());
    assert_eq!(second.sequence, 2);
    assert_eq!(negotiation.offer_status(&first), OfferStatus::Countered);
    assert_eq!(negotiation.offer_status(&second), OfferStatus::Pending);
}

#[test]
fn counter_then_accept() {
    let mut negotiation = Negotiation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1);
    let now = Utc::now();

    let first = offered(propose(&mut negotiation, Party::Rider, 1500.0).unwrap());
    let second = offered(
        negotiation
            .counter(first.id, 1800.0, None, now, Duration::seconds(45), 8)
            .unwrap(),
    );
    assert_eq!(second.proposer, Party::Driver);

    // the countered offer can no longer be answered
    assert!(negotiation.accept(first.id, now).is_err());

    let accepted = negotiation.accept(second.id, now).unwrap();
    assert_eq!(accepted.price, 1800.0);
    assert_eq!(negotiation.state, State::Accepted);

    let statuses: Vec<OfferStatus> = negotiation.history().iter().map(|v| v.status).collect();
    assert_eq!(statuses, vec![OfferStatus::Countered, OfferStatus::Accepted]);

    assert!(propose(&mut negotiation, Party::Rider, 1700.0).is_err());
    assert!(negotiation.supersede(now).is_err());
}

#[test]
fn chain_cap_forces_decline() {
    let mut negotiation = Negotiation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1);
    let now = Utc::now();
    let mut party = Party::Rider;

    for _ in 0..4 {
        negotiation
            .propose(party, 1000.0, None, now, Duration::seconds(45), 4)
            .unwrap();
        party = party.opposite();
    }

    let proposal = negotiation
        .propose(party, 1000.0, None, now, Duration::seconds(45), 4)
        .unwrap();

    assert_eq!(proposal, Proposal::ChainExhausted);
    assert_eq!(negotiation.state, State::Declined);
    assert_eq!(negotiation.offers.len(), 4);
}

#[test]
fn deadline_times_out() {
    let mut negotiation = Negotiation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1);
    let now = Utc::now();

    let offer = offered(
        negotiation
            .propose(Party::Rider, 900.0, None, now, Duration::seconds(30), 8)
            .unwrap(),
    );

    assert!(!negotiation.time_out(now + Duration::seconds(29)));
    assert!(negotiation.time_out(now + Duration::seconds(30)));
    assert_eq!(negotiation.state, State::TimedOut);
    assert_eq!(negotiation.offer_status(&offer), OfferStatus::Expired);
    assert!(negotiation.decline(offer.id, now).is_err());
}

#[test]
fn rejects_non_positive_price() {
    let mut negotiation = Negotiation::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), 1);

    assert_eq!(
        propose(&mut negotiation, Party::Rider, 0.0).unwrap_err().code,
        101
    );
    assert_eq!(negotiation.state, State::Opened);
}
