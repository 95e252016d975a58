use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Rider,
    Driver,
}

impl Party {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Rider => Self::Driver,
            Self::Driver => Self::Rider,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferStatus {
    Pending,
    Countered,
    Accepted,
    Rejected,
    Expired,
}

/// One immutable link of a negotiation chain. A counter-offer is a new record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BargainOffer {
    pub id: Uuid,
    pub request_id: Uuid,
    pub driver_id: Uuid,
    pub sequence: u32,
    pub proposer: Party,
    pub price: f64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl BargainOffer {
    pub fn new(
        request_id: Uuid,
        driver_id: Uuid,
        sequence: u32,
        proposer: Party,
        price: f64,
        message: Option<String>,
        created_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            driver_id,
            sequence,
            proposer,
            price,
            message,
            created_at,
            deadline,
        }
    }

    /// The party expected to answer this offer.
    pub fn responder(&self) -> Party {
        self.proposer.opposite()
    }

    pub fn proposer_id(&self, rider_id: Uuid) -> Uuid {
        self.party_id(self.proposer, rider_id)
    }

    pub fn responder_id(&self, rider_id: Uuid) -> Uuid {
        self.party_id(self.responder(), rider_id)
    }

    fn party_id(&self, party: Party, rider_id: Uuid) -> Uuid {
        match party {
            Party::Rider => rider_id,
            Party::Driver => self.driver_id,
        }
    }
}

/// An offer paired with the status derived from its negotiation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OfferView {
    #[serde(flatten)]
    pub offer: BargainOffer,
    pub status: OfferStatus,
}
