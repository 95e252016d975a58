use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    MatchingStarted,
    OfferSent,
    OfferCountered,
    OfferAccepted,
    OfferDeclined,
    OfferTimedOut,
    OfferSuperseded,
    RequestAssigned,
    RequestExpired,
    RequestCancelled,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::MatchingStarted => "matching_started",
            Self::OfferSent => "offer_sent",
            Self::OfferCountered => "offer_countered",
            Self::OfferAccepted => "offer_accepted",
            Self::OfferDeclined => "offer_declined",
            Self::OfferTimedOut => "offer_timed_out",
            Self::OfferSuperseded => "offer_superseded",
            Self::RequestAssigned => "request_assigned",
            Self::RequestExpired => "request_expired",
            Self::RequestCancelled => "request_cancelled",
        }
    }
}

/// Ride request lifecycle event, published for transport, trip tracking and analytics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RideEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub request_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub offer_id: Option<Uuid>,
    pub price: Option<f64>,
    pub recipients: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
}

impl RideEvent {
    pub fn new(kind: EventKind, request_id: Uuid, rider_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            request_id,
            rider_id,
            driver_id: None,
            offer_id: None,
            price: None,
            recipients: vec![],
            timestamp: Utc::now(),
        }
    }

    pub fn driver(mut self, driver_id: Uuid) -> Self {
        self.driver_id = Some(driver_id);
        self
    }

    pub fn offer(mut self, offer_id: Uuid, price: f64) -> Self {
        self.offer_id = Some(offer_id);
        self.price = Some(price);
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn notify(mut self, recipient: Uuid) -> Self {
        if !self.recipients.contains(&recipient) {
            self.recipients.push(recipient);
        }
        self
    }
}

#[test]
fn serializes_kind_in_snake_case() {
    let event = RideEvent::new(EventKind::RequestAssigned, Uuid::new_v4(), Uuid::new_v4())
        .price(1800.0);

    let value = serde_json::to_value(&event).unwrap();

    assert_eq!(value["kind"], "request_assigned");
    assert_eq!(value["price"], 1800.0);
    assert_eq!(EventKind::OfferSent.name(), "offer_sent");
}
