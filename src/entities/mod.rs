mod coordinates;
mod driver;
mod event;
mod matching_attempt;
mod negotiation;
mod offer;
mod ride_request;
mod summary;
mod zone;

pub use coordinates::Coordinates;
pub use driver::{DriverAvailabilityRecord, Status as DriverStatus, VehicleClass};
pub use event::{EventKind, RideEvent};
pub use matching_attempt::{Candidate, MatchingAttempt, OfferedCandidate, Outcome, ScoreBreakdown};
pub use negotiation::{Negotiation, Proposal, ResponseAction, State as NegotiationState};
pub use offer::{BargainOffer, OfferStatus, OfferView, Party};
pub use ride_request::{RideRequest, Status as RideStatus};
pub use summary::BargainSummary;
pub use zone::{ServiceZone, ZoneDefinition, ZoneType};
