use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::NearbyDriver;
use crate::entities::{
    BargainSummary, Candidate, Coordinates, DriverAvailabilityRecord, MatchingAttempt,
    Negotiation, OfferView, Party, ResponseAction, RideRequest, VehicleClass,
};
use crate::error::Error;

#[async_trait]
pub trait RideRequestAPI {
    async fn create_request(
        &self,
        rider_id: Uuid,
        pickup: Coordinates,
        destination: Coordinates,
        vehicle_class: VehicleClass,
        initial_price: f64,
    ) -> Result<RideRequest, Error>;

    async fn find_request(&self, id: Uuid) -> Result<RideRequest, Error>;

    async fn cancel_request(&self, id: Uuid) -> Result<RideRequest, Error>;

    async fn matching_attempt(&self, id: Uuid) -> Result<MatchingAttempt, Error>;

    /// Ranked drivers the request would be offered to right now, without offering.
    async fn find_candidates(&self, id: Uuid) -> Result<Vec<Candidate>, Error>;

    async fn negotiation_history(&self, id: Uuid) -> Result<Vec<Negotiation>, Error>;

    async fn bargain_summary(&self, id: Uuid) -> Result<BargainSummary, Error>;
}

#[async_trait]
pub trait NegotiationAPI {
    async fn propose(
        &self,
        request_id: Uuid,
        driver_id: Uuid,
        proposer: Party,
        price: f64,
        message: Option<String>,
    ) -> Result<Negotiation, Error>;

    async fn respond(
        &self,
        offer_id: Uuid,
        action: ResponseAction,
        counter_price: Option<f64>,
        message: Option<String>,
    ) -> Result<Negotiation, Error>;

    async fn find_offer(&self, offer_id: Uuid) -> Result<OfferView, Error>;
}

#[async_trait]
pub trait DriverAvailabilityAPI {
    /// Returns `false` when the heartbeat was older than the last one applied.
    async fn update_driver_location(
        &self,
        driver_id: Uuid,
        position: Coordinates,
        timestamp: DateTime<Utc>,
    ) -> Result<bool, Error>;

    async fn find_driver(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error>;

    async fn go_offline(&self, driver_id: Uuid) -> Result<(), Error>;

    async fn start_trip(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error>;

    async fn complete_trip(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error>;

    async fn query_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        vehicle_class: VehicleClass,
        limit: usize,
    ) -> Result<Vec<NearbyDriver>, Error>;
}

pub trait API: RideRequestAPI + NegotiationAPI + DriverAvailabilityAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
