mod availability;
mod availability_api;
mod matching;
mod negotiation_api;
mod ride_request_api;
mod sweeper;

pub use availability::{DriverIndex, NearbyDriver};
pub use sweeper::{spawn_sweeper, SweepReport};

use std::collections::HashMap;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    api::API,
    config::Config,
    entities::{MatchingAttempt, Negotiation, RideEvent, RideRequest, ServiceZone},
    error::{not_found_error, Error},
    external::{DynProfiles, DynWallet},
};

/// Everything the engine knows about one request. Guarded by a per-request lock,
/// which makes its holder the single writer of the request's state.
#[derive(Debug)]
pub(crate) struct Ride {
    pub request: RideRequest,
    pub attempt: MatchingAttempt,
    pub negotiations: Vec<Negotiation>,
}

impl Ride {
    fn new(request: RideRequest, initial_radius_km: f64) -> Self {
        Self {
            attempt: MatchingAttempt::new(request.id, initial_radius_km),
            request,
            negotiations: vec![],
        }
    }

    pub fn live_negotiations(&self) -> impl Iterator<Item = &Negotiation> {
        self.negotiations.iter().filter(|n| n.is_live())
    }
}

// Lock order: a ride, then driver records. The remaining maps are never held
// while acquiring another lock.
pub struct Engine {
    config: Config,
    zones: Vec<ServiceZone>,
    drivers: DriverIndex,
    rides: RwLock<HashMap<Uuid, Arc<Mutex<Ride>>>>,
    // rider id -> request id of the rider's active request
    active_riders: Mutex<HashMap<Uuid, Uuid>>,
    // offer id -> request id
    offers: RwLock<HashMap<Uuid, Uuid>>,
    // driver id -> last decline or missed deadline
    declines: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    profiles: DynProfiles,
    wallet: DynWallet,
    events_tx: Sender<RideEvent>,
    events_rx: Receiver<RideEvent>,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(
        config: Config,
        zones: Vec<ServiceZone>,
        profiles: DynProfiles,
        wallet: DynWallet,
    ) -> Self {
        let (events_tx, events_rx) = async_channel::bounded(config.event_buffer.max(1));

        tracing::info!(
            "engine starting with {} zones, {:?} offers",
            zones.len(),
            config.offer_policy
        );

        Self {
            drivers: DriverIndex::new(config.heartbeat_ttl),
            config,
            zones,
            rides: RwLock::new(HashMap::new()),
            active_riders: Mutex::new(HashMap::new()),
            offers: RwLock::new(HashMap::new()),
            declines: Mutex::new(HashMap::new()),
            profiles,
            wallet,
            events_tx,
            events_rx,
        }
    }

    /// Lifecycle events. Receivers share one bounded queue and each event is taken
    /// once. While the queue is full new events are dropped.
    pub fn subscribe(&self) -> Receiver<RideEvent> {
        self.events_rx.clone()
    }

    fn emit(&self, event: RideEvent) {
        tracing::info!(
            "{} request={} driver={:?}",
            event.kind.name(),
            event.request_id,
            event.driver_id
        );

        if let Err(err) = self.events_tx.try_send(event) {
            tracing::warn!("dropped event: {}", err);
        }
    }

    async fn ride(&self, request_id: Uuid) -> Result<Arc<Mutex<Ride>>, Error> {
        self.rides
            .read()
            .await
            .get(&request_id)
            .cloned()
            .ok_or_else(not_found_error)
    }

    async fn ride_for_offer(&self, offer_id: Uuid) -> Result<Arc<Mutex<Ride>>, Error> {
        let request_id = self
            .offers
            .read()
            .await
            .get(&offer_id)
            .copied()
            .ok_or_else(not_found_error)?;

        self.ride(request_id).await
    }

    async fn index_offer(&self, offer_id: Uuid, request_id: Uuid) {
        self.offers.write().await.insert(offer_id, request_id);
    }

    async fn release_rider(&self, rider_id: Uuid, request_id: Uuid) {
        let mut active = self.active_riders.lock().await;

        if active.get(&rider_id) == Some(&request_id) {
            active.remove(&rider_id);
        }
    }

    async fn record_decline(&self, driver_id: Uuid, now: DateTime<Utc>) {
        self.declines.lock().await.insert(driver_id, now);
    }

    async fn recently_declined(&self, now: DateTime<Utc>) -> HashMap<Uuid, DateTime<Utc>> {
        let cutoff = now - self.config.decline_cooldown;
        let mut declines = self.declines.lock().await;

        declines.retain(|_, at| *at > cutoff);
        declines.clone()
    }
}

impl API for Engine {}

#[cfg(test)]
pub(crate) mod testing;
