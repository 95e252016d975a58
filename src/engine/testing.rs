use std::sync::Arc;

use chrono::Utc;
use tokio_test::block_on;
use uuid::Uuid;

use super::Engine;
use crate::{
    api::{DriverAvailabilityAPI, NegotiationAPI, RideRequestAPI},
    config::Config,
    entities::{
        BargainOffer, Coordinates, DriverStatus, EventKind, Negotiation, ResponseAction,
        RideRequest, ServiceZone, VehicleClass, ZoneDefinition, ZoneType,
    },
    external::memory::{InMemoryWallet, StaticProfiles},
};

const KM_PER_DEGREE: f64 = 111.195;

pub fn pickup() -> Coordinates {
    Coordinates::new(6.5244, 3.3792)
}

pub fn destination() -> Coordinates {
    Coordinates::new(6.4698, 3.3920)
}

pub fn lagos() -> ServiceZone {
    ServiceZone::try_from(ZoneDefinition {
        name: "lagos".into(),
        zone_type: ZoneType::Standard,
        exterior: vec![[3.0, 6.3], [3.8, 6.3], [3.8, 6.8], [3.0, 6.8]],
        interiors: vec![],
    })
    .unwrap()
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub wallet: Arc<InMemoryWallet>,
}

pub fn harness(config: Config) -> Harness {
    let wallet = Arc::new(InMemoryWallet::new());
    let profiles = Arc::new(StaticProfiles::new(Some(VehicleClass::Sedan)));
    let engine = Engine::new(config, vec![lagos()], profiles, wallet.clone());

    Harness {
        engine: Arc::new(engine),
        wallet,
    }
}

impl Harness {
    /// Brings a sedan online `km` north of the pickup point.
    pub fn driver_at(&self, km: f64) -> Uuid {
        let driver_id = Uuid::new_v4();
        let position = Coordinates::new(pickup().lat + km / KM_PER_DEGREE, pickup().lng);

        assert!(block_on(self.engine.update_driver_location(driver_id, position, Utc::now())).unwrap());

        driver_id
    }

    pub fn request(&self, rider_id: Uuid) -> RideRequest {
        block_on(self.engine.create_request(
            rider_id,
            pickup(),
            destination(),
            VehicleClass::Sedan,
            1500.0,
        ))
        .unwrap()
    }

    pub fn status(&self, driver_id: Uuid) -> DriverStatus {
        block_on(self.engine.find_driver(driver_id)).unwrap().status
    }

    pub fn negotiations(&self, request_id: Uuid) -> Vec<Negotiation> {
        block_on(self.engine.negotiation_history(request_id)).unwrap()
    }

    pub fn pending_offer(&self, request_id: Uuid, driver_id: Uuid) -> BargainOffer {
        self.negotiations(request_id)
            .into_iter()
            .rev()
            .find(|n| n.driver_id == driver_id)
            .and_then(|n| n.pending_offer().cloned())
            .unwrap()
    }

    pub fn reject(&self, request_id: Uuid, driver_id: Uuid) -> Negotiation {
        let offer = self.pending_offer(request_id, driver_id);

        block_on(self.engine.respond(offer.id, ResponseAction::Reject, None, None)).unwrap()
    }

    /// Drains the event queue.
    pub fn events(&self) -> Vec<EventKind> {
        let events = self.engine.subscribe();
        let mut kinds = vec![];

        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }

        kinds
    }
}
