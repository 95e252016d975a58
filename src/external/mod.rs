//! Collaborators the engine consumes but does not own.

pub mod dispatcher;
pub mod memory;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::VehicleClass;
use crate::error::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverProfile {
    pub driver_id: Uuid,
    pub vehicle_class: VehicleClass,
    pub rating: Option<f64>,
}

/// Identity/profile service, read only.
#[async_trait]
pub trait ProfileDirectory {
    async fn driver_profile(&self, driver_id: Uuid) -> Result<Option<DriverProfile>, Error>;
}

/// Notification dispatcher. Fire-and-forget: callers log failures and move on.
#[async_trait]
pub trait Notifier {
    async fn notify(
        &self,
        recipient_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preauthorization {
    Ok,
    InsufficientFunds,
}

/// Payment/wallet service, called once per assignment.
#[async_trait]
pub trait Wallet {
    async fn preauthorize(&self, rider_id: Uuid, amount: f64) -> Result<Preauthorization, Error>;
}

pub type DynProfiles = std::sync::Arc<dyn ProfileDirectory + Send + Sync>;
pub type DynNotifier = std::sync::Arc<dyn Notifier + Send + Sync>;
pub type DynWallet = std::sync::Arc<dyn Wallet + Send + Sync>;
