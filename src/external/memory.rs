use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    entities::VehicleClass,
    error::{upstream_error, Error},
    external::{DriverProfile, Notifier, Preauthorization, ProfileDirectory, Wallet},
};

/// Profile directory backed by a map, falling back to a default vehicle class.
#[derive(Debug)]
pub struct StaticProfiles {
    profiles: RwLock<HashMap<Uuid, DriverProfile>>,
    fallback: Option<VehicleClass>,
}

impl StaticProfiles {
    pub fn new(fallback: Option<VehicleClass>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            fallback,
        }
    }

    pub async fn insert(&self, profile: DriverProfile) {
        self.profiles
            .write()
            .await
            .insert(profile.driver_id, profile);
    }
}

#[async_trait]
impl ProfileDirectory for StaticProfiles {
    async fn driver_profile(&self, driver_id: Uuid) -> Result<Option<DriverProfile>, Error> {
        if let Some(profile) = self.profiles.read().await.get(&driver_id) {
            return Ok(Some(profile.clone()));
        }

        Ok(self.fallback.map(|vehicle_class| DriverProfile {
            driver_id,
            vehicle_class,
            rating: None,
        }))
    }
}

#[derive(Debug, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(
        &self,
        recipient_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        tracing::info!("notify {} of {}: {}", recipient_id, event_type, payload);

        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct Notification {
    pub recipient_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Keeps every notification, optionally failing them all.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(vec![]),
            failing: true,
        }
    }

    pub async fn sent_to(&self, recipient_id: Uuid) -> Vec<Notification> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipient_id: Uuid,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        if self.failing {
            return Err(upstream_error());
        }

        self.sent.lock().await.push(Notification {
            recipient_id,
            event_type: event_type.into(),
            payload,
        });

        Ok(())
    }
}

/// Wallet with per-rider balances. Riders without a balance are authorized.
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    balances: RwLock<HashMap<Uuid, f64>>,
    pub calls: Mutex<Vec<(Uuid, f64)>>,
}

impl InMemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, rider_id: Uuid, balance: f64) {
        self.balances.write().await.insert(rider_id, balance);
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    #[tracing::instrument(skip(self))]
    async fn preauthorize(&self, rider_id: Uuid, amount: f64) -> Result<Preauthorization, Error> {
        self.calls.lock().await.push((rider_id, amount));

        match self.balances.read().await.get(&rider_id) {
            Some(balance) if *balance < amount => Ok(Preauthorization::InsufficientFunds),
            _ => Ok(Preauthorization::Ok),
        }
    }
}

#[test]
fn wallet_refuses_short_balance() {
    use tokio_test::block_on;

    let wallet = InMemoryWallet::new();
    let rider_id = Uuid::new_v4();

    block_on(wallet.set_balance(rider_id, 1000.0));

    assert_eq!(
        block_on(wallet.preauthorize(rider_id, 1800.0)).unwrap(),
        Preauthorization::InsufficientFunds
    );
    assert_eq!(
        block_on(wallet.preauthorize(Uuid::new_v4(), 1800.0)).unwrap(),
        Preauthorization::Ok
    );
    assert_eq!(block_on(wallet.call_count()), 2);
}

#[test]
fn profiles_fall_back_to_default_class() {
    use tokio_test::block_on;

    let profiles = StaticProfiles::new(Some(VehicleClass::Sedan));
    let driver_id = Uuid::new_v4();

    block_on(profiles.insert(DriverProfile {
        driver_id,
        vehicle_class: VehicleClass::Suv,
        rating: Some(4.8),
    }));

    let known = block_on(profiles.driver_profile(driver_id)).unwrap().unwrap();
    assert_eq!(known.vehicle_class, VehicleClass::Suv);

    let unknown = block_on(profiles.driver_profile(Uuid::new_v4()))
        .unwrap()
        .unwrap();
    assert_eq!(unknown.vehicle_class, VehicleClass::Sedan);

    let strict = StaticProfiles::new(None);
    assert!(block_on(strict.driver_profile(driver_id)).unwrap().is_none());
}
