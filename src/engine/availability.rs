use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    entities::{Coordinates, DriverAvailabilityRecord, DriverStatus, VehicleClass},
    error::{invalid_input_error, invalid_transition_error, not_found_error, Error},
    geo,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub position: Coordinates,
    pub distance_km: f64,
    pub rating: Option<f64>,
}

/// Registry of online drivers.
///
/// Each record sits behind its own lock so heartbeats and status changes of
/// unrelated drivers never contend. The outer map lock is only held to look up,
/// insert or remove a record.
#[derive(Debug)]
pub struct DriverIndex {
    records: RwLock<HashMap<Uuid, Arc<Mutex<DriverAvailabilityRecord>>>>,
    heartbeat_ttl: Duration,
}

impl DriverIndex {
    pub fn new(heartbeat_ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            heartbeat_ttl,
        }
    }

    pub async fn contains(&self, driver_id: Uuid) -> bool {
        self.records.read().await.contains_key(&driver_id)
    }

    #[tracing::instrument(skip(self, record), fields(driver_id = %record.driver_id))]
    pub async fn register(&self, record: DriverAvailabilityRecord) -> Result<(), Error> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.driver_id) {
            return Err(invalid_input_error());
        }

        tracing::info!("driver online");
        records.insert(record.driver_id, Arc::new(Mutex::new(record)));

        Ok(())
    }

    /// Runs `f` with exclusive access to one driver's record.
    pub async fn with_driver<T, F>(&self, driver_id: Uuid, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut DriverAvailabilityRecord) -> Result<T, Error>,
    {
        let record = self
            .records
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .ok_or_else(not_found_error)?;

        let mut record = record.lock().await;

        // removed between lookup and lock
        if !record.online {
            return Err(not_found_error());
        }

        f(&mut record)
    }

    pub async fn find(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error> {
        self.with_driver(driver_id, |record| Ok(record.clone())).await
    }

    /// Out-of-order heartbeats fail with a stale-location error and change nothing.
    #[tracing::instrument(skip(self))]
    pub async fn upsert_position(
        &self,
        driver_id: Uuid,
        position: Coordinates,
        timestamp: DateTime<Utc>,
    ) -> Result<u64, Error> {
        self.with_driver(driver_id, |record| record.update_position(position, timestamp))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_status(&self, driver_id: Uuid, status: DriverStatus) -> Result<(), Error> {
        self.with_driver(driver_id, |record| record.transition(status))
            .await
    }

    /// Moves a driver offered `request_id` to assigned once `confirm` resolves to
    /// true. The record stays locked while `confirm` runs, so the driver cannot
    /// leave or change status in between.
    #[tracing::instrument(skip(self, confirm))]
    pub async fn assign_when<Fut>(
        &self,
        driver_id: Uuid,
        request_id: Uuid,
        confirm: Fut,
    ) -> Result<bool, Error>
    where
        Fut: Future<Output = bool>,
    {
        let record = self
            .records
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .ok_or_else(not_found_error)?;

        let mut record = record.lock().await;

        if !record.online {
            return Err(not_found_error());
        }
        if record.status != (DriverStatus::Offered { request_id }) {
            return Err(invalid_transition_error(
                record.status,
                DriverStatus::Assigned { request_id },
            ));
        }

        if !confirm.await {
            return Ok(false);
        }

        record.transition(DriverStatus::Assigned { request_id })?;
        Ok(true)
    }

    /// Removes the driver, returning its last record.
    #[tracing::instrument(skip(self))]
    pub async fn remove(&self, driver_id: Uuid) -> Result<DriverAvailabilityRecord, Error> {
        let record = self
            .records
            .read()
            .await
            .get(&driver_id)
            .cloned()
            .ok_or_else(not_found_error)?;

        // marked offline under its own lock, then dropped from the map
        let snapshot = {
            let mut record = record.lock().await;
            if !record.online {
                return Err(not_found_error());
            }

            let before = record.clone();
            record.go_offline()?;
            before
        };

        self.records.write().await.remove(&driver_id);
        tracing::info!("driver offline");

        Ok(snapshot)
    }

    pub async fn query_nearby(
        &self,
        point: Coordinates,
        radius_km: f64,
        vehicle_class: VehicleClass,
        limit: usize,
    ) -> Vec<NearbyDriver> {
        self.query_nearby_excluding(
            point,
            radius_km,
            vehicle_class,
            limit,
            &HashSet::new(),
            Utc::now(),
        )
        .await
    }

    /// Idle drivers of the class with a heartbeat fresh at `now`, closest first.
    pub async fn query_nearby_excluding(
        &self,
        point: Coordinates,
        radius_km: f64,
        vehicle_class: VehicleClass,
        limit: usize,
        excluded: &HashSet<Uuid>,
        now: DateTime<Utc>,
    ) -> Vec<NearbyDriver> {
        let records: Vec<Arc<Mutex<DriverAvailabilityRecord>>> =
            self.records.read().await.values().cloned().collect();

        let fresh_after = now - self.heartbeat_ttl;
        let mut ratings = HashMap::new();
        let mut positions = vec![];

        for record in records {
            let record = record.lock().await;

            if record.online
                && record.is_idle()
                && record.vehicle_class == vehicle_class
                && record.last_seen >= fresh_after
                && !excluded.contains(&record.driver_id)
            {
                positions.push((record.driver_id, record.position));
                ratings.insert(record.driver_id, record.rating);
            }
        }

        geo::nearest(point, positions, radius_km, limit)
            .into_iter()
            .map(|nearby| NearbyDriver {
                driver_id: nearby.key,
                position: nearby.position,
                distance_km: nearby.distance_km,
                rating: ratings.get(&nearby.key).copied().flatten(),
            })
            .collect()
    }
}
