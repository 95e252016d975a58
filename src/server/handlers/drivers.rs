use axum::extract::{Extension, Json, Path, Query};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::engine::NearbyDriver;
use crate::entities::{Coordinates, DriverAvailabilityRecord, VehicleClass};
use crate::error::Error;

#[derive(Serialize, Deserialize)]
pub struct UpdateLocationParams {
    coordinates: Coordinates,
    // defaults to the time the heartbeat is received
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
pub struct UpdateLocationResponse {
    applied: bool,
}

#[derive(Serialize, Deserialize)]
pub struct NearbyParams {
    lat: f64,
    lng: f64,
    radius_km: f64,
    vehicle_class: VehicleClass,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverAvailabilityRecord>, Error> {
    let driver = api.find_driver(id).await?;

    Ok(driver.into())
}

pub async fn update_location(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<UpdateLocationParams>,
) -> Result<Json<UpdateLocationResponse>, Error> {
    let timestamp = params.timestamp.unwrap_or_else(Utc::now);
    let applied = api
        .update_driver_location(id, params.coordinates, timestamp)
        .await?;

    Ok(UpdateLocationResponse { applied }.into())
}

pub async fn go_offline(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<()>, Error> {
    api.go_offline(id).await?;

    Ok(().into())
}

pub async fn start_trip(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverAvailabilityRecord>, Error> {
    let driver = api.start_trip(id).await?;

    Ok(driver.into())
}

pub async fn complete_trip(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverAvailabilityRecord>, Error> {
    let driver = api.complete_trip(id).await?;

    Ok(driver.into())
}

pub async fn nearby(
    Extension(api): Extension<DynAPI>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<Vec<NearbyDriver>>, Error> {
    let drivers = api
        .query_nearby(
            Coordinates::new(params.lat, params.lng),
            params.radius_km,
            params.vehicle_class,
            params.limit,
        )
        .await?;

    Ok(drivers.into())
}
