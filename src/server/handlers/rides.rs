use axum::extract::{Extension, Json, Path};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::entities::{
    BargainSummary, Candidate, Coordinates, MatchingAttempt, Negotiation, RideRequest,
    VehicleClass,
};
use crate::error::Error;

#[derive(Serialize, Deserialize)]
pub struct CreateParams {
    rider_id: Uuid,
    pickup: Coordinates,
    destination: Coordinates,
    vehicle_class: VehicleClass,
    initial_price: f64,
}

pub async fn create(
    Extension(api): Extension<DynAPI>,
    Json(params): Json<CreateParams>,
) -> Result<Json<RideRequest>, Error> {
    let request = api
        .create_request(
            params.rider_id,
            params.pickup,
            params.destination,
            params.vehicle_class,
            params.initial_price,
        )
        .await?;

    Ok(request.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, Error> {
    let request = api.find_request(id).await?;

    Ok(request.into())
}

pub async fn cancel(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<RideRequest>, Error> {
    let request = api.cancel_request(id).await?;

    Ok(request.into())
}

pub async fn attempt(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchingAttempt>, Error> {
    let attempt = api.matching_attempt(id).await?;

    Ok(attempt.into())
}

pub async fn candidates(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Candidate>>, Error> {
    let candidates = api.find_candidates(id).await?;

    Ok(candidates.into())
}

pub async fn history(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Negotiation>>, Error> {
    let negotiations = api.negotiation_history(id).await?;

    Ok(negotiations.into())
}

pub async fn summary(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<BargainSummary>, Error> {
    let summary = api.bargain_summary(id).await?;

    Ok(summary.into())
}
