use axum::extract::{Extension, Json, Path};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::DynAPI;
use crate::entities::{Negotiation, OfferView, Party, ResponseAction};
use crate::error::Error;

#[derive(Serialize, Deserialize)]
pub struct ProposeParams {
    driver_id: Uuid,
    proposer: Party,
    price: f64,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct RespondParams {
    action: ResponseAction,
    #[serde(default)]
    counter_price: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

pub async fn propose(
    Extension(api): Extension<DynAPI>,
    Path(request_id): Path<Uuid>,
    Json(params): Json<ProposeParams>,
) -> Result<Json<Negotiation>, Error> {
    let negotiation = api
        .propose(
            request_id,
            params.driver_id,
            params.proposer,
            params.price,
            params.message,
        )
        .await?;

    Ok(negotiation.into())
}

pub async fn find(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
) -> Result<Json<OfferView>, Error> {
    let offer = api.find_offer(id).await?;

    Ok(offer.into())
}

pub async fn respond(
    Extension(api): Extension<DynAPI>,
    Path(id): Path<Uuid>,
    Json(params): Json<RespondParams>,
) -> Result<Json<Negotiation>, Error> {
    let negotiation = api
        .respond(id, params.action, params.counter_price, params.message)
        .await?;

    Ok(negotiation.into())
}
