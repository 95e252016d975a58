mod handlers;

use std::net::SocketAddr;

use axum::{
    extract::Extension,
    routing::{get, patch, post},
    Router,
};

use crate::api::DynAPI;
use crate::error::{unexpected_error, Error};
use crate::server::handlers::{drivers, offers, rides};

pub fn router(api: DynAPI) -> Router {
    Router::new()
        .route("/rides", post(rides::create))
        .route("/rides/:id", get(rides::find))
        .route("/rides/:id/cancel", patch(rides::cancel))
        .route("/rides/:id/attempt", get(rides::attempt))
        .route("/rides/:id/candidates", get(rides::candidates))
        .route("/rides/:id/negotiations", get(rides::history))
        .route("/rides/:id/summary", get(rides::summary))
        .route("/rides/:id/offers", post(offers::propose))
        .route("/offers/:id", get(offers::find).patch(offers::respond))
        .route("/drivers/:id", get(drivers::find))
        .route("/drivers/:id/location", patch(drivers::update_location))
        .route("/drivers/:id/offline", patch(drivers::go_offline))
        .route("/drivers/:id/trip/start", patch(drivers::start_trip))
        .route("/drivers/:id/trip/complete", patch(drivers::complete_trip))
        .route("/nearby/drivers", get(drivers::nearby))
        .layer(Extension(api))
}

pub async fn serve(api: DynAPI, addr: SocketAddr) -> Result<(), Error> {
    let app = router(api);

    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|err| {
            tracing::error!("server stopped: {}", err);
            unexpected_error()
        })
}
