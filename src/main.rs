use std::sync::Arc;

use haggler::api::DynAPI;
use haggler::config::Config;
use haggler::engine::{spawn_sweeper, Engine};
use haggler::entities::{ServiceZone, VehicleClass};
use haggler::error::Error;
use haggler::external::dispatcher::dispatch;
use haggler::external::memory::{InMemoryWallet, LoggingNotifier, StaticProfiles};
use haggler::external::webhook::WebhookNotifier;
use haggler::external::DynNotifier;
use haggler::server::serve;
use haggler::simulation::{self, SimulationConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run().await {
        tracing::error!("haggler stopped: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let config = Config::from_env()?;
    let zones = ServiceZone::load(&config.zones_path).await?;

    let notifier: DynNotifier = match &config.notification_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LoggingNotifier),
    };

    let addr = config.bind_addr;
    let engine = Arc::new(Engine::new(
        config,
        zones,
        Arc::new(StaticProfiles::new(Some(VehicleClass::Sedan))),
        Arc::new(InMemoryWallet::new()),
    ));

    tokio::spawn(dispatch(engine.subscribe(), notifier));
    spawn_sweeper(engine.clone());

    match std::env::args().nth(1).as_deref() {
        Some("simulate") => {
            let report = simulation::run(engine, SimulationConfig::default()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        _ => serve(engine as DynAPI, addr).await,
    }
}
