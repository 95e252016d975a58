use std::collections::HashSet;
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use chrono::Utc;
use rand_distr::{Distribution, Normal, Uniform};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::api::{DriverAvailabilityAPI, NegotiationAPI, RideRequestAPI};
use crate::engine::Engine;
use crate::entities::{Coordinates, Party, ResponseAction, RideStatus, VehicleClass};
use crate::error::{
    invalid_input_error, Error, ACTIVE_REQUEST_EXISTS, INVALID_TRANSITION, NEGOTIATION_TIMEOUT,
    NO_DRIVERS_AVAILABLE, OUT_OF_SERVICE_AREA, PREAUTHORIZATION_FAILED,
};

const KM_PER_DEGREE: f64 = 111.195;

#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub centre: Coordinates,
    pub drivers: usize,
    pub riders: usize,
    /// Standard deviation of driver and rider positions around the centre.
    pub spread_km: f64,
    pub mean_price: f64,
    pub price_deviation: f64,
    pub rounds: usize,
    pub workers: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            centre: Coordinates::new(6.5244, 3.3792),
            drivers: 40,
            riders: 60,
            spread_km: 3.0,
            mean_price: 1500.0,
            price_deviation: 300.0,
            rounds: 6,
            workers: 8,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SimulationReport {
    pub assigned: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub searching: usize,
    pub out_of_area: usize,
}

impl SimulationReport {
    pub fn total(&self) -> usize {
        self.assigned + self.expired + self.cancelled + self.searching + self.out_of_area
    }
}

// only these are expected while riders and drivers race each other
fn handle_invocation_error<T>(result: Result<T, Error>) {
    if let Err(err) = result {
        match err.code {
            INVALID_TRANSITION | NEGOTIATION_TIMEOUT | PREAUTHORIZATION_FAILED => {
                tracing::info!("simulated response refused: {}", err)
            }
            _ => tracing::warn!("unexpected error: {}", err),
        }
    }
}

struct Simulation {
    e: Arc<Engine>,
    config: SimulationConfig,
    offset: Normal<f64>,
    price: Normal<f64>,
    die: Uniform<f64>,
    requests: Mutex<HashSet<Uuid>>,
    report: Mutex<SimulationReport>,
}

impl Simulation {
    fn new(e: Arc<Engine>, config: SimulationConfig) -> Result<Self, Error> {
        let offset = Normal::new(0.0, config.spread_km / KM_PER_DEGREE)
            .map_err(|_| invalid_input_error())?;
        let price = Normal::new(config.mean_price, config.price_deviation)
            .map_err(|_| invalid_input_error())?;

        Ok(Self {
            e,
            config,
            offset,
            price,
            die: Uniform::new(0.0, 1.0),
            requests: Mutex::new(HashSet::new()),
            report: Mutex::new(SimulationReport::default()),
        })
    }

    fn sample_position(&self) -> Coordinates {
        let mut rng = rand::thread_rng();

        Coordinates::new(
            self.config.centre.lat + self.offset.sample(&mut rng),
            self.config.centre.lng + self.offset.sample(&mut rng),
        )
    }

    fn sample_price(&self) -> f64 {
        self.price
            .sample(&mut rand::thread_rng())
            .max(self.config.mean_price / 4.0)
            .round()
    }

    fn roll(&self) -> f64 {
        self.die.sample(&mut rand::thread_rng())
    }

    #[tracing::instrument(skip(self))]
    async fn add_driver(&self) {
        let driver_id = Uuid::new_v4();
        let position = self.sample_position();

        handle_invocation_error(
            self.e
                .update_driver_location(driver_id, position, Utc::now())
                .await,
        );
    }

    #[tracing::instrument(skip(self))]
    async fn add_rider(&self) {
        let rider_id = Uuid::new_v4();
        let pickup = self.sample_position();
        let destination = self.sample_position();
        let price = self.sample_price();

        match self
            .e
            .create_request(rider_id, pickup, destination, VehicleClass::Sedan, price)
            .await
        {
            Ok(request) => {
                self.requests.lock().await.insert(request.id);
            }
            Err(err) if err.code == NO_DRIVERS_AVAILABLE => {
                self.report.lock().await.expired += 1;
            }
            Err(err) if err.code == OUT_OF_SERVICE_AREA => {
                self.report.lock().await.out_of_area += 1;
            }
            Err(err) if err.code == ACTIVE_REQUEST_EXISTS => {}
            Err(err) => tracing::warn!("failed to create request: {}", err),
        }
    }

    /// Lets both sides of every live negotiation of the request act once.
    #[tracing::instrument(skip(self))]
    async fn step(&self, request_id: Uuid) {
        if self.roll() < 0.02 {
            tracing::info!("rider gives up on {}", request_id);
            handle_invocation_error(self.e.cancel_request(request_id).await);
            return;
        }

        let negotiations = match self.e.negotiation_history(request_id).await {
            Ok(negotiations) => negotiations,
            Err(err) => {
                tracing::warn!("no history for {}: {}", request_id, err);
                return;
            }
        };

        for negotiation in negotiations.iter().filter(|n| n.is_live()) {
            let offer = match negotiation.pending_offer() {
                Some(offer) => offer,
                None => continue,
            };

            let roll = self.roll();
            let (action, counter_price) = match offer.responder() {
                // drivers mostly take the fare or ask a bit more
                Party::Driver if roll < 0.5 => (ResponseAction::Accept, None),
                Party::Driver if roll < 0.85 => {
                    (ResponseAction::Counter, Some((offer.price * 1.2).round()))
                }
                Party::Driver => (ResponseAction::Reject, None),
                Party::Rider if roll < 0.7 => (ResponseAction::Accept, None),
                Party::Rider if roll < 0.9 => {
                    (ResponseAction::Counter, Some((offer.price * 0.9).round()))
                }
                Party::Rider => (ResponseAction::Reject, None),
            };

            handle_invocation_error(
                self.e
                    .respond(offer.id, action, counter_price, None)
                    .await,
            );
        }
    }

    async fn tally(&self) -> SimulationReport {
        let mut report = self.report.lock().await.clone();

        for request_id in self.requests.lock().await.iter() {
            match self.e.find_request(*request_id).await.map(|r| r.status) {
                Ok(RideStatus::Assigned { .. }) => report.assigned += 1,
                Ok(RideStatus::Expired) => report.expired += 1,
                Ok(RideStatus::Cancelled) => report.cancelled += 1,
                Ok(_) => report.searching += 1,
                Err(err) => tracing::warn!("lost request {}: {}", request_id, err),
            }
        }

        report
    }
}

/// Fans `jobs` out to the simulation's workers and waits for all of them.
async fn run_workers<T, F, Fut>(s: &Arc<Simulation>, jobs: Vec<T>, work: F)
where
    T: Send + 'static,
    F: Fn(Arc<Simulation>, T) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx): (Sender<T>, Receiver<T>) = async_channel::unbounded();

    let mut handles = vec![];
    for _ in 0..s.config.workers.max(1) {
        let rx = rx.clone();
        let s = s.clone();
        let work = work.clone();

        handles.push(tokio::spawn(async move {
            while let Ok(job) = rx.recv().await {
                work(s.clone(), job).await;
            }
        }));
    }

    for job in jobs {
        if tx.send(job).await.is_err() {
            break;
        }
    }
    drop(tx);

    futures::future::join_all(handles).await;
}

/// Places drivers, creates riders, lets both sides haggle for a few rounds and
/// counts how the requests ended.
#[tracing::instrument(skip(e))]
pub async fn run(e: Arc<Engine>, config: SimulationConfig) -> Result<SimulationReport, Error> {
    let s = Arc::new(Simulation::new(e, config)?);

    run_workers(&s, vec![(); s.config.drivers], |s, _| async move {
        s.add_driver().await
    })
    .await;

    run_workers(&s, vec![(); s.config.riders], |s, _| async move {
        s.add_rider().await
    })
    .await;

    for round in 0..s.config.rounds {
        let requests: Vec<Uuid> = s.requests.lock().await.iter().copied().collect();

        tracing::info!("round {} over {} requests", round, requests.len());

        run_workers(&s, requests, |s, request_id| async move {
            s.step(request_id).await
        })
        .await;

        s.e.sweep(Utc::now()).await;
    }

    let report = s.tally().await;
    tracing::info!("simulation finished: {:?}", report);

    Ok(report)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_rider_is_accounted_for() {
    use crate::config::Config;
    use crate::engine::testing::lagos;
    use crate::external::memory::{InMemoryWallet, StaticProfiles};

    let engine = Arc::new(Engine::new(
        Config::default(),
        vec![lagos()],
        Arc::new(StaticProfiles::new(Some(VehicleClass::Sedan))),
        Arc::new(InMemoryWallet::new()),
    ));

    let config = SimulationConfig {
        drivers: 12,
        riders: 10,
        rounds: 4,
        workers: 4,
        ..SimulationConfig::default()
    };

    let report = run(engine.clone(), config).await.unwrap();

    assert_eq!(report.total(), 10);
    assert_eq!(report.out_of_area, 0);
    assert!(!engine.subscribe().is_empty());
}
