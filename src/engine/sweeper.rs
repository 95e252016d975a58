use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{Engine, Ride};
use crate::entities::RideStatus;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub timed_out: usize,
    pub expired: usize,
    pub advanced: usize,
    pub pruned: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Engine {
    /// One pass over every request: missed deadlines, request expiry, stalled
    /// matching and retention.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut prunable = HashSet::new();

        let rides: Vec<(Uuid, Arc<Mutex<Ride>>)> = self
            .rides
            .read()
            .await
            .iter()
            .map(|(id, ride)| (*id, ride.clone()))
            .collect();

        for (id, ride) in rides {
            let mut ride = ride.lock().await;
            let ride = &mut *ride;

            if ride.request.is_terminal() {
                if ride.request.updated_at + self.config.retention <= now {
                    prunable.insert(id);
                }
                continue;
            }

            if ride.request.expires_at <= now {
                match self.expire(ride, now).await {
                    Ok(()) => report.expired += 1,
                    Err(err) => tracing::error!("failed to expire {}: {}", id, err),
                }
                continue;
            }

            for index in 0..ride.negotiations.len() {
                if self.time_out_negotiation(ride, index, now).await {
                    report.timed_out += 1;
                }
            }

            if ride.live_negotiations().next().is_none() {
                report.advanced += 1;

                if let Err(err) = self.advance(ride, now).await {
                    tracing::error!("failed to advance {}: {}", id, err);
                }
                if ride.request.status == RideStatus::Expired {
                    report.expired += 1;
                }
            }
        }

        if !prunable.is_empty() {
            report.pruned = self.prune(&prunable).await;
        }

        report
    }

    async fn prune(&self, ids: &HashSet<Uuid>) -> usize {
        let pruned = {
            let mut rides = self.rides.write().await;
            let before = rides.len();

            rides.retain(|id, _| !ids.contains(id));
            before - rides.len()
        };

        self.offers
            .write()
            .await
            .retain(|_, request_id| !ids.contains(request_id));

        tracing::info!("pruned {} finished requests", pruned);

        pruned
    }
}

/// Runs [`Engine::sweep`] every sweep interval.
pub fn spawn_sweeper(engine: Arc<Engine>) -> JoinHandle<()> {
    let period = engine
        .config
        .sweep_interval
        .to_std()
        .unwrap_or_else(|_| std::time::Duration::from_secs(5));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;

            let report = engine.sweep(Utc::now()).await;
            if !report.is_empty() {
                tracing::info!("sweep: {:?}", report);
            }
        }
    })
}
