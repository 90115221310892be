//! Periodic realtime tick: the liveness driver when no agent is talking.
//!
//! Each tick samples system metrics, pushes `metrics_update`, records the
//! point in the metric store and, when enabled, jitters online node loads
//! and rebroadcasts the registry. A failed persist is logged and skipped.

use crate::broadcast::SessionManager;
use crate::registry::SharedFleetRegistry;
use crate::sampler::SystemSampler;
use crate::state::Shared;
use crate::store::MetricStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Ticker {
    pub registry: SharedFleetRegistry,
    pub sessions: SessionManager,
    pub metrics: Arc<MetricStore>,
    pub sampler: Shared<SystemSampler>,
    /// `None` disables load jitter.
    pub jitter: Option<f32>,
}

impl Ticker {
    /// One tick. Returns the number of sessions that got the metrics frame.
    pub async fn tick(&self) -> usize {
        let sample = self.sampler.lock().sample();
        let delivered = self.sessions.publish_metrics(sample.clone());

        if let Err(e) = self.metrics.append(&sample) {
            warn!("[ticker] failed to persist metrics point: {}", e);
        }

        if let Some(amplitude) = self.jitter {
            self.registry.jitter_loads(amplitude).await;
        }
        delivered
    }

    pub fn spawn(self, every: Duration, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        info!("[ticker] realtime tick every {:?} (jitter: {:?})", every, self.jitter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let delivered = self.tick().await;
                        debug!("[ticker] metrics pushed to {} sessions", delivered);
                    }
                    _ = shutdown.changed() => break,
                }
            }
            info!("[ticker] stopped");
        })
    }
}
