//! Timer tick (C10): periodic triggers fanning out to the engine components.
//! Each job runs on its own tokio interval; a missed tick is benign because
//! every job re-derives its work from the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::engine::Engine;

#[derive(Debug, Clone, Copy)]
pub struct TickIntervals {
    pub scheduler_sweep: Duration,
    pub embed_pending: Duration,
    pub batch_window: Duration,
    pub digest: Duration,
    pub immediate_flush: Duration,
    pub email_drain: Duration,
    pub budget_hourly: Duration,
    pub health_check: Duration,
}

impl Default for TickIntervals {
    fn default() -> Self {
        Self {
            scheduler_sweep: Duration::from_secs(60),
            embed_pending: Duration::from_secs(60),
            batch_window: Duration::from_secs(60),
            digest: Duration::from_secs(60),
            immediate_flush: Duration::from_secs(60),
            email_drain: Duration::from_secs(30),
            budget_hourly: Duration::from_secs(3600),
            health_check: Duration::from_secs(300),
        }
    }
}

fn spawn_job<F, Fut>(name: &'static str, period: Duration, job: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = job().await {
                warn!(job = name, error = %e, "tick job failed");
            }
        }
    })
}

/// Spawn all timer jobs and run until the returned handles are dropped or
/// aborted.
pub fn spawn_all(engine: Arc<Engine>, intervals: TickIntervals) -> Vec<JoinHandle<()>> {
    info!("starting timer tick jobs");
    vec![
        spawn_job("scheduler_sweep", intervals.scheduler_sweep, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.scheduler_tick().await }
            }
        }),
        spawn_job("embed_pending", intervals.embed_pending, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.embed_tick().await }
            }
        }),
        spawn_job("immediate_flush", intervals.immediate_flush, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.immediate_tick().await }
            }
        }),
        spawn_job("batch_window_tick", intervals.batch_window, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.batch_tick().await }
            }
        }),
        spawn_job("digest_tick", intervals.digest, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.digest_tick().await }
            }
        }),
        spawn_job("email_drain", intervals.email_drain, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.email_tick().await }
            }
        }),
        spawn_job("budget_hourly", intervals.budget_hourly, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.budget_tick().await }
            }
        }),
        spawn_job("health_check", intervals.health_check, {
            let engine = engine.clone();
            move || {
                let engine = engine.clone();
                async move { engine.health_tick().await }
            }
        }),
    ]
}
