//! Per-service check scheduling.
//!
//! Every service gets its own ticker. The first tick fires one interval after
//! start; after that, each tick submits a check whether or not the previous
//! one has finished. Overlap is absorbed by the executor. When submission is
//! held up by backpressure, ticks that fell due in the meantime are skipped,
//! not replayed.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use warpwatch_core::Service;

use crate::backoff::deadline_after;
use crate::executor::BoundedExecutor;

/// Spawn the scheduling loop for one service.
pub fn spawn_scheduler(
    service: Arc<Service>,
    executor: BoundedExecutor,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_schedule_loop(service, executor, shutdown))
}

async fn run_schedule_loop(
    service: Arc<Service>,
    executor: BoundedExecutor,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = service.check_interval;
    let mut ticker = tokio::time::interval_at(deadline_after(Instant::now(), period), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(
        service = %service.label(),
        interval_secs = period.as_secs_f64(),
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if executor.submit(service.clone()).await.is_err() {
                    debug!(service = %service.label(), "executor closed, scheduler stopping");
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(service = %service.label(), "scheduler shutting down");
                break;
            }
        }
    }
}
