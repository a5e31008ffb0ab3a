//! Bounded check executor.
//!
//! Admission is a semaphore sized by `max_connections`. [`BoundedExecutor::submit`]
//! waits for a permit before spawning the probe task, so a busy executor slows
//! schedulers down instead of dropping checks. The permit moves into the probe
//! task and is released when that task ends, whether it finishes, fails or
//! panics.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::time::Instant;
use tracing::debug;

use warpwatch_core::Service;

use crate::error::ExecutorClosed;
use crate::probe::{CheckOutcome, Prober};

/// A finished check, handed to the result-routing loop.
#[derive(Debug)]
pub struct CheckReport {
    pub service: Arc<Service>,
    pub outcome: CheckOutcome,
    pub elapsed: Duration,
}

/// Runs probes with a global cap on concurrency.
#[derive(Clone)]
pub struct BoundedExecutor {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    prober: Arc<dyn Prober>,
    reports: mpsc::Sender<CheckReport>,
}

impl BoundedExecutor {
    /// Create an executor allowing at most `capacity` probes at once.
    pub fn new(
        capacity: usize,
        prober: Arc<dyn Prober>,
        reports: mpsc::Sender<CheckReport>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            prober,
            reports,
        }
    }

    /// Wait for a free slot, then start a check for `service`.
    ///
    /// Returns once the probe task has been spawned, not when it completes.
    pub async fn submit(&self, service: Arc<Service>) -> Result<(), ExecutorClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExecutorClosed)?;

        let prober = self.prober.clone();
        let reports = self.reports.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            debug!(service = %service.label(), address = %service.probe_address(), "checking");

            let outcome = prober.probe(&service, service.timeout).await;
            let report = CheckReport {
                service,
                outcome,
                elapsed: started.elapsed(),
            };

            // Routing happens while the slot is still held.
            if reports.send(report).await.is_err() {
                debug!("result loop stopped, dropping check report");
            }
        });

        Ok(())
    }

    /// Number of probes currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Refuse all further submissions, waking any scheduler blocked in
    /// [`submit`](Self::submit).
    pub fn close(&self) {
        self.semaphore.close();
    }
}
