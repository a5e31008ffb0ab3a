//! Monitor — wires scheduling, execution and notification together.
//!
//! [`Monitor::run`] spawns one scheduler per service, the result-routing loop,
//! the verdict-routing loop and the notification workers, then blocks on the
//! shutdown signal. Shutdown is abrupt unless a drain timeout is configured,
//! in which case schedulers stop first and in-flight probes get that long to
//! finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warpwatch_core::{MonitorSettings, Service};

use crate::backoff::BackoffGate;
use crate::dispatcher::{Dispatcher, spawn_workers};
use crate::executor::{BoundedExecutor, CheckReport};
use crate::notify::NotifierSet;
use crate::probe::{NetProber, Prober};
use crate::scheduler::spawn_scheduler;

/// A finished check on its way to the dispatcher.
///
/// Failures and recoveries share one channel so the dispatcher sees them in
/// the order the checks completed.
#[derive(Debug)]
enum Verdict {
    Failed { service: Arc<Service>, detail: String },
    Recovered(Arc<Service>),
}

/// Totals for one run, returned when the monitor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub checks: u64,
    pub failures: u64,
    pub notifications: u64,
    pub throttled: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct CheckCounters {
    checks: AtomicU64,
    failures: AtomicU64,
}

/// Watches a fixed set of services until shut down.
pub struct Monitor {
    settings: MonitorSettings,
    services: Vec<Arc<Service>>,
    notifiers: Arc<NotifierSet>,
    prober: Arc<dyn Prober>,
    gate: Arc<BackoffGate>,
}

impl Monitor {
    /// Create a monitor for `services`.
    ///
    /// Services with a zero interval or timeout get the process-wide value
    /// from `settings`; nothing changes after this point.
    pub fn new(settings: MonitorSettings, services: Vec<Service>, notifiers: NotifierSet) -> Self {
        let services: Vec<Arc<Service>> = services
            .into_iter()
            .map(|mut service| {
                if service.check_interval.is_zero() {
                    service.check_interval = settings.check_interval;
                }
                if service.timeout.is_zero() {
                    service.timeout = settings.timeout;
                }
                Arc::new(service)
            })
            .collect();

        let gate = Arc::new(BackoffGate::new(
            settings.backoff,
            services.iter().map(|s| s.id),
        ));

        Self {
            settings,
            services,
            notifiers: Arc::new(notifiers),
            prober: Arc::new(NetProber),
            gate,
        }
    }

    /// Replace the network prober.
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn gate(&self) -> Arc<BackoffGate> {
        self.gate.clone()
    }

    /// Run for `duration`, or until Ctrl-C when `None`.
    pub async fn run_for(self, duration: Option<Duration>) -> RunSummary {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let trigger = tokio::spawn(async move {
            match duration {
                Some(duration) => {
                    tokio::time::sleep(duration).await;
                    info!(secs = duration.as_secs_f64(), "run duration elapsed");
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "failed to listen for ctrl-c, running until killed");
                        std::future::pending::<()>().await;
                    }
                    info!("shutdown signal received");
                }
            }
            let _ = shutdown_tx.send(true);
        });

        let summary = self.run(shutdown_rx).await;
        trigger.abort();
        summary
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let settings = &self.settings;
        let capacity = self.services.len().max(1);

        let (report_tx, report_rx) = mpsc::channel::<CheckReport>(capacity);
        let (verdict_tx, verdict_rx) = mpsc::channel::<Verdict>(capacity);
        let (alert_tx, alert_rx) = mpsc::channel(settings.notification_queue.max(1));

        let executor = BoundedExecutor::new(settings.max_connections, self.prober.clone(), report_tx);
        let dispatcher = Dispatcher::new(self.gate.clone(), alert_tx)
            .with_reset_on_recovery(settings.reset_backoff_on_recovery);
        let dispatch_stats = dispatcher.stats();
        let counters = Arc::new(CheckCounters::default());

        let mut workers = spawn_workers(
            settings.notification_workers,
            alert_rx,
            self.notifiers.clone(),
            settings.notify_timeout,
        );

        let mut results = tokio::spawn(route_results(report_rx, verdict_tx, counters.clone()));
        let mut verdicts = tokio::spawn(route_verdicts(verdict_rx, dispatcher));

        let mut schedulers: Vec<JoinHandle<()>> = self
            .services
            .iter()
            .map(|service| spawn_scheduler(service.clone(), executor.clone(), shutdown.clone()))
            .collect();

        info!(
            services = self.services.len(),
            max_connections = executor.capacity(),
            channels = ?self.notifiers.names(),
            "starting monitor"
        );

        // A dropped sender counts as a shutdown request.
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("terminating");

        if let Some(drain) = settings.drain_timeout {
            // Schedulers have seen the signal; closing admission releases any
            // still waiting for a slot. Every loop then ends on its own once
            // the probes still in flight have reported.
            debug!(in_flight = executor.in_flight(), "draining in-flight checks");
            executor.close();
            drop(executor);

            let drained = tokio::time::timeout(drain, async {
                for handle in &mut schedulers {
                    let _ = handle.await;
                }
                let _ = (&mut results).await;
                let _ = (&mut verdicts).await;
                for worker in &mut workers {
                    let _ = worker.await;
                }
            })
            .await;
            if drained.is_err() {
                warn!("drain timeout elapsed, abandoning in-flight checks");
            }
        }

        for handle in &schedulers {
            handle.abort();
        }
        results.abort();
        verdicts.abort();
        for worker in &workers {
            worker.abort();
        }

        let summary = RunSummary {
            checks: counters.checks.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            notifications: dispatch_stats.queued.load(Ordering::Relaxed),
            throttled: dispatch_stats.throttled.load(Ordering::Relaxed),
            dropped: dispatch_stats.dropped.load(Ordering::Relaxed),
        };
        info!(
            checks = summary.checks,
            failures = summary.failures,
            notifications = summary.notifications,
            "monitor stopped"
        );
        summary
    }
}

/// Log every finished check and forward its verdict.
async fn route_results(
    mut reports: mpsc::Receiver<CheckReport>,
    verdicts: mpsc::Sender<Verdict>,
    counters: Arc<CheckCounters>,
) {
    while let Some(report) = reports.recv().await {
        counters.checks.fetch_add(1, Ordering::Relaxed);
        let service = report.service;
        let elapsed_ms = report.elapsed.as_millis() as u64;

        let verdict = match report.outcome.err {
            None if report.outcome.ok => {
                info!(
                    service = %service.label(),
                    address = %service.probe_address(),
                    elapsed_ms,
                    "OK"
                );
                Verdict::Recovered(service)
            }
            err => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                let detail = err
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "check failed".to_string());
                warn!(
                    service = %service.label(),
                    address = %service.probe_address(),
                    elapsed_ms,
                    error = %detail,
                    "ERROR"
                );
                Verdict::Failed { service, detail }
            }
        };

        if verdicts.send(verdict).await.is_err() {
            break;
        }
    }
    debug!("result routing stopped");
}

/// Hand verdicts to the dispatcher one at a time, in completion order.
async fn route_verdicts(mut verdicts: mpsc::Receiver<Verdict>, dispatcher: Dispatcher) {
    while let Some(verdict) = verdicts.recv().await {
        match verdict {
            Verdict::Failed { service, detail } => {
                dispatcher.on_failure(&service, &detail);
            }
            Verdict::Recovered(service) => dispatcher.on_recovery(&service),
        }
    }
    debug!("verdict routing stopped");
}
