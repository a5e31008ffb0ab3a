//! Failure → notification routing.
//!
//! The dispatcher sits between completed checks and the notification
//! channels. It asks the [`BackoffGate`] whether a failure may notify and, if
//! so, puts the alert on a bounded queue drained by a fixed pool of workers.
//! Enqueueing never waits: when the queue is full the alert is dropped with a
//! warning, so a stuck channel cannot stall polling or pile up tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use warpwatch_core::Service;

use crate::backoff::{BackoffGate, BackoffState};
use crate::notify::NotifierSet;

/// One alert waiting for a notification worker.
#[derive(Debug, Clone)]
pub struct Alert {
    pub service: Arc<Service>,
    pub message: String,
}

/// What happened to a failure handed to [`Dispatcher::on_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Alert queued; the service is quiet for `next_delay`.
    Queued { next_delay: Duration },
    /// Gate closed; nothing sent.
    Throttled,
    /// Gate open but the queue was full or closed.
    Dropped,
}

/// Counters exposed for logs and tests.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub queued: AtomicU64,
    pub throttled: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Clone)]
pub struct Dispatcher {
    gate: Arc<BackoffGate>,
    queue: mpsc::Sender<Alert>,
    reset_on_recovery: bool,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(gate: Arc<BackoffGate>, queue: mpsc::Sender<Alert>) -> Self {
        Self {
            gate,
            queue,
            reset_on_recovery: false,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Return a service's backoff to its first stage once it checks OK again.
    pub fn with_reset_on_recovery(mut self, reset: bool) -> Self {
        self.reset_on_recovery = reset;
        self
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Handle one failed check for `service`.
    pub fn on_failure(&self, service: &Arc<Service>, detail: &str) -> Dispatch {
        let Some(advance) = self.gate.try_notify(service.id) else {
            self.stats.throttled.fetch_add(1, Ordering::Relaxed);
            debug!(service = %service.label(), "notification suppressed by backoff");
            return Dispatch::Throttled;
        };

        let alert = Alert {
            service: service.clone(),
            message: alert_message(service, detail),
        };

        match self.queue.try_send(alert) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                info!(
                    service = %service.label(),
                    delay_secs = advance.delay.as_secs_f64(),
                    "next notification available in {:?}",
                    advance.delay
                );
                Dispatch::Queued {
                    next_delay: advance.delay,
                }
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(service = %service.label(), error = %e, "notification queue unavailable, alert dropped");
                Dispatch::Dropped
            }
        }
    }

    /// Handle one successful check for `service`.
    pub fn on_recovery(&self, service: &Service) {
        if !self.reset_on_recovery {
            return;
        }
        if let Some(BackoffState::Throttled { .. }) = self.gate.state(service.id) {
            self.gate.reset(service.id);
            debug!(service = %service.label(), "backoff reset after recovery");
        }
    }
}

/// Alert text: the service description plus the probe error.
pub fn alert_message(service: &Service, detail: &str) -> String {
    if service.name.is_empty() {
        format!("{service} unreachable: {detail}")
    } else {
        format!("{} ({service}) unreachable: {detail}", service.name)
    }
}

/// Spawn `workers` tasks draining `queue` into `notifiers`.
///
/// Workers exit once every sender is gone and the queue is empty.
pub fn spawn_workers(
    workers: usize,
    queue: mpsc::Receiver<Alert>,
    notifiers: Arc<NotifierSet>,
    timeout: Duration,
) -> Vec<JoinHandle<()>> {
    let queue = Arc::new(Mutex::new(queue));

    (0..workers.max(1))
        .map(|worker| {
            let queue = queue.clone();
            let notifiers = notifiers.clone();
            tokio::spawn(async move {
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(alert) = next else {
                        debug!(worker, "notification worker stopping");
                        break;
                    };
                    let delivered = notifiers.notify_all(&alert.message, timeout).await;
                    debug!(
                        worker,
                        service = %alert.service.label(),
                        delivered,
                        channels = notifiers.len(),
                        "alert fanned out"
                    );
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use warpwatch_core::{BackoffSettings, Protocol, ServiceId};

    use crate::error::NotifyResult;
    use crate::notify::Notifier;
    use crate::probe::BoxFuture;

    #[derive(Default)]
    struct Recorder {
        messages: StdMutex<Vec<String>>,
    }

    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn notify<'a>(&'a self, message: &'a str) -> BoxFuture<'a, NotifyResult<()>> {
            Box::pin(async move {
                self.messages.lock().unwrap().push(message.to_string());
                Ok(())
            })
        }
    }

    fn service(index: usize, name: &str) -> Arc<Service> {
        Arc::new(Service {
            id: ServiceId(index),
            name: name.to_string(),
            url: None,
            host: "10.0.0.5".to_string(),
            port: 5432,
            protocol: Protocol::Tcp,
            check_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
        })
    }

    fn gate(base_secs: u64) -> Arc<BackoffGate> {
        let settings = BackoffSettings {
            base: Duration::from_secs(base_secs),
            ..BackoffSettings::default()
        };
        Arc::new(BackoffGate::new(settings, [ServiceId(0), ServiceId(1)]))
    }

    #[test]
    fn message_describes_service() {
        assert_eq!(
            alert_message(&service(0, "db"), "connection refused"),
            "db (tcp 10.0.0.5:5432) unreachable: connection refused"
        );
        assert_eq!(
            alert_message(&service(0, ""), "timed out"),
            "tcp 10.0.0.5:5432 unreachable: timed out"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_queues_then_throttles() {
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = Dispatcher::new(gate(2), tx);
        let svc = service(0, "db");

        assert_eq!(
            dispatcher.on_failure(&svc, "refused"),
            Dispatch::Queued {
                next_delay: Duration::from_secs(2)
            }
        );
        assert_eq!(dispatcher.on_failure(&svc, "refused"), Dispatch::Throttled);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(
            dispatcher.on_failure(&svc, "refused"),
            Dispatch::Queued {
                next_delay: Duration::from_secs(4)
            }
        );

        assert_eq!(rx.try_recv().unwrap().service.id, ServiceId(0));
        assert_eq!(rx.try_recv().unwrap().service.id, ServiceId(0));
        assert!(rx.try_recv().is_err());

        let stats = dispatcher.stats();
        assert_eq!(stats.queued.load(Ordering::Relaxed), 2);
        assert_eq!(stats.throttled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(gate(60), tx);

        assert!(matches!(
            dispatcher.on_failure(&service(0, "a"), "x"),
            Dispatch::Queued { .. }
        ));
        assert_eq!(dispatcher.on_failure(&service(1, "b"), "x"), Dispatch::Dropped);
        assert_eq!(dispatcher.stats().dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_resets_only_when_enabled() {
        let (tx, _rx) = mpsc::channel(8);
        let svc = service(0, "db");

        let keep = Dispatcher::new(gate(60), tx.clone());
        keep.on_failure(&svc, "x");
        keep.on_recovery(&svc);
        assert_eq!(keep.on_failure(&svc, "x"), Dispatch::Throttled);

        let reset = Dispatcher::new(gate(60), tx).with_reset_on_recovery(true);
        reset.on_failure(&svc, "x");
        reset.on_recovery(&svc);
        assert!(matches!(reset.on_failure(&svc, "x"), Dispatch::Queued { .. }));
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<StdMutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn log_events_name_the_service_by_label() {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();

        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = Dispatcher::new(gate(60), tx).with_reset_on_recovery(true);
        let db = service(0, "db");
        let cache = service(1, "cache");

        tracing::subscriber::with_default(subscriber, || {
            dispatcher.on_failure(&db, "refused"); // queued
            dispatcher.on_failure(&db, "refused"); // throttled
            dispatcher.on_failure(&cache, "refused"); // dropped
            dispatcher.on_recovery(&db); // reset
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 4, "{output}");
        for line in lines {
            assert!(
                line.contains("service=db") || line.contains("service=cache"),
                "unexpected service field: {line}"
            );
            assert!(!line.contains("service=tcp"), "display form leaked: {line}");
        }
    }

    #[tokio::test]
    async fn workers_deliver_queued_alerts() {
        let recorder = Arc::new(Recorder::default());
        let notifiers = Arc::new(NotifierSet::new().with(recorder.clone()));
        let (tx, rx) = mpsc::channel(8);
        let handles = spawn_workers(2, rx, notifiers, Duration::from_secs(1));

        let dispatcher = Dispatcher::new(gate(60), tx);
        dispatcher.on_failure(&service(0, "a"), "refused");
        dispatcher.on_failure(&service(1, "b"), "refused");
        drop(dispatcher);

        for handle in handles {
            handle.await.unwrap();
        }

        let mut messages = recorder.messages.lock().unwrap().clone();
        messages.sort();
        assert_eq!(
            messages,
            vec![
                "a (tcp 10.0.0.5:5432) unreachable: refused",
                "b (tcp 10.0.0.5:5432) unreachable: refused",
            ]
        );
    }
}
