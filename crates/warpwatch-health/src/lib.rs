//! warpwatch-health — the polling engine behind warpwatch.
//!
//! Checks a fixed set of services on independent intervals, caps how many
//! checks run at once, and turns failures into rate-limited alerts.
//!
//! # Architecture
//!
//! ```text
//! Monitor
//!   ├── scheduler per service ── tick every check_interval
//!   │     └── BoundedExecutor::submit (waits for a slot)
//!   │           └── probe task: Prober::probe → CheckReport
//!   ├── result routing ── logs outcome, forwards a verdict
//!   ├── verdict routing ── Dispatcher::on_failure / on_recovery
//!   │     └── BackoffGate::try_notify → bounded alert queue
//!   └── notification workers ── NotifierSet::notify_all
//! ```
//!
//! # Backoff
//!
//! The first failure of a service always alerts. Each alert pushes the next
//! one out by a delay that starts at `exponential_backoff_seconds` and grows
//! by `backoff_multiplier`, so a service that stays down alerts less and less
//! often. By default a recovery does not reset the stage; set
//! `reset_backoff_on_recovery` to change that.

pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod scheduler;
mod transport;
pub mod webhook;

pub use backoff::{Advance, BackoffGate, BackoffState};
pub use dispatcher::{Alert, Dispatch, Dispatcher};
pub use error::{ExecutorClosed, NotifyError, NotifyResult, ProbeError};
pub use executor::{BoundedExecutor, CheckReport};
pub use monitor::{Monitor, RunSummary};
pub use notify::{LogNotifier, Notifier, NotifierSet};
pub use probe::{BoxFuture, CheckOutcome, NetProber, Prober, http_probe, tcp_probe, udp_probe};
pub use webhook::WebhookNotifier;
