//! Notification channels.
//!
//! A [`Notifier`] delivers one message to one outside channel. The
//! [`NotifierSet`] fans a message out to every configured channel, bounding
//! each call with a timeout and absorbing failures: a broken channel is
//! logged and never reaches the polling path.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{NotifyError, NotifyResult};
use crate::probe::BoxFuture;

/// An outbound alert channel.
pub trait Notifier: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn notify<'a>(&'a self, message: &'a str) -> BoxFuture<'a, NotifyResult<()>>;
}

/// Writes alerts to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify<'a>(&'a self, message: &'a str) -> BoxFuture<'a, NotifyResult<()>> {
        Box::pin(async move {
            error!(alert = %message, "service unreachable");
            Ok(())
        })
    }
}

/// Every channel an alert goes to.
#[derive(Clone, Default)]
pub struct NotifierSet {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.push(notifier);
        self
    }

    pub fn push(&mut self, notifier: Arc<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.notifiers.iter().map(|n| n.name().to_string()).collect()
    }

    /// Deliver `message` to every channel; returns how many succeeded.
    pub async fn notify_all(&self, message: &str, timeout: Duration) -> usize {
        let mut delivered = 0;
        for notifier in &self.notifiers {
            let result = tokio::time::timeout(timeout, notifier.notify(message))
                .await
                .unwrap_or(Err(NotifyError::Timeout(timeout)));

            match result {
                Ok(()) => {
                    delivered += 1;
                    debug!(channel = notifier.name(), "notification delivered");
                }
                Err(e) => {
                    warn!(channel = notifier.name(), error = %e, "notification failed");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for NotifierSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
