//! Resolved types shared across warpwatch crates.
//!
//! Everything here is produced by [`crate::WatchConfig::resolve`] and is
//! immutable for the lifetime of a monitor run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Check interval applied when a service omits it or sets it non-positive.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;
/// Probe timeout applied when a service omits it or sets it non-positive.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
/// Upper bound on concurrently running probes.
pub const DEFAULT_MAX_CONNECTIONS: usize = 50;
/// Delay after the first notification for a failing service.
pub const DEFAULT_BACKOFF_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Ceiling for the notification delay (one day).
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 86_400;
pub const DEFAULT_NOTIFICATION_QUEUE: usize = 64;
pub const DEFAULT_NOTIFICATION_WORKERS: usize = 4;
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 10;
/// Longest interval, timeout or delay a config file may set (one year).
pub const MAX_DURATION_SECS: u64 = 365 * 86_400;

/// Transport used to check a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "http" | "https" => Ok(Protocol::Http),
            other => Err(other.to_string()),
        }
    }
}

/// Stable identity of a service within one run: its index in the loaded list.
///
/// Two services pointing at the same host and port are still distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub usize);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A service to watch, with defaults already substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: ServiceId,
    pub name: String,
    /// Target URL, required for `http`.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Always non-zero.
    pub check_interval: Duration,
    /// Always non-zero.
    pub timeout: Duration,
}

impl Service {
    /// Address handed to the prober: the URL for http, `host:port` otherwise.
    pub fn probe_address(&self) -> String {
        match (self.protocol, &self.url) {
            (Protocol::Http, Some(url)) => url.clone(),
            _ => self.socket_address(),
        }
    }

    pub fn socket_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Name used in logs; falls back to the display form for unnamed services.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.to_string()
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.protocol, &self.url) {
            (Protocol::Http, Some(url)) if self.host.is_empty() => {
                write!(f, "{} {}", self.protocol, url)
            }
            _ => write!(f, "{} {}", self.protocol, self.socket_address()),
        }
    }
}

/// Exponential backoff parameters for notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSettings {
    /// Delay after the first notification.
    pub base: Duration,
    /// Growth factor between consecutive stages, at least 1.0.
    pub multiplier: f64,
    /// Delays never exceed this.
    pub max_delay: Duration,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
        }
    }
}

/// Process-wide monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub check_interval: Duration,
    pub timeout: Duration,
    pub max_connections: usize,
    pub backoff: BackoffSettings,
    /// Return a service's backoff to its first stage after a successful check.
    pub reset_backoff_on_recovery: bool,
    pub notification_queue: usize,
    pub notification_workers: usize,
    pub notify_timeout: Duration,
    /// Wait this long for in-flight probes on shutdown. `None` stops abruptly.
    pub drain_timeout: Option<Duration>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            backoff: BackoffSettings::default(),
            reset_backoff_on_recovery: false,
            notification_queue: DEFAULT_NOTIFICATION_QUEUE,
            notification_workers: DEFAULT_NOTIFICATION_WORKERS,
            notify_timeout: Duration::from_secs(DEFAULT_NOTIFY_TIMEOUT_SECS),
            drain_timeout: None,
        }
    }
}

/// A webhook notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTarget {
    pub url: String,
}

/// Notification channels to build at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSettings {
    pub log: bool,
    pub webhooks: Vec<WebhookTarget>,
}

/// Fully resolved configuration, ready for the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub settings: MonitorSettings,
    pub notifications: NotificationSettings,
    pub services: Vec<Service>,
}
