//! warpwatch.toml configuration parser.
//!
//! The raw file is deserialized into [`WatchConfig`], which keeps every field
//! optional. [`WatchConfig::resolve`] then substitutes defaults, validates
//! each service and produces the immutable [`Resolved`] view the monitor runs
//! on. Non-positive intervals and timeouts are not errors; they fall back to
//! the `[monitor]` values. Every duration is capped at one year.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub check_interval: Option<i64>,
    pub timeout: Option<i64>,
    pub max_connections: Option<usize>,
    pub exponential_backoff_seconds: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_backoff_seconds: Option<u64>,
    pub reset_backoff_on_recovery: Option<bool>,
    pub notification_queue: Option<usize>,
    pub notification_workers: Option<usize>,
    pub notify_timeout: Option<u64>,
    pub drain_timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub log: Option<bool>,
    pub webhook: Option<Vec<WebhookConfig>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,
    pub url: Option<String>,
    #[serde(alias = "ip_address")]
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: String,
    pub check_interval: Option<i64>,
    pub timeout: Option<i64>,
}

impl WatchConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config watching a single local TCP port.
    pub fn scaffold() -> Self {
        WatchConfig {
            monitor: MonitorConfig {
                check_interval: Some(DEFAULT_CHECK_INTERVAL_SECS as i64),
                timeout: Some(DEFAULT_TIMEOUT_SECS as i64),
                max_connections: Some(DEFAULT_MAX_CONNECTIONS),
                exponential_backoff_seconds: Some(DEFAULT_BACKOFF_SECS),
                ..MonitorConfig::default()
            },
            notifications: NotificationsConfig {
                log: Some(true),
                webhook: None,
            },
            services: vec![ServiceConfig {
                name: "local-ssh".to_string(),
                url: None,
                host: Some("127.0.0.1".to_string()),
                port: Some(22),
                protocol: "tcp".to_string(),
                check_interval: None,
                timeout: None,
            }],
        }
    }

    /// Substitute defaults and validate, producing the runtime view.
    pub fn resolve(&self) -> ConfigResult<Resolved> {
        let settings = self.monitor.resolve();

        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }

        let services = self
            .services
            .iter()
            .enumerate()
            .map(|(index, raw)| raw.resolve(ServiceId(index), &settings))
            .collect::<ConfigResult<Vec<_>>>()?;

        let notifications = self.notifications.resolve()?;

        Ok(Resolved {
            settings,
            notifications,
            services,
        })
    }
}

impl MonitorConfig {
    fn resolve(&self) -> MonitorSettings {
        let defaults = MonitorSettings::default();

        let multiplier = match self.backoff_multiplier {
            Some(m) if m.is_finite() && m >= 1.0 => m,
            _ => DEFAULT_BACKOFF_MULTIPLIER,
        };

        MonitorSettings {
            check_interval: positive_secs(self.check_interval).unwrap_or(defaults.check_interval),
            timeout: positive_secs(self.timeout).unwrap_or(defaults.timeout),
            max_connections: nonzero(self.max_connections).unwrap_or(defaults.max_connections),
            backoff: BackoffSettings {
                base: nonzero_secs(self.exponential_backoff_seconds)
                    .unwrap_or(defaults.backoff.base),
                multiplier,
                max_delay: nonzero_secs(self.max_backoff_seconds)
                    .unwrap_or(defaults.backoff.max_delay),
            },
            reset_backoff_on_recovery: self.reset_backoff_on_recovery.unwrap_or(false),
            notification_queue: nonzero(self.notification_queue)
                .unwrap_or(defaults.notification_queue),
            notification_workers: nonzero(self.notification_workers)
                .unwrap_or(defaults.notification_workers),
            notify_timeout: nonzero_secs(self.notify_timeout).unwrap_or(defaults.notify_timeout),
            drain_timeout: nonzero_secs(self.drain_timeout),
        }
    }
}

impl NotificationsConfig {
    fn resolve(&self) -> ConfigResult<NotificationSettings> {
        let webhooks = self
            .webhook
            .iter()
            .flatten()
            .map(|hook| {
                if is_http_url(&hook.url) {
                    Ok(WebhookTarget {
                        url: hook.url.clone(),
                    })
                } else {
                    Err(ConfigError::InvalidWebhook(hook.url.clone()))
                }
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(NotificationSettings {
            // With no channel configured at all, failures would vanish silently.
            log: self.log.unwrap_or(webhooks.is_empty()),
            webhooks,
        })
    }
}

impl ServiceConfig {
    fn resolve(&self, id: ServiceId, settings: &MonitorSettings) -> ConfigResult<Service> {
        let label = if self.name.is_empty() {
            id.to_string()
        } else {
            self.name.clone()
        };

        let protocol: Protocol =
            self.protocol
                .parse()
                .map_err(|protocol| ConfigError::UnknownProtocol {
                    service: label.clone(),
                    protocol,
                })?;

        let host = self.host.clone().unwrap_or_default();
        let port = self.port.unwrap_or_default();

        match protocol {
            Protocol::Http => match &self.url {
                None => return Err(ConfigError::MissingUrl { service: label }),
                Some(url) if !is_http_url(url) => {
                    return Err(ConfigError::InvalidUrl {
                        service: label,
                        url: url.clone(),
                    });
                }
                Some(_) => {}
            },
            Protocol::Tcp | Protocol::Udp => {
                if host.is_empty() || port == 0 {
                    return Err(ConfigError::MissingAddress {
                        service: label,
                        protocol: protocol.to_string(),
                    });
                }
            }
        }

        Ok(Service {
            id,
            name: self.name.clone(),
            url: self.url.clone(),
            host,
            port,
            protocol,
            check_interval: positive_secs(self.check_interval).unwrap_or(settings.check_interval),
            timeout: positive_secs(self.timeout).unwrap_or(settings.timeout),
        })
    }
}

/// Larger values are capped at [`MAX_DURATION_SECS`].
fn positive_secs(value: Option<i64>) -> Option<Duration> {
    value
        .filter(|v| *v > 0)
        .map(|v| Duration::from_secs((v as u64).min(MAX_DURATION_SECS)))
}

fn nonzero_secs(value: Option<u64>) -> Option<Duration> {
    value
        .filter(|v| *v > 0)
        .map(|v| Duration::from_secs(v.min(MAX_DURATION_SECS)))
}

fn nonzero(value: Option<usize>) -> Option<usize> {
    value.filter(|v| *v > 0)
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
