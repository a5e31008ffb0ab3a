//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or resolving a watch config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("no services configured")]
    NoServices,

    #[error("service {service}: unknown protocol {protocol:?}")]
    UnknownProtocol { service: String, protocol: String },

    #[error("service {service}: http services require a url")]
    MissingUrl { service: String },

    #[error("service {service}: url {url:?} must start with http:// or https://")]
    InvalidUrl { service: String, url: String },

    #[error("service {service}: {protocol} services require host and port")]
    MissingAddress { service: String, protocol: String },

    #[error("webhook url {0:?} must start with http:// or https://")]
    InvalidWebhook(String),
}
