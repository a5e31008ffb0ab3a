use std::path::Path;

use anyhow::Context;
use warpwatch_core::{Resolved, WatchConfig};

pub fn validate(config_path: &Path) -> anyhow::Result<()> {
    let config = WatchConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let resolved = config.resolve()?;

    print!("{}", render(&resolved));
    println!("✓ {} is valid", config_path.display());
    Ok(())
}

/// Settings summary followed by one row per service.
pub fn render(resolved: &Resolved) -> String {
    let settings = &resolved.settings;
    let mut out = String::new();

    out.push_str(&format!(
        "max_connections={} backoff={}s x{} (max {}s) reset_on_recovery={}\n",
        settings.max_connections,
        settings.backoff.base.as_secs(),
        settings.backoff.multiplier,
        settings.backoff.max_delay.as_secs(),
        settings.reset_backoff_on_recovery,
    ));

    let mut channels = Vec::new();
    if resolved.notifications.log {
        channels.push("log".to_string());
    }
    for webhook in &resolved.notifications.webhooks {
        channels.push(format!("webhook {}", webhook.url));
    }
    out.push_str(&format!("notifications: {}\n\n", channels.join(", ")));

    out.push_str(&format!(
        "{:<4} {:<20} {:<6} {:<40} {:>8} {:>8}\n",
        "ID", "NAME", "PROTO", "TARGET", "INTERVAL", "TIMEOUT"
    ));
    for service in &resolved.services {
        out.push_str(&format!(
            "{:<4} {:<20} {:<6} {:<40} {:>7}s {:>7}s\n",
            service.id.0,
            service.name,
            service.protocol.as_str(),
            service.probe_address(),
            service.check_interval.as_secs(),
            service.timeout.as_secs(),
        ));
    }
    out
}
