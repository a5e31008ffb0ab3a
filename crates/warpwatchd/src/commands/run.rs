use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use warpwatch_core::{NotificationSettings, WatchConfig};
use warpwatch_health::{LogNotifier, Monitor, NotifierSet, WebhookNotifier};

pub async fn run(config_path: &Path, duration_secs: u64) -> anyhow::Result<()> {
    let config = WatchConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let resolved = config.resolve()?;

    info!(
        path = %config_path.display(),
        services = resolved.services.len(),
        "warpwatch starting"
    );

    let notifiers = build_notifiers(&resolved.notifications)?;
    let monitor = Monitor::new(resolved.settings, resolved.services, notifiers);

    let duration = (duration_secs > 0).then(|| Duration::from_secs(duration_secs));
    let summary = monitor.run_for(duration).await;

    info!(
        checks = summary.checks,
        failures = summary.failures,
        notifications = summary.notifications,
        throttled = summary.throttled,
        dropped = summary.dropped,
        "warpwatch stopped"
    );
    Ok(())
}

/// Build the notification channels named in the config.
pub fn build_notifiers(settings: &NotificationSettings) -> anyhow::Result<NotifierSet> {
    let mut notifiers = NotifierSet::new();
    if settings.log {
        notifiers.push(Arc::new(LogNotifier));
    }
    for target in &settings.webhooks {
        let webhook = WebhookNotifier::new(&target.url)
            .with_context(|| format!("webhook {}", target.url))?;
        notifiers.push(Arc::new(webhook));
    }
    Ok(notifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpwatch_core::WebhookTarget;

    #[test]
    fn builds_log_and_webhook_channels() {
        let settings = NotificationSettings {
            log: true,
            webhooks: vec![WebhookTarget {
                url: "http://127.0.0.1:9/hook".to_string(),
            }],
        };
        let notifiers = build_notifiers(&settings).unwrap();
        assert_eq!(notifiers.len(), 2);
        assert_eq!(notifiers.names()[0], "log");
    }

    #[test]
    fn bad_webhook_url_fails_startup() {
        let settings = NotificationSettings {
            log: false,
            webhooks: vec![WebhookTarget {
                url: "ftp://example.com".to_string(),
            }],
        };
        assert!(build_notifiers(&settings).is_err());
    }
}
