//! Per-service notification backoff.
//!
//! Each service owns one [`BackoffState`] for the life of the process. A
//! fresh entry is always ready; every notification moves the entry one
//! stage further, growing the delay geometrically from the configured base
//! up to `max_delay`. The table is fixed at construction and every entry has
//! its own lock, so failures for different services never contend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use warpwatch_core::{BackoffSettings, ServiceId};

/// Notification throttle state for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffState {
    /// No notification sent yet; the next failure notifies immediately.
    Fresh,
    /// Notified at least once; quiet until `next_eligible_at`.
    Throttled {
        next_eligible_at: Instant,
        current_stage_delay: Duration,
    },
}

impl BackoffState {
    fn is_ready(&self, now: Instant) -> bool {
        match self {
            BackoffState::Fresh => true,
            BackoffState::Throttled {
                next_eligible_at, ..
            } => now >= *next_eligible_at,
        }
    }
}

/// Returned whenever a service moves to its next backoff stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub delay: Duration,
    pub next_eligible_at: Instant,
}

/// Decides whether a failing service may notify now.
#[derive(Debug)]
pub struct BackoffGate {
    settings: BackoffSettings,
    entries: HashMap<ServiceId, Mutex<BackoffState>>,
}

impl BackoffGate {
    /// Create a gate with a fresh entry for every service.
    pub fn new(settings: BackoffSettings, services: impl IntoIterator<Item = ServiceId>) -> Self {
        let settings = BackoffSettings {
            multiplier: settings.multiplier.max(1.0),
            ..settings
        };
        let entries = services
            .into_iter()
            .map(|id| (id, Mutex::new(BackoffState::Fresh)))
            .collect();
        Self { settings, entries }
    }

    pub fn settings(&self) -> &BackoffSettings {
        &self.settings
    }

    /// Whether a notification for `id` may go out now.
    pub fn is_ready(&self, id: ServiceId) -> bool {
        self.lock(id)
            .map(|state| state.is_ready(Instant::now()))
            .unwrap_or(false)
    }

    /// Move `id` to its next stage, starting the delay from now.
    pub fn advance(&self, id: ServiceId) -> Option<Advance> {
        let mut state = self.lock(id)?;
        Some(self.advance_locked(&mut state, Instant::now()))
    }

    /// Check readiness and advance in one critical section.
    ///
    /// Returns `None` when the service is still throttled, so two
    /// simultaneous failures can never both notify.
    pub fn try_notify(&self, id: ServiceId) -> Option<Advance> {
        let mut state = self.lock(id)?;
        let now = Instant::now();
        if !state.is_ready(now) {
            return None;
        }
        Some(self.advance_locked(&mut state, now))
    }

    /// Forget every stage for `id`; its next failure notifies immediately.
    pub fn reset(&self, id: ServiceId) {
        if let Some(mut state) = self.lock(id) {
            *state = BackoffState::Fresh;
        }
    }

    /// Snapshot of the current state for `id`.
    pub fn state(&self, id: ServiceId) -> Option<BackoffState> {
        self.lock(id).map(|state| *state)
    }

    fn advance_locked(&self, state: &mut BackoffState, now: Instant) -> Advance {
        let delay = match *state {
            BackoffState::Fresh => self.settings.base,
            BackoffState::Throttled {
                current_stage_delay,
                ..
            } => self.grow(current_stage_delay),
        }
        .min(self.settings.max_delay);

        let next_eligible_at = deadline_after(now, delay);
        *state = BackoffState::Throttled {
            next_eligible_at,
            current_stage_delay: delay,
        };

        Advance {
            delay,
            next_eligible_at,
        }
    }

    fn grow(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.settings.multiplier)
            .unwrap_or(self.settings.max_delay)
    }

    fn lock(&self, id: ServiceId) -> Option<MutexGuard<'_, BackoffState>> {
        match self.entries.get(&id) {
            Some(entry) => Some(entry.lock().unwrap_or_else(PoisonError::into_inner)),
            None => {
                warn!(service = %id, "no backoff entry for service");
                None
            }
        }
    }
}

/// `now + delay`, or roughly thirty years out when that instant cannot be
/// represented.
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(Duration::from_secs(86_400 * 365 * 30)))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn settings(base_secs: u64, multiplier: f64, max_secs: u64) -> BackoffSettings {
        BackoffSettings {
            base: Duration::from_secs(base_secs),
            multiplier,
            max_delay: Duration::from_secs(max_secs),
        }
    }

    fn gate(base_secs: u64) -> BackoffGate {
        BackoffGate::new(settings(base_secs, 2.0, 3600), [ServiceId(0), ServiceId(1)])
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_ready() {
        let gate = gate(2);
        assert_eq!(gate.state(ServiceId(0)), Some(BackoffState::Fresh));
        assert!(gate.is_ready(ServiceId(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_every_second_notify_on_backoff_schedule() {
        let gate = gate(2);
        let id = ServiceId(0);

        let mut notified_at = Vec::new();
        for t in 0..=10u64 {
            if gate.try_notify(id).is_some() {
                notified_at.push(t);
            }
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // Delays 2s, 4s, 8s starting from t=0.
        assert_eq!(notified_at, vec![0, 2, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_advance_uses_base_delay() {
        let gate = gate(2);
        let start = Instant::now();
        let advance = gate.try_notify(ServiceId(0)).unwrap();
        assert_eq!(advance.delay, Duration::from_secs(2));
        assert_eq!(advance.next_eligible_at, start + Duration::from_secs(2));
        assert!(!gate.is_ready(ServiceId(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn delays_never_shrink_and_respect_cap() {
        let gate = BackoffGate::new(settings(1, 3.0, 20), [ServiceId(0)]);
        let mut delays = Vec::new();
        for _ in 0..6 {
            delays.push(gate.advance(ServiceId(0)).unwrap().delay.as_secs());
        }
        assert_eq!(delays, vec![1, 3, 9, 20, 20, 20]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn sub_unit_multiplier_is_clamped() {
        let gate = BackoffGate::new(settings(4, 0.5, 60), [ServiceId(0)]);
        assert_eq!(gate.settings().multiplier, 1.0);
        let first = gate.advance(ServiceId(0)).unwrap().delay;
        let second = gate.advance(ServiceId(0)).unwrap().delay;
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_delay_throttles_instead_of_panicking() {
        let huge = BackoffSettings {
            base: Duration::from_secs(i64::MAX as u64),
            multiplier: 2.0,
            max_delay: Duration::MAX,
        };
        let gate = BackoffGate::new(huge, [ServiceId(0)]);
        let start = Instant::now();

        let advance = gate.try_notify(ServiceId(0)).unwrap();
        assert_eq!(advance.delay, Duration::from_secs(i64::MAX as u64));
        assert!(advance.next_eligible_at > start);
        assert!(!gate.is_ready(ServiceId(0)));

        // Growing past the representable range stays throttled as well.
        assert!(gate.advance(ServiceId(0)).is_some());
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(gate.try_notify(ServiceId(0)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn services_are_independent() {
        let gate = gate(5);
        assert!(gate.try_notify(ServiceId(0)).is_some());
        assert!(!gate.is_ready(ServiceId(0)));
        assert!(gate.is_ready(ServiceId(1)));
        assert!(gate.try_notify(ServiceId(1)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_returns_to_fresh() {
        let gate = gate(5);
        gate.try_notify(ServiceId(0));
        gate.try_notify(ServiceId(0));
        assert!(!gate.is_ready(ServiceId(0)));

        gate.reset(ServiceId(0));
        assert_eq!(gate.state(ServiceId(0)), Some(BackoffState::Fresh));
        let advance = gate.try_notify(ServiceId(0)).unwrap();
        assert_eq!(advance.delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_service_is_never_ready() {
        let gate = gate(1);
        assert!(!gate.is_ready(ServiceId(42)));
        assert!(gate.try_notify(ServiceId(42)).is_none());
        assert!(gate.state(ServiceId(42)).is_none());
    }

    #[test]
    fn concurrent_failures_notify_once() {
        let gate = Arc::new(gate(60));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_notify(ServiceId(0)).is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
