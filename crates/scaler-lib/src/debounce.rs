//! Per-pod debouncing of unhealthy alerts
//!
//! An alert storm from one pod must not translate into a storm of scaling
//! checks. Each pod keeps its own last-triggered instant; pods never affect
//! each other's window.

use crate::models::PodAlert;
use crate::observability::ScalerMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default debounce window (60 seconds)
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of feeding an alert through the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceOutcome {
    /// Unhealthy alert outside the window; the reactive path should run
    Notify,
    /// Unhealthy alert inside the window of a previous notification
    Suppressed,
    /// Healthy alerts never notify
    Healthy,
}

impl DebounceOutcome {
    pub fn should_notify(&self) -> bool {
        matches!(self, DebounceOutcome::Notify)
    }
}

/// Alert debouncer with a runtime-adjustable window
pub struct AlertDebouncer {
    window_ms: AtomicU64,
    /// pod id -> last notification
    last_triggered: DashMap<String, Instant>,
    metrics: ScalerMetrics,
}

impl Default for AlertDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl AlertDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: AtomicU64::new(window.as_millis() as u64),
            last_triggered: DashMap::new(),
            metrics: ScalerMetrics::new(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms.load(Ordering::SeqCst))
    }

    /// Change the window; takes effect for the next alert
    pub fn set_window(&self, window: Duration) {
        self.window_ms
            .store(window.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn process(&self, alert: &PodAlert) -> DebounceOutcome {
        self.process_at(alert, Instant::now())
    }

    /// Clock-injected form of [`process`](Self::process)
    pub fn process_at(&self, alert: &PodAlert, now: Instant) -> DebounceOutcome {
        if alert.healthy {
            return DebounceOutcome::Healthy;
        }

        let window = self.window();
        self.evict_expired_at(now);
        let notify = match self.last_triggered.entry(alert.pod_id.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
            Entry::Occupied(mut occupied) => {
                if now.saturating_duration_since(*occupied.get()) > window {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
        };

        if notify {
            DebounceOutcome::Notify
        } else {
            debug!(
                application_id = %alert.application_id,
                pod_id = %alert.pod_id,
                window_ms = window.as_millis() as u64,
                "Unhealthy alert suppressed"
            );
            self.metrics.inc_alerts_suppressed();
            DebounceOutcome::Suppressed
        }
    }

    /// Last notification instant for a pod
    pub fn last_triggered(&self, pod_id: &str) -> Option<Instant> {
        self.last_triggered.get(pod_id).map(|t| *t)
    }

    /// Drop entries whose window has fully elapsed
    pub fn evict_expired(&self) {
        self.evict_expired_at(Instant::now());
    }

    fn evict_expired_at(&self, now: Instant) {
        let window = self.window();
        self.last_triggered
            .retain(|_, last| now.saturating_duration_since(*last) <= window);
    }

    pub fn tracked_pods(&self) -> usize {
        self.last_triggered.len()
    }
}
