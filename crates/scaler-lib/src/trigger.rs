//! Leader-only periodic work
//!
//! Two cadences share one task: the reactive check of every application, and
//! the slower trends re-analysis that refreshes the prediction schedule.

use crate::health::{components, HealthRegistry};
use crate::leader::Leadership;
use crate::reactive::ReactiveExecutor;
use crate::scheduler::PredictionScheduler;
use crate::store::ControllerStorage;
use crate::trends::TrendsLearner;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the periodic trigger
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Interval between reactive checks of all applications
    pub periodic_trigger: Duration,
    /// Interval between trends re-analyses
    pub analysis_interval: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            periodic_trigger: Duration::from_secs(30),
            analysis_interval: Duration::from_secs(3600),
        }
    }
}

struct TriggerInner {
    reactive: Arc<ReactiveExecutor>,
    trends: TrendsLearner,
    scheduler: Arc<PredictionScheduler>,
    controllers: Arc<dyn ControllerStorage>,
    leadership: Arc<dyn Leadership>,
    health: HealthRegistry,
    config: TriggerConfig,
}

pub struct PeriodicTrigger {
    inner: Arc<TriggerInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTrigger {
    pub fn new(
        reactive: Arc<ReactiveExecutor>,
        trends: TrendsLearner,
        scheduler: Arc<PredictionScheduler>,
        controllers: Arc<dyn ControllerStorage>,
        leadership: Arc<dyn Leadership>,
        health: HealthRegistry,
        config: TriggerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TriggerInner {
                reactive,
                trends,
                scheduler,
                controllers,
                leadership,
                health,
                config,
            }),
            task: Mutex::new(None),
        }
    }

    /// Arm both cadences. Returns whether the trigger is running afterwards;
    /// a follower never arms.
    pub async fn start(&self) -> bool {
        if !self.inner.leadership.is_leader() {
            debug!("Not leader, periodic trigger not armed");
            return false;
        }

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }

        info!(
            periodic_secs = self.inner.config.periodic_trigger.as_secs(),
            analysis_secs = self.inner.config.analysis_interval.as_secs(),
            "Starting periodic trigger"
        );
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run().await }));
        true
    }

    /// Cancel both cadences. Safe to call repeatedly.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("Periodic trigger stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Re-analyse every application and publish the results
    pub async fn refresh_predictions(&self) -> usize {
        self.inner.refresh_predictions().await
    }
}

impl TriggerInner {
    async fn run(&self) {
        let mut checks = interval(self.config.periodic_trigger);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut analyses = interval(self.config.analysis_interval);
        analyses.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = checks.tick() => {
                    self.reactive.debouncer().evict_expired();
                    if self.leadership.is_leader() {
                        self.reactive.check_all_applications().await;
                    }
                }
                _ = analyses.tick() => {
                    if self.leadership.is_leader() {
                        self.refresh_predictions().await;
                    }
                }
            }
        }
    }

    async fn refresh_predictions(&self) -> usize {
        let applications = match self.controllers.list_applications().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(
                    operation = "list_applications",
                    error = %e,
                    error_kind = e.kind(),
                    "Failed to list applications"
                );
                self.health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
                self.health
                    .set_degraded(components::TRIGGER, "application list unreadable")
                    .await;
                return 0;
            }
        };

        let mut published = 0;
        let mut failures = 0;
        for application_id in &applications {
            let outcome = self.trends.run_analysis(application_id).await;
            if outcome.error.is_some() {
                // keep the previous schedule rather than clearing it
                failures += 1;
                continue;
            }
            let count = outcome.predictions.len();
            match self.scheduler.publish(application_id, outcome.predictions).await {
                Ok(()) => published += count,
                Err(e) => {
                    failures += 1;
                    warn!(
                        application_id = %application_id,
                        operation = "publish_predictions",
                        error = %e,
                        error_kind = e.kind(),
                        "Failed to publish predictions"
                    );
                }
            }
        }

        if failures == 0 {
            self.health.set_healthy(components::TRIGGER).await;
        } else {
            let reason = format!("{failures} of {} analyses failed", applications.len());
            self.health.set_degraded(components::TRIGGER, reason).await;
        }
        debug!(applications = applications.len(), published, "Prediction schedule refreshed");
        published
    }
}
