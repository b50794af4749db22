//! Prediction scheduler
//!
//! Fires queued predictions at their absolute time. A single task sleeps
//! until the earliest prediction is due, executes it at most once, then
//! re-reads the schedule. The task only runs while this replica leads.

use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::history::PerformanceHistory;
use crate::leader::Leadership;
use crate::models::{epoch_millis, EventSource, Prediction, PredictionContext, ScaleAction};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::scaling::{apply_scale_constraints, current_replicas, ScalingExecutor};
use crate::store::{ControllerStorage, CoordinationStore, ScaleConfigStorage};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheduler states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No timer armed
    Idle,
    /// Waiting for the next prediction
    Scheduled,
    /// Firing a prediction
    Executing,
}

/// Configuration for the prediction scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest single sleep before the schedule is re-read
    pub max_wait: Duration,
    /// Delay before retrying after a coordination store failure
    pub retry_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(300),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Collaborators the scheduler needs to turn a prediction into a replica change
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn CoordinationStore>,
    pub controllers: Arc<dyn ControllerStorage>,
    pub scale_configs: Arc<dyn ScaleConfigStorage>,
    pub executor: Option<Arc<dyn ScalingExecutor>>,
    pub history: Option<PerformanceHistory>,
    pub leadership: Arc<dyn Leadership>,
    pub health: HealthRegistry,
}

struct SchedulerInner {
    deps: SchedulerDeps,
    config: SchedulerConfig,
    state: watch::Sender<SchedulerState>,
    running: AtomicBool,
    rearm: Notify,
    /// Set under the task lock when a live task was asked to re-read
    rearm_requested: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

/// Prediction scheduler
pub struct PredictionScheduler {
    inner: Arc<SchedulerInner>,
}

impl PredictionScheduler {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig, logger: StructuredLogger) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            inner: Arc::new(SchedulerInner {
                deps,
                config,
                state,
                running: AtomicBool::new(false),
                rearm: Notify::new(),
                rearm_requested: AtomicBool::new(false),
                task: Mutex::new(None),
                metrics: ScalerMetrics::new(),
                logger,
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    /// Receiver observing every state transition
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.subscribe()
    }

    /// Arm the timer for the earliest queued prediction. Does nothing unless
    /// this replica is the leader.
    pub async fn start(&self) {
        if !self.inner.deps.leadership.is_leader() {
            debug!("Not leader, scheduler stays idle");
            self.inner.set_state(SchedulerState::Idle);
            return;
        }
        self.inner.running.store(true, Ordering::SeqCst);
        self.arm().await;
    }

    /// Cancel the armed timer. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.task.lock().await.take() {
            handle.abort();
            debug!("Prediction scheduler stopped");
        }
        self.inner.set_state(SchedulerState::Idle);
    }

    /// Replace an application's predictions and re-arm if running
    pub async fn publish(&self, application_id: &str, predictions: Vec<Prediction>) -> Result<()> {
        let count = predictions.len();
        self.inner
            .deps
            .store
            .replace_predictions(application_id, predictions)
            .await?;
        debug!(application_id = %application_id, predictions = count, "Predictions published");

        if self.inner.running.load(Ordering::SeqCst) {
            self.arm().await;
        }
        Ok(())
    }

    /// Queued predictions, earliest first
    pub async fn pending(&self) -> Result<Vec<Prediction>> {
        self.inner.deps.store.predictions().await
    }

    async fn arm(&self) {
        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            self.inner.rearm_requested.store(true, Ordering::SeqCst);
            self.inner.rearm.notify_one();
            return;
        }
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run().await }));
    }
}

impl SchedulerInner {
    fn set_state(&self, state: SchedulerState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Decide under the task lock whether the task may exit. Returns false
    /// when a re-arm arrived since the schedule was last read.
    async fn try_exit(&self) -> bool {
        let mut task = self.task.lock().await;
        if self.rearm_requested.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.set_state(SchedulerState::Idle);
        // detach our own handle so the next arm spawns a fresh task
        task.take();
        true
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.rearm_requested.store(false, Ordering::SeqCst);
            let next = match self.deps.store.predictions().await {
                Ok(predictions) => {
                    self.deps.health.set_healthy(components::STORE).await;
                    self.deps.health.set_healthy(components::SCHEDULER).await;
                    self.metrics.set_pending_predictions(predictions.len());
                    predictions.into_iter().next()
                }
                Err(e) => {
                    warn!(
                        operation = "load_predictions",
                        error_kind = e.kind(),
                        error = %e,
                        "Failed to read prediction schedule"
                    );
                    self.deps
                        .health
                        .set_degraded(components::STORE, e.to_string())
                        .await;
                    self.deps
                        .health
                        .set_degraded(components::SCHEDULER, "prediction schedule unreadable")
                        .await;
                    self.set_state(SchedulerState::Scheduled);
                    tokio::time::sleep(self.config.retry_interval).await;
                    continue;
                }
            };

            let Some(next) = next else {
                if self.try_exit().await {
                    debug!("No predictions queued, scheduler idle");
                    return;
                }
                continue;
            };

            self.set_state(SchedulerState::Scheduled);
            let due_in =
                Duration::from_millis((next.absolute_time - epoch_millis()).max(0) as u64);
            let wait = due_in.min(self.config.max_wait);
            debug!(
                application_id = %next.application_id,
                action = %next.action,
                wait_ms = wait.as_millis() as u64,
                "Prediction timer armed"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.rearm.notified() => continue,
            }
            if wait < due_in {
                continue;
            }

            self.set_state(SchedulerState::Executing);
            if !self.deps.leadership.is_leader() {
                info!(
                    application_id = %next.application_id,
                    "Leadership lost before prediction fired, leaving it queued"
                );
                self.running.store(false, Ordering::SeqCst);
                if self.try_exit().await {
                    return;
                }
                continue;
            }

            if !self.fire(next).await {
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }
    }

    /// Take the prediction off the schedule, then apply it. Returns false only
    /// when the store could not be reached.
    async fn fire(&self, prediction: Prediction) -> bool {
        let application_id = prediction.application_id.clone();

        match self.deps.store.remove_prediction(&prediction.key()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(application_id = %application_id, "Prediction already taken");
                return true;
            }
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "remove_prediction",
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to dequeue prediction, not executing"
                );
                self.deps
                    .health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
                return false;
            }
        }

        let executed = self.apply(&prediction).await;
        if executed {
            self.metrics.inc_predictions_executed();
        } else {
            self.metrics.inc_predictions_skipped();
        }
        self.logger.log_prediction_executed(
            &application_id,
            prediction.action,
            prediction.pods,
            prediction.confidence,
            prediction.absolute_time,
            executed,
        );
        true
    }

    async fn apply(&self, prediction: &Prediction) -> bool {
        let application_id = prediction.application_id.as_str();

        let Some(executor) = &self.deps.executor else {
            warn!(application_id = %application_id, "No scaling executor configured");
            return false;
        };

        let current = match current_replicas(
            executor.as_ref(),
            self.deps.controllers.as_ref(),
            application_id,
        )
        .await
        {
            Ok(Some(replicas)) => replicas,
            Ok(None) => {
                debug!(application_id = %application_id, "No controller for prediction");
                return false;
            }
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "current_replicas",
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to read replica count"
                );
                return false;
            }
        };

        let scale_config = match self.deps.scale_configs.scale_config(application_id).await {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "scale_config",
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to read scale config, using defaults"
                );
                Default::default()
            }
        };

        let pods = i64::from(prediction.pods);
        let desired = match prediction.action {
            ScaleAction::Up => i64::from(current) + pods,
            ScaleAction::Down => i64::from(current) - pods,
        };
        let target = apply_scale_constraints(desired, scale_config.min_pods, scale_config.max_pods);
        if target == current {
            debug!(application_id = %application_id, current, "Prediction needs no change");
            return false;
        }

        let pre_metrics = match &self.deps.history {
            Some(history) => history.current_metrics(application_id).await,
            None => None,
        };

        let reason = format!(
            "prediction: scale {} by {} at time of day {}s (confidence {:.2})",
            prediction.action, prediction.pods, prediction.time_of_day, prediction.confidence
        );
        match executor.execute_scaling(application_id, target, &reason).await {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                warn!(
                    application_id = %application_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Prediction scaling rejected"
                );
                return false;
            }
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "execute_scaling",
                    error_kind = e.kind(),
                    error = %e,
                    "Prediction scaling failed"
                );
                return false;
            }
        }

        self.metrics
            .inc_scaling_action(EventSource::Prediction, prediction.action);
        self.logger.log_scaling_action(
            application_id,
            EventSource::Prediction,
            current,
            target,
            &reason,
        );

        if let Some(history) = &self.deps.history {
            let mut request = history.scaling_request(
                application_id,
                i64::from(target) - i64::from(current),
                target,
                pre_metrics.unwrap_or_default(),
                EventSource::Prediction,
            );
            request.prediction = Some(PredictionContext {
                confidence: prediction.confidence,
                time_of_day: prediction.time_of_day,
                reasons: prediction.reasons.clone(),
            });
            history.scaling_evaluation(request).await;
        }
        true
    }
}
