//! Reactive scaling from live pod signals
//!
//! Runs on debounced unhealthy alerts and on the periodic trigger. Decisions
//! are made from the current per-pod snapshots only; learned predictions are
//! handled by the scheduler.

use crate::debounce::AlertDebouncer;
use crate::history::PerformanceHistory;
use crate::leader::Leadership;
use crate::models::{EventSource, PodAlert, PodSnapshot, ScaleAction, ScalingThresholds};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::scaling::{apply_scale_constraints, current_replicas, ScalingExecutor};
use crate::signals::{aggregate, fetch_snapshots, MetricsSource};
use crate::store::{ControllerStorage, ScaleConfigStorage};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a reactive check decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactiveDecision {
    ScaleTo { from: u32, to: u32 },
    NoChange,
}

/// Replica target implied by a set of pod snapshots, before constraints
pub fn desired_pods(current: u32, pods: &[PodSnapshot], thresholds: &ScalingThresholds) -> u32 {
    let unhealthy = pods.iter().filter(|p| p.unhealthy).count() as u32;
    if unhealthy > 0 {
        return current.saturating_add(unhealthy);
    }

    let idle = pods.iter().all(|p| {
        p.elu_mean < thresholds.scale_down_elu && p.heap_mean < thresholds.scale_down_heap
    });
    if idle && !pods.is_empty() && current > 1 {
        current - 1
    } else {
        current
    }
}

/// Collaborators for reactive checks
#[derive(Clone)]
pub struct ReactiveDeps {
    pub metrics_source: Arc<dyn MetricsSource>,
    pub controllers: Arc<dyn ControllerStorage>,
    pub scale_configs: Arc<dyn ScaleConfigStorage>,
    pub executor: Arc<dyn ScalingExecutor>,
    pub history: PerformanceHistory,
    pub leadership: Arc<dyn Leadership>,
}

pub struct ReactiveExecutor {
    deps: ReactiveDeps,
    thresholds: ScalingThresholds,
    debouncer: AlertDebouncer,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl ReactiveExecutor {
    pub fn new(
        deps: ReactiveDeps,
        thresholds: ScalingThresholds,
        debouncer: AlertDebouncer,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            deps,
            thresholds,
            debouncer,
            metrics: ScalerMetrics::new(),
            logger,
        }
    }

    pub fn debouncer(&self) -> &AlertDebouncer {
        &self.debouncer
    }

    /// Feed an alert through the debouncer and check its application if it
    /// notifies
    pub async fn handle_alert(&self, alert: &PodAlert) -> ReactiveDecision {
        if !self.debouncer.process(alert).should_notify() {
            return ReactiveDecision::NoChange;
        }
        if !self.deps.leadership.is_leader() {
            debug!(application_id = %alert.application_id, "Not leader, alert ignored");
            return ReactiveDecision::NoChange;
        }
        info!(
            application_id = %alert.application_id,
            pod_id = %alert.pod_id,
            "Unhealthy pod alert"
        );
        self.check_application(&alert.application_id).await
    }

    /// Check every application that has a controller. Returns the number of
    /// applications scaled.
    pub async fn check_all_applications(&self) -> usize {
        let applications = match self.deps.controllers.list_applications().await {
            Ok(apps) => apps,
            Err(e) => {
                warn!(
                    operation = "list_applications",
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to list applications"
                );
                return 0;
            }
        };

        let mut scaled = 0;
        for application_id in &applications {
            let decision = self.check_application(application_id).await;
            if let ReactiveDecision::ScaleTo { .. } = decision {
                scaled += 1;
            }
        }
        debug!(applications = applications.len(), scaled, "Periodic check completed");
        scaled
    }

    pub async fn check_application(&self, application_id: &str) -> ReactiveDecision {
        if !self.deps.leadership.is_leader() {
            return ReactiveDecision::NoChange;
        }

        let snapshots = fetch_snapshots(
            self.deps.metrics_source.as_ref(),
            application_id,
            &self.thresholds,
        )
        .await;
        let Some(snapshots) = snapshots else {
            return ReactiveDecision::NoChange;
        };
        let pods: Vec<PodSnapshot> = snapshots.into_values().collect();

        let current = match current_replicas(
            self.deps.executor.as_ref(),
            self.deps.controllers.as_ref(),
            application_id,
        )
        .await
        {
            Ok(Some(replicas)) => replicas,
            Ok(None) => {
                debug!(application_id = %application_id, "No controller, skipping check");
                return ReactiveDecision::NoChange;
            }
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "current_replicas",
                    error_kind = e.kind(),
                    error = %e,
                    "Failed to read replica count"
                );
                return ReactiveDecision::NoChange;
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

        let desired = desired_pods(current, &pods, &self.thresholds);
        let target = apply_scale_constraints(
            i64::from(desired),
            scale_config.min_pods,
            scale_config.max_pods,
        );
        if target == current {
            return ReactiveDecision::NoChange;
        }

        let unhealthy = pods.iter().filter(|p| p.unhealthy).count();
        let reason = if target > current {
            format!("signal: {unhealthy} of {} pods over threshold", pods.len())
        } else {
            format!("signal: all {} pods under scale-down thresholds", pods.len())
        };

        match self
            .deps
            .executor
            .execute_scaling(application_id, target, &reason)
            .await
        {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                warn!(
                    application_id = %application_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Reactive scaling rejected"
                );
                return ReactiveDecision::NoChange;
            }
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "execute_scaling",
                    error_kind = e.kind(),
                    error = %e,
                    "Reactive scaling failed"
                );
                return ReactiveDecision::NoChange;
            }
        }

        let change = i64::from(target) - i64::from(current);
        self.metrics
            .inc_scaling_action(EventSource::Signal, ScaleAction::of_change(change));
        self.logger
            .log_scaling_action(application_id, EventSource::Signal, current, target, &reason);

        let request = self.deps.history.scaling_request(
            application_id,
            change,
            target,
            aggregate(&pods),
            EventSource::Signal,
        );
        self.deps.history.scaling_evaluation(request).await;

        ReactiveDecision::ScaleTo {
            from: current,
            to: target,
        }
    }
}
