//! Observability infrastructure for the scaler
//!
//! Provides:
//! - Prometheus metrics (analysis latency, prediction/scaling counters, leadership)
//! - Structured JSON logging of scaling decisions with tracing

use crate::models::{EventSource, ScaleAction};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for analysis latency (in seconds)
const ANALYSIS_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    analysis_latency_seconds: Histogram,
    predictions_generated: IntCounter,
    predictions_executed: IntCounter,
    predictions_skipped: IntCounter,
    scaling_actions: IntCounterVec,
    alerts_suppressed: IntCounter,
    evaluations_completed: IntCounter,
    evaluation_errors: IntCounter,
    is_leader: IntGauge,
    pending_predictions: IntGauge,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            analysis_latency_seconds: register_histogram!(
                "scaler_analysis_duration_seconds",
                "Time spent running the trends analysis for one application",
                ANALYSIS_BUCKETS.to_vec()
            )
            .expect("Failed to register analysis_duration_seconds"),

            predictions_generated: register_int_counter!(
                "scaler_predictions_generated_total",
                "Total number of predictions produced by trends analysis"
            )
            .expect("Failed to register predictions_generated"),

            predictions_executed: register_int_counter!(
                "scaler_predictions_executed_total",
                "Predictions that resulted in a scaling call"
            )
            .expect("Failed to register predictions_executed"),

            predictions_skipped: register_int_counter!(
                "scaler_predictions_skipped_total",
                "Predictions removed without a scaling call"
            )
            .expect("Failed to register predictions_skipped"),

            scaling_actions: register_int_counter_vec!(
                "scaler_scaling_actions_total",
                "Scaling actions executed, by source and direction",
                &["source", "action"]
            )
            .expect("Failed to register scaling_actions"),

            alerts_suppressed: register_int_counter!(
                "scaler_alerts_suppressed_total",
                "Unhealthy alerts suppressed by the debounce window"
            )
            .expect("Failed to register alerts_suppressed"),

            evaluations_completed: register_int_counter!(
                "scaler_evaluations_completed_total",
                "Post-scaling evaluations written back to history"
            )
            .expect("Failed to register evaluations_completed"),

            evaluation_errors: register_int_counter!(
                "scaler_evaluation_errors_total",
                "Post-scaling evaluations aborted by collaborator failures"
            )
            .expect("Failed to register evaluation_errors"),

            is_leader: register_int_gauge!(
                "scaler_is_leader",
                "1 if this replica currently holds the leader lease"
            )
            .expect("Failed to register is_leader"),

            pending_predictions: register_int_gauge!(
                "scaler_pending_predictions",
                "Predictions queued in the shared schedule"
            )
            .expect("Failed to register pending_predictions"),
        }
    }
}

/// Scaler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn observe_analysis_latency(&self, duration_secs: f64) {
        self.inner().analysis_latency_seconds.observe(duration_secs);
    }

    pub fn add_predictions_generated(&self, count: usize) {
        self.inner().predictions_generated.inc_by(count as u64);
    }

    pub fn inc_predictions_executed(&self) {
        self.inner().predictions_executed.inc();
    }

    pub fn inc_predictions_skipped(&self) {
        self.inner().predictions_skipped.inc();
    }

    pub fn inc_scaling_action(&self, source: EventSource, action: ScaleAction) {
        self.inner()
            .scaling_actions
            .with_label_values(&[&source.to_string(), &action.to_string()])
            .inc();
    }

    pub fn inc_alerts_suppressed(&self) {
        self.inner().alerts_suppressed.inc();
    }

    pub fn inc_evaluations_completed(&self) {
        self.inner().evaluations_completed.inc();
    }

    pub fn inc_evaluation_errors(&self) {
        self.inner().evaluation_errors.inc();
    }

    pub fn set_leader(&self, leader: bool) {
        self.inner().is_leader.set(i64::from(leader));
    }

    pub fn set_pending_predictions(&self, count: usize) {
        self.inner().pending_predictions.set(count as i64);
    }

    pub fn evaluations_completed(&self) -> u64 {
        self.inner().evaluations_completed.get()
    }
}

/// Structured logger for scaler events
///
/// Every line carries the `event` field and the replica identity so log
/// pipelines can follow a decision across replicas.
#[derive(Clone)]
pub struct StructuredLogger {
    replica_id: String,
}

impl StructuredLogger {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            replica_id: replica_id.into(),
        }
    }

    /// Log an executed scaling action
    pub fn log_scaling_action(
        &self,
        application_id: &str,
        source: EventSource,
        from: u32,
        to: u32,
        reason: &str,
    ) {
        info!(
            event = "scaling_executed",
            replica = %self.replica_id,
            application_id = %application_id,
            source = %source,
            from_pods = from,
            to_pods = to,
            reason = %reason,
            "Scaling action executed"
        );
    }

    /// Log the outcome of a prediction fire
    pub fn log_prediction_executed(
        &self,
        application_id: &str,
        action: ScaleAction,
        pods: u32,
        confidence: f64,
        absolute_time: i64,
        executed: bool,
    ) {
        info!(
            event = "prediction_executed",
            replica = %self.replica_id,
            application_id = %application_id,
            action = %action,
            pods = pods,
            confidence = confidence,
            absolute_time = absolute_time,
            executed = executed,
            "Prediction processed"
        );
    }

    /// Log a completed post-scaling evaluation
    pub fn log_evaluation(
        &self,
        application_id: &str,
        event_timestamp: i64,
        source: EventSource,
        delta_elu: f64,
        delta_heap: f64,
        success_score: f64,
    ) {
        info!(
            event = "evaluation_completed",
            replica = %self.replica_id,
            application_id = %application_id,
            event_timestamp = event_timestamp,
            source = %source,
            delta_elu = delta_elu,
            delta_heap = delta_heap,
            success_score = success_score,
            "Post-scaling evaluation recorded"
        );
    }

    /// Log a leadership transition
    pub fn log_leadership_change(&self, leader: bool) {
        if leader {
            info!(
                event = "leadership_changed",
                replica = %self.replica_id,
                leader = true,
                "Acquired scaler leadership"
            );
        } else {
            warn!(
                event = "leadership_changed",
                replica = %self.replica_id,
                leader = false,
                "Lost scaler leadership"
            );
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "scaler_started",
            replica = %self.replica_id,
            scaler_version = %version,
            "Pod scaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scaler_shutdown",
            replica = %self.replica_id,
            reason = %reason,
            "Pod scaler shutting down"
        );
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }
}
