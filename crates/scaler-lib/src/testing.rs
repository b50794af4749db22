//! Shared fakes and fixtures for the unit tests

use crate::error::{Result, ScalerError};
use crate::history::ClusteringSink;
use crate::models::{
    ControllerRecord, EventSource, PerformanceHistoryEvent, Prediction, PredictionReasons,
    ScaleAction, SlotReasons,
};
use crate::scaling::{ScalingExecutor, ScalingOutcome};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub fn history_event(
    application_id: &str,
    event_timestamp: i64,
    pods_added: i64,
    success_score: Option<f64>,
) -> PerformanceHistoryEvent {
    PerformanceHistoryEvent {
        application_id: application_id.to_string(),
        event_timestamp,
        pods_added,
        total_pods: 4,
        pre_elu_mean: 0.85,
        pre_heap_mean: 0.5,
        pre_elu_trend: 0.0,
        pre_heap_trend: 0.0,
        delta_elu: 0.0,
        delta_heap: 0.0,
        sigma_elu: 0.0,
        sigma_heap: 0.0,
        success_score,
        source: EventSource::Signal,
        prediction: None,
    }
}

pub fn prediction(
    application_id: &str,
    absolute_time: i64,
    action: ScaleAction,
    pods: u32,
) -> Prediction {
    Prediction {
        application_id: application_id.to_string(),
        time_of_day: 0,
        absolute_time,
        action,
        pods,
        confidence: 0.9,
        reasons: PredictionReasons::Slot(SlotReasons {
            event_count: 10,
            recent_count: 3,
            avg_success: 0.95,
            avg_elu: 0.8,
            avg_heap: 0.5,
        }),
    }
}

pub fn controller(application_id: &str, replicas: u32) -> ControllerRecord {
    ControllerRecord {
        application_id: application_id.to_string(),
        controller_id: format!("{application_id}-deploy"),
        namespace: "default".to_string(),
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        replicas,
        created_at: 1,
    }
}

/// Executor that records every call
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(String, u32, String)>>,
    fail: AtomicBool,
}

impl RecordingExecutor {
    /// Make subsequent calls return an error
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, u32, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ScalingExecutor for RecordingExecutor {
    async fn execute_scaling(
        &self,
        application_id: &str,
        target_pods: u32,
        reason: &str,
    ) -> Result<ScalingOutcome> {
        self.calls.lock().unwrap().push((
            application_id.to_string(),
            target_pods,
            reason.to_string(),
        ));
        if self.fail.load(Ordering::SeqCst) {
            Err(ScalerError::Execution("executor offline".to_string()))
        } else {
            Ok(ScalingOutcome::succeeded())
        }
    }
}

/// Clustering sink that keeps (application_id, performance) pairs
#[derive(Default)]
pub struct RecordingClusteringSink {
    submitted: Mutex<Vec<(String, f64)>>,
}

impl RecordingClusteringSink {
    pub fn submitted(&self) -> Vec<(String, f64)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl ClusteringSink for RecordingClusteringSink {
    async fn submit(
        &self,
        application_id: &str,
        _event: &PerformanceHistoryEvent,
        performance: f64,
    ) {
        self.submitted
            .lock()
            .unwrap()
            .push((application_id.to_string(), performance));
    }
}
