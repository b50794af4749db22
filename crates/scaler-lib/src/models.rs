//! Core data models for the scaler

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, wall clock.
pub fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Origin of a scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Reactive decision driven by live signals or alerts
    Signal,
    /// Scheduled execution of a learned prediction
    Prediction,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Signal => write!(f, "signal"),
            EventSource::Prediction => write!(f, "prediction"),
        }
    }
}

/// Direction of a scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAction {
    Up,
    Down,
}

impl ScaleAction {
    pub fn of_change(pods_added: i64) -> Self {
        if pods_added >= 0 {
            ScaleAction::Up
        } else {
            ScaleAction::Down
        }
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleAction::Up => write!(f, "up"),
            ScaleAction::Down => write!(f, "down"),
        }
    }
}

/// Diagnostics for a time-slot aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotReasons {
    pub event_count: usize,
    pub recent_count: usize,
    pub avg_success: f64,
    pub avg_elu: f64,
    pub avg_heap: f64,
}

/// Diagnostics for a learned scale-down step following a scale-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceReasons {
    pub seq_count: usize,
    pub avg_offset: f64,
    pub avg_pods: f64,
}

/// Structured explanation attached to every prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictionReasons {
    Slot(SlotReasons),
    Sequence(SequenceReasons),
}

/// Prediction context recorded on events produced by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionContext {
    pub confidence: f64,
    pub time_of_day: i64,
    pub reasons: PredictionReasons,
}

/// One scaling action and its measured effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistoryEvent {
    pub application_id: String,
    /// Milliseconds since epoch; together with `application_id` the natural key
    pub event_timestamp: i64,
    pub pods_added: i64,
    pub total_pods: u32,
    pub pre_elu_mean: f64,
    pub pre_heap_mean: f64,
    pub pre_elu_trend: f64,
    pub pre_heap_trend: f64,
    pub delta_elu: f64,
    pub delta_heap: f64,
    pub sigma_elu: f64,
    pub sigma_heap: f64,
    pub success_score: Option<f64>,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionContext>,
}

impl PerformanceHistoryEvent {
    pub fn action(&self) -> ScaleAction {
        ScaleAction::of_change(self.pods_added)
    }

    pub fn key(&self) -> (String, i64) {
        (self.application_id.clone(), self.event_timestamp)
    }
}

/// A forecast scaling action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub application_id: String,
    /// Seconds since local midnight; may exceed 86400 for offsets past midnight
    pub time_of_day: i64,
    /// Next concrete occurrence, milliseconds since epoch
    pub absolute_time: i64,
    pub action: ScaleAction,
    pub pods: u32,
    pub confidence: f64,
    pub reasons: PredictionReasons,
}

/// Identity of a queued prediction within the schedule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredictionKey {
    pub application_id: String,
    pub absolute_time: i64,
    pub action: ScaleAction,
}

impl Prediction {
    pub fn key(&self) -> PredictionKey {
        PredictionKey {
            application_id: self.application_id.clone(),
            absolute_time: self.absolute_time,
            action: self.action,
        }
    }
}

/// Replica bounds for an application; `None` means unconstrained
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub application_id: String,
    pub min_pods: Option<u32>,
    pub max_pods: Option<u32>,
}

/// Mirror of a live deployment's replica count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRecord {
    pub application_id: String,
    pub controller_id: String,
    pub namespace: String,
    pub api_version: String,
    pub kind: String,
    pub replicas: u32,
    /// Milliseconds since epoch; the newest row per application is authoritative
    pub created_at: i64,
}

/// Raw per-pod series returned by the metrics service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodMetricsSeries {
    pub elu: Vec<f64>,
    pub heap_used: Vec<f64>,
    pub heap_total: Vec<f64>,
}

/// Processed per-pod metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub elu_mean: f64,
    pub heap_mean: f64,
    pub elu_variability: f64,
    pub heap_variability: f64,
    pub elu_trend: f64,
    pub heap_trend: f64,
    pub unhealthy: bool,
}

/// Application-level averages captured before a scaling action
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreScalingMetrics {
    pub elu_mean: f64,
    pub heap_mean: f64,
    pub elu_trend: f64,
    pub heap_trend: f64,
    pub elu_variability: f64,
    pub heap_variability: f64,
}

/// Health alert raised for a single pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodAlert {
    pub application_id: String,
    pub pod_id: String,
    pub healthy: bool,
    pub timestamp: i64,
}

/// ELU/heap thresholds used to classify pods and score actions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalingThresholds {
    pub elu: f64,
    pub heap: f64,
    pub scale_down_elu: f64,
    pub scale_down_heap: f64,
}

impl Default for ScalingThresholds {
    fn default() -> Self {
        Self {
            elu: 0.9,
            heap: 0.85,
            scale_down_elu: 0.2,
            scale_down_heap: 0.4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_tagged() {
        let reasons = PredictionReasons::Sequence(SequenceReasons {
            seq_count: 4,
            avg_offset: 180.0,
            avg_pods: 3.0,
        });
        let json = serde_json::to_value(&reasons).unwrap();
        assert_eq!(json["kind"], "sequence");
        assert_eq!(json["seq_count"], 4);
    }

    #[test]
    fn test_action_of_change() {
        assert_eq!(ScaleAction::of_change(3), ScaleAction::Up);
        assert_eq!(ScaleAction::of_change(-2), ScaleAction::Down);
    }

    #[test]
    fn test_event_source_serializes_lowercase() {
        let json = serde_json::to_string(&EventSource::Prediction).unwrap();
        assert_eq!(json, "\"prediction\"");
    }
}
