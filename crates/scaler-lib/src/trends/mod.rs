//! Trends learning
//!
//! Learns recurring scaling patterns from performance history:
//! - decay-weighted aggregates per time-of-day slot and action
//! - scale-down steps that tend to follow a slot's scale-ups
//! - concrete up/down predictions at the next occurrence of confident slots

mod sequence;
mod slots;


pub use sequence::{learn_steps, SequenceStep};
pub use slots::{
    aggregate_slot, decay_weight, next_occurrence, select_slot, slot_table, time_of_day,
    SlotStats, WeightedEvent, SECONDS_PER_DAY,
};

use crate::history::{HistoryRequest, PerformanceHistory};
use crate::models::{Prediction, PredictionReasons, ScaleAction};
use crate::observability::ScalerMetrics;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for trends analysis
#[derive(Debug, Clone)]
pub struct TrendsConfig {
    /// Most recent events loaded per analysis
    pub max_history_events: usize,
    /// Age at which an event's weight halves
    pub half_life_secs: f64,
    /// Width of a time-of-day slot
    pub slot_secs: i64,
    /// How long after a scale-up its scale-downs are attributed to it
    pub sequence_window_secs: i64,
    /// Slots must exceed this confidence to produce predictions
    pub confidence_threshold: f64,
    /// Tolerance for `get_current_prediction`
    pub prediction_window: Duration,
    /// Offset of "local" time from UTC, in seconds
    pub utc_offset_secs: i32,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            max_history_events: 1000,
            half_life_secs: 259_200.0,
            slot_secs: 1800,
            sequence_window_secs: 600,
            confidence_threshold: 0.8,
            prediction_window: Duration::from_secs(30),
            utc_offset_secs: 0,
        }
    }
}

impl TrendsConfig {
    /// Decay rate `ln 2 / half_life`
    pub fn lambda(&self) -> f64 {
        std::f64::consts::LN_2 / self.half_life_secs
    }

    /// Configured offset; out-of-range values fall back to UTC
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| Utc.fix())
    }
}

/// Result of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub predictions: Vec<Prediction>,
    pub analysis_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Learns predictions from an application's performance history
#[derive(Clone)]
pub struct TrendsLearner {
    history: PerformanceHistory,
    config: TrendsConfig,
    metrics: ScalerMetrics,
}

impl TrendsLearner {
    pub fn new(history: PerformanceHistory, config: TrendsConfig) -> Self {
        Self {
            history,
            config,
            metrics: ScalerMetrics::new(),
        }
    }

    pub fn config(&self) -> &TrendsConfig {
        &self.config
    }

    /// Analyse against the wall clock
    pub async fn run_analysis(&self, application_id: &str) -> AnalysisOutcome {
        self.run_analysis_at(application_id, crate::models::epoch_millis())
            .await
    }

    /// Analyse as if the current time were `now_ms`. Never fails: a history
    /// read error yields a successful run with no predictions.
    pub async fn run_analysis_at(&self, application_id: &str, now_ms: i64) -> AnalysisOutcome {
        let start = Instant::now();

        let request =
            HistoryRequest::for_application(application_id, self.config.max_history_events);
        let (predictions, error) = match self.history.get_performance_history(&request).await {
            Ok(events) => {
                let (lambda, offset) = (self.config.lambda(), self.config.offset());
                let weighted: Vec<WeightedEvent<'_>> = events
                    .iter()
                    .map(|e| WeightedEvent::new(e, now_ms, lambda, &offset))
                    .collect();
                (self.predict(application_id, &weighted, now_ms), None)
            }
            Err(e) => {
                warn!(
                    application_id = %application_id,
                    operation = "run_analysis",
                    error = %e,
                    error_kind = e.kind(),
                    "Failed to load performance history"
                );
                (Vec::new(), Some(e.to_string()))
            }
        };

        let elapsed = start.elapsed();
        self.metrics.observe_analysis_latency(elapsed.as_secs_f64());
        self.metrics.add_predictions_generated(predictions.len());

        info!(
            application_id = %application_id,
            predictions = predictions.len(),
            duration_ms = elapsed.as_millis() as u64,
            "Trends analysis completed"
        );

        AnalysisOutcome {
            success: true,
            predictions,
            analysis_time_ms: elapsed.as_millis() as u64,
            error,
        }
    }

    /// The prediction due within `prediction_window` of `current_time_ms`
    pub async fn get_current_prediction(
        &self,
        application_id: &str,
        current_time_ms: i64,
    ) -> Option<Prediction> {
        let window_ms = self.config.prediction_window.as_millis() as i64;
        self.run_analysis_at(application_id, current_time_ms)
            .await
            .predictions
            .into_iter()
            .find(|p| {
                (current_time_ms - p.absolute_time).abs() <= window_ms
                    && p.confidence > self.config.confidence_threshold
            })
    }

    /// Confident up slots become predictions, each followed by its learned
    /// scale-down steps
    fn predict(
        &self,
        application_id: &str,
        events: &[WeightedEvent<'_>],
        now_ms: i64,
    ) -> Vec<Prediction> {
        if events.is_empty() {
            return Vec::new();
        }

        let offset = self.config.offset();
        let mut predictions = Vec::new();

        let confident = slot_table(events, self.config.slot_secs)
            .into_iter()
            .filter(|s| s.action == ScaleAction::Up)
            .filter(|s| s.confidence > self.config.confidence_threshold);

        for stats in confident {
            let slot_time = stats.time_of_day;
            let slot_secs = self.config.slot_secs.clamp(1, SECONDS_PER_DAY);
            let ups = select_slot(events, slot_time, slot_secs, ScaleAction::Up);
            let absolute_time = next_occurrence(slot_time, now_ms, &offset);
            debug!(
                application_id = %application_id,
                time_of_day = slot_time,
                confidence = stats.confidence,
                pods = stats.pods,
                "Confident scale-up slot"
            );

            for step in learn_steps(&ups, events, self.config.sequence_window_secs) {
                let offset_secs = (step.offset_secs.round() as i64).max(1);
                predictions.push(Prediction {
                    application_id: application_id.to_string(),
                    time_of_day: slot_time + offset_secs,
                    absolute_time: absolute_time + offset_secs * 1000,
                    action: ScaleAction::Down,
                    pods: step.pods,
                    confidence: stats.confidence,
                    reasons: PredictionReasons::Sequence(step.reasons),
                });
            }

            predictions.push(Prediction {
                application_id: application_id.to_string(),
                time_of_day: slot_time,
                absolute_time,
                action: ScaleAction::Up,
                pods: stats.pods,
                confidence: stats.confidence,
                reasons: PredictionReasons::Slot(stats.reasons),
            });
        }

        predictions.sort_by_key(|p| p.absolute_time);
        predictions
    }
}
