//! Performance history and post-scaling evaluation
//!
//! Every scaling action is recorded as a [`PerformanceHistoryEvent`] at
//! decision time. After the post-scaling window a background task measures
//! what the action actually did to the pods and writes the effect and the
//! success score back onto the same row, which the trends analysis then
//! learns from.

pub mod evaluation;

pub use evaluation::{performance_score, prediction_success, ScoreInputs};

use crate::error::Result;
use crate::models::{
    epoch_millis, EventSource, PerformanceHistoryEvent, PredictionContext, PreScalingMetrics,
    ScalingThresholds,
};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::signals::{aggregate, fetch_snapshots, MetricsSource};
use crate::store::{HistoryQuery, HistoryStorage, STORAGE_PAGE_CAP};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default wait between a scaling action and its evaluation (5 minutes)
pub const DEFAULT_POST_SCALING_WINDOW: Duration = Duration::from_secs(300);

/// Receives completed events for offline threshold tuning
#[async_trait]
pub trait ClusteringSink: Send + Sync {
    async fn submit(&self, application_id: &str, event: &PerformanceHistoryEvent, performance: f64);
}

/// Configuration for post-scaling evaluation
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    pub post_scaling_window: Duration,
    /// Run evaluations immediately instead of waiting out the window
    pub skip_wait: bool,
    pub thresholds: ScalingThresholds,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            post_scaling_window: DEFAULT_POST_SCALING_WINDOW,
            skip_wait: false,
            thresholds: ScalingThresholds::default(),
        }
    }
}

/// History query with a row limit that may exceed the storage page cap
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub query: HistoryQuery,
    pub limit: usize,
}

impl HistoryRequest {
    pub fn for_application(application_id: impl Into<String>, limit: usize) -> Self {
        Self {
            query: HistoryQuery::for_application(application_id),
            limit,
        }
    }
}

/// A scaling action handed over for recording and evaluation
#[derive(Debug, Clone)]
pub struct ScalingRequest {
    pub application_id: String,
    pub actual_pods_change: i64,
    pub total_pods: u32,
    pub pre_metrics: PreScalingMetrics,
    pub source: EventSource,
    pub post_scaling_window: Duration,
    pub elu_threshold: f64,
    pub heap_threshold: f64,
    pub prediction: Option<PredictionContext>,
}

/// Everything the delayed evaluation needs, captured at decision time
#[derive(Debug, Clone)]
pub struct PostScalingParams {
    pub event: PerformanceHistoryEvent,
    pub elu_threshold: f64,
    pub heap_threshold: f64,
}

type EventKey = (String, i64);

struct PendingEvaluation {
    id: u64,
    handle: JoinHandle<()>,
}

/// Performance history facade over the storage and metrics collaborators
#[derive(Clone)]
pub struct PerformanceHistory {
    storage: Arc<dyn HistoryStorage>,
    metrics_source: Arc<dyn MetricsSource>,
    clustering: Option<Arc<dyn ClusteringSink>>,
    config: EvaluationConfig,
    pending: Arc<DashMap<EventKey, PendingEvaluation>>,
    next_task_id: Arc<AtomicU64>,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl PerformanceHistory {
    pub fn new(
        storage: Arc<dyn HistoryStorage>,
        metrics_source: Arc<dyn MetricsSource>,
        config: EvaluationConfig,
    ) -> Self {
        Self {
            storage,
            metrics_source,
            clustering: None,
            config,
            pending: Arc::new(DashMap::new()),
            next_task_id: Arc::new(AtomicU64::new(0)),
            metrics: ScalerMetrics::new(),
            logger: StructuredLogger::new("pod-scaler"),
        }
    }

    pub fn with_clustering(mut self, sink: Arc<dyn ClusteringSink>) -> Self {
        self.clustering = Some(sink);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Scaling request pre-filled with this history's window and thresholds
    pub fn scaling_request(
        &self,
        application_id: &str,
        actual_pods_change: i64,
        total_pods: u32,
        pre_metrics: PreScalingMetrics,
        source: EventSource,
    ) -> ScalingRequest {
        ScalingRequest {
            application_id: application_id.to_string(),
            actual_pods_change,
            total_pods,
            pre_metrics,
            source,
            post_scaling_window: self.config.post_scaling_window,
            elu_threshold: self.config.thresholds.elu,
            heap_threshold: self.config.thresholds.heap,
            prediction: None,
        }
    }

    /// Current application averages, `None` when the metrics service has no data
    pub async fn current_metrics(&self, application_id: &str) -> Option<PreScalingMetrics> {
        let snapshots =
            fetch_snapshots(self.metrics_source.as_ref(), application_id, &self.config.thresholds)
                .await?;
        let pods: Vec<_> = snapshots.into_values().collect();
        Some(aggregate(&pods))
    }

    /// Upsert an event under (application_id, event_timestamp).
    /// A missing success score is stored as 0.
    pub async fn save_event(
        &self,
        application_id: &str,
        mut event: PerformanceHistoryEvent,
        source: EventSource,
    ) -> Result<()> {
        event.application_id = application_id.to_string();
        event.source = source;
        event.success_score = Some(event.success_score.unwrap_or(0.0));
        self.storage.upsert_event(event).await
    }

    /// Events matching the request, newest first. Limits above the storage
    /// page cap are served by sequential paginated reads.
    pub async fn get_performance_history(
        &self,
        request: &HistoryRequest,
    ) -> Result<Vec<PerformanceHistoryEvent>> {
        let mut events = Vec::with_capacity(request.limit.min(STORAGE_PAGE_CAP));
        let mut offset = 0;

        while events.len() < request.limit {
            let page_size = (request.limit - events.len()).min(STORAGE_PAGE_CAP);
            let page = self
                .storage
                .find_events(&request.query, page_size, offset)
                .await?;
            let fetched = page.len();
            events.extend(page);
            offset += fetched;

            if fetched < page_size {
                break;
            }
        }

        Ok(events)
    }

    /// Record a scaling action and schedule its evaluation.
    ///
    /// Returns the event timestamp, or `None` when the pre-scaling row could
    /// not be saved (nothing is scheduled in that case).
    pub async fn scaling_evaluation(&self, request: ScalingRequest) -> Option<i64> {
        let event = PerformanceHistoryEvent {
            application_id: request.application_id.clone(),
            event_timestamp: epoch_millis(),
            pods_added: request.actual_pods_change,
            total_pods: request.total_pods,
            pre_elu_mean: request.pre_metrics.elu_mean,
            pre_heap_mean: request.pre_metrics.heap_mean,
            pre_elu_trend: request.pre_metrics.elu_trend,
            pre_heap_trend: request.pre_metrics.heap_trend,
            delta_elu: 0.0,
            delta_heap: 0.0,
            sigma_elu: 0.0,
            sigma_heap: 0.0,
            success_score: Some(match request.source {
                EventSource::Signal => 1.0,
                EventSource::Prediction => 0.0,
            }),
            source: request.source,
            prediction: request.prediction.clone(),
        };

        if let Err(e) = self
            .save_event(&request.application_id, event.clone(), request.source)
            .await
        {
            warn!(
                application_id = %request.application_id,
                operation = "scaling_evaluation",
                error = %e,
                error_kind = e.kind(),
                "Failed to save pre-scaling event"
            );
            return None;
        }

        let key = event.key();
        let params = PostScalingParams {
            event,
            elu_threshold: request.elu_threshold,
            heap_threshold: request.heap_threshold,
        };
        let wait = if self.config.skip_wait {
            None
        } else {
            Some(request.post_scaling_window)
        };

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (registered, gate) = oneshot::channel::<()>();
        let history = self.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            // the entry must be in the map before the task may remove it
            let _ = gate.await;
            if let Some(wait) = wait {
                tokio::time::sleep(wait).await;
            }
            history.post_scaling_evaluation(params).await;
            history
                .pending
                .remove_if(&task_key, |_, pending| pending.id == id);
        });
        if let Some(superseded) = self
            .pending
            .insert(key.clone(), PendingEvaluation { id, handle })
        {
            // same application and millisecond; the row was overwritten
            superseded.handle.abort();
        }
        let _ = registered.send(());

        info!(
            application_id = %request.application_id,
            event_timestamp = key.1,
            pods_added = request.actual_pods_change,
            total_pods = request.total_pods,
            source = %request.source,
            window_secs = request.post_scaling_window.as_secs(),
            "Scaling action recorded, evaluation scheduled"
        );

        Some(key.1)
    }

    /// Measure the effect of an action and write it back onto its row.
    ///
    /// Returns the updated event, or `None` when metrics were unavailable or
    /// the save failed; neither case is retried.
    pub async fn post_scaling_evaluation(
        &self,
        params: PostScalingParams,
    ) -> Option<PerformanceHistoryEvent> {
        let PostScalingParams {
            mut event,
            elu_threshold,
            heap_threshold,
        } = params;
        let application_id = event.application_id.clone();

        let thresholds = ScalingThresholds {
            elu: elu_threshold,
            heap: heap_threshold,
            ..self.config.thresholds
        };
        let snapshots =
            match fetch_snapshots(self.metrics_source.as_ref(), &application_id, &thresholds).await
            {
                Some(s) => s,
                None => {
                    warn!(
                        application_id = %application_id,
                        event_timestamp = event.event_timestamp,
                        "No post-scaling metrics, evaluation aborted"
                    );
                    self.metrics.inc_evaluation_errors();
                    return None;
                }
            };

        let pods: Vec<_> = snapshots.into_values().collect();
        let post = aggregate(&pods);

        event.delta_elu = post.elu_mean - event.pre_elu_mean;
        event.delta_heap = post.heap_mean - event.pre_heap_mean;
        event.sigma_elu = post.elu_variability;
        event.sigma_heap = post.heap_variability;
        event.success_score = Some(match event.source {
            EventSource::Signal => 1.0,
            EventSource::Prediction => prediction_success(&ScoreInputs {
                pods_added: event.pods_added,
                pod_count: event.total_pods,
                pre_elu_mean: event.pre_elu_mean,
                post_elu_mean: post.elu_mean,
                post_heap_mean: post.heap_mean,
                sigma_elu: event.sigma_elu,
                sigma_heap: event.sigma_heap,
                elu_threshold,
                heap_threshold,
            }),
        });

        if let Err(e) = self.storage.upsert_event(event.clone()).await {
            warn!(
                application_id = %application_id,
                operation = "post_scaling_evaluation",
                error = %e,
                error_kind = e.kind(),
                "Failed to save evaluated event"
            );
            self.metrics.inc_evaluation_errors();
            return None;
        }

        if let Some(sink) = &self.clustering {
            let performance = performance_score(
                event.delta_elu,
                event.delta_heap,
                event.sigma_elu,
                event.sigma_heap,
            );
            let sink = sink.clone();
            let completed = event.clone();
            tokio::spawn(async move {
                sink.submit(&completed.application_id, &completed, performance)
                    .await;
            });
        }

        self.metrics.inc_evaluations_completed();
        self.logger.log_evaluation(
            &application_id,
            event.event_timestamp,
            event.source,
            event.delta_elu,
            event.delta_heap,
            event.success_score.unwrap_or_default(),
        );
        Some(event)
    }

    /// Number of evaluations still waiting for their window
    pub fn pending_evaluations(&self) -> usize {
        self.pending.len()
    }

    /// Abort every scheduled evaluation
    pub fn shutdown(&self) {
        let count = self.pending.len();
        self.pending.retain(|_, pending| {
            pending.handle.abort();
            false
        });
        debug!(aborted = count, "Pending evaluations cancelled");
    }
}
