//! Live pod signals
//!
//! The metrics-aggregation service is consumed through [`MetricsSource`];
//! [`stats`] turns its raw series into the processed snapshots the history
//! evaluator and the reactive executor work with.

pub mod stats;

pub use stats::{aggregate, linear_regression_slope, process_pod};

use crate::error::Result;
use crate::models::{PodMetricsSeries, PodSnapshot, ScalingThresholds};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// Trait for metrics-service implementations
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Per-pod series for an application, keyed by pod id.
    /// An empty map means the service has no data.
    async fn application_metrics(
        &self,
        application_id: &str,
    ) -> Result<HashMap<String, PodMetricsSeries>>;
}

/// Fetch and process every pod of an application.
///
/// Returns `None` when the service errors or has no data; the caller aborts
/// whatever it was evaluating.
pub async fn fetch_snapshots(
    source: &dyn MetricsSource,
    application_id: &str,
    thresholds: &ScalingThresholds,
) -> Option<HashMap<String, PodSnapshot>> {
    match source.application_metrics(application_id).await {
        Ok(pods) if !pods.is_empty() => Some(
            pods.iter()
                .map(|(pod_id, series)| (pod_id.clone(), process_pod(series, thresholds)))
                .collect(),
        ),
        Ok(_) => {
            tracing::debug!(application_id = %application_id, "No pod metrics available");
            None
        }
        Err(e) => {
            tracing::warn!(
                application_id = %application_id,
                error = %e,
                error_kind = e.kind(),
                "Failed to fetch pod metrics"
            );
            None
        }
    }
}

/// Metrics source backed by series pushed in by the caller
#[derive(Default)]
pub struct StaticMetricsSource {
    applications: DashMap<String, HashMap<String, PodMetricsSeries>>,
}

impl StaticMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pod(&self, application_id: &str, pod_id: &str, series: PodMetricsSeries) {
        self.applications
            .entry(application_id.to_string())
            .or_default()
            .insert(pod_id.to_string(), series);
    }

    pub fn clear(&self, application_id: &str) {
        self.applications.remove(application_id);
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn application_metrics(
        &self,
        application_id: &str,
    ) -> Result<HashMap<String, PodMetricsSeries>> {
        Ok(self
            .applications
            .get(application_id)
            .map(|pods| pods.value().clone())
            .unwrap_or_default())
    }
}
