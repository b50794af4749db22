//! Storage and coordination collaborators
//!
//! The core only talks to persistence through these traits:
//! - `HistoryStorage` for performance history rows
//! - `ScaleConfigStorage` and `ControllerStorage` for per-application state
//! - `CoordinationStore` for the leader lease and the shared prediction list
//!
//! In-memory bindings live in [`memory`].

mod memory;

pub use memory::{MemoryCoordinationStore, MemoryStore};

use crate::error::Result;
use crate::models::{
    ControllerRecord, PerformanceHistoryEvent, Prediction, PredictionKey, ScaleConfig,
};
use async_trait::async_trait;
use std::time::Duration;

/// Maximum number of rows a single `find_events` call returns
pub const STORAGE_PAGE_CAP: usize = 1000;

/// Filter for performance history queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub application_id: Option<String>,
    /// Inclusive lower bound on `event_timestamp` (ms)
    pub start: Option<i64>,
    /// Inclusive upper bound on `event_timestamp` (ms)
    pub end: Option<i64>,
}

impl HistoryQuery {
    pub fn for_application(application_id: impl Into<String>) -> Self {
        Self {
            application_id: Some(application_id.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, event: &PerformanceHistoryEvent) -> bool {
        self.application_id
            .as_deref()
            .map_or(true, |id| id == event.application_id)
            && self.start.map_or(true, |s| event.event_timestamp >= s)
            && self.end.map_or(true, |e| event.event_timestamp <= e)
    }
}

#[async_trait]
pub trait HistoryStorage: Send + Sync {
    /// Insert or update the row keyed by (application_id, event_timestamp)
    async fn upsert_event(&self, event: PerformanceHistoryEvent) -> Result<()>;

    /// Matching rows ordered newest-first; at most `STORAGE_PAGE_CAP` per call
    async fn find_events(
        &self,
        query: &HistoryQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PerformanceHistoryEvent>>;

    async fn get_event(
        &self,
        application_id: &str,
        event_timestamp: i64,
    ) -> Result<Option<PerformanceHistoryEvent>>;
}

#[async_trait]
pub trait ScaleConfigStorage: Send + Sync {
    async fn scale_config(&self, application_id: &str) -> Result<Option<ScaleConfig>>;

    async fn save_scale_config(&self, config: ScaleConfig) -> Result<()>;
}

#[async_trait]
pub trait ControllerStorage: Send + Sync {
    /// Most recently created controller row for the application
    async fn latest_controller(&self, application_id: &str) -> Result<Option<ControllerRecord>>;

    async fn save_controller(&self, record: ControllerRecord) -> Result<()>;

    /// Distinct application ids with at least one controller row
    async fn list_applications(&self) -> Result<Vec<String>>;
}

/// Shared key-value store used across scaler replicas
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Acquire the named lease, or renew it if `holder` already owns it.
    /// Returns whether `holder` owns the lease afterwards.
    async fn acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool>;

    async fn release_lease(&self, name: &str, holder: &str) -> Result<()>;

    async fn lease_holder(&self, name: &str) -> Result<Option<String>>;

    /// Atomically replace every prediction of `application_id`
    async fn replace_predictions(
        &self,
        application_id: &str,
        predictions: Vec<Prediction>,
    ) -> Result<()>;

    /// All queued predictions sorted by `absolute_time` ascending
    async fn predictions(&self) -> Result<Vec<Prediction>>;

    /// Returns whether a prediction was removed
    async fn remove_prediction(&self, key: &PredictionKey) -> Result<bool>;
}
