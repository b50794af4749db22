//! Core library for the predictive pod scaler
//!
//! This crate provides:
//! - Trends learning over performance history
//! - Post-scaling evaluation of every scaling action
//! - A leader-only prediction scheduler and periodic trigger
//! - Reactive scaling on debounced pod alerts
//! - Health checks and observability

pub mod cluster;
pub mod debounce;
pub mod error;
pub mod health;
pub mod history;
pub mod leader;
pub mod models;
pub mod observability;
pub mod reactive;
pub mod runtime;
pub mod scaling;
pub mod scheduler;
pub mod signals;
pub mod store;
pub mod trends;
pub mod trigger;

#[cfg(test)]
pub mod testing;

pub use cluster::{ClusterApi, ClusterScalingExecutor, MemoryCluster};
pub use debounce::AlertDebouncer;
pub use error::{Result, ScalerError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use history::{EvaluationConfig, PerformanceHistory};
pub use leader::{LeaderConfig, LeaderCoordinator, Leadership, StaticLeadership};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
pub use reactive::{ReactiveDeps, ReactiveExecutor};
pub use runtime::ScalerRuntime;
pub use scaling::{ScalingExecutor, ScalingOutcome};
pub use scheduler::{PredictionScheduler, SchedulerConfig, SchedulerDeps, SchedulerState};
pub use signals::{MetricsSource, StaticMetricsSource};
pub use store::{
    ControllerStorage, CoordinationStore, HistoryStorage, MemoryCoordinationStore, MemoryStore,
    ScaleConfigStorage,
};
pub use trends::{TrendsConfig, TrendsLearner};
pub use trigger::{PeriodicTrigger, TriggerConfig};
