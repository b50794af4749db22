//! Pod Scaler - predictive and reactive autoscaling for application pods
//!
//! Every replica runs leader election; only the leader fires predictions and
//! runs the periodic reactive checks.

use anyhow::Result;
use pod_scaler::{api, config::ScalerConfig};
use scaler_lib::{
    AlertDebouncer, ClusterScalingExecutor, HealthRegistry, LeaderCoordinator, MemoryCluster,
    MemoryCoordinationStore, MemoryStore, PerformanceHistory, PeriodicTrigger,
    PredictionScheduler, ReactiveDeps, ReactiveExecutor, ScalerMetrics, ScalerRuntime,
    SchedulerDeps, StaticMetricsSource, StructuredLogger, TrendsLearner,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = ScalerConfig::load()?;
    info!(replica_id = %config.replica_id, api_port = config.api_port, "Scaler configured");

    let logger = StructuredLogger::new(&config.replica_id);
    logger.log_startup(SCALER_VERSION);
    let metrics = ScalerMetrics::new();
    let health_registry = HealthRegistry::new();

    // Single-process bindings; replicas sharing a coordination store elect one leader
    let store = Arc::new(MemoryStore::new());
    let coordination = Arc::new(MemoryCoordinationStore::new());
    let metrics_source = Arc::new(StaticMetricsSource::new());
    let executor = Arc::new(ClusterScalingExecutor::new(
        Arc::new(MemoryCluster::new()),
        store.clone(),
    ));

    let coordinator = Arc::new(
        LeaderCoordinator::new(coordination.clone(), config.leader())
            .with_health(health_registry.clone()),
    );
    let history =
        PerformanceHistory::new(store.clone(), metrics_source.clone(), config.evaluation())
            .with_logger(logger.clone());

    let scheduler = Arc::new(PredictionScheduler::new(
        SchedulerDeps {
            store: coordination,
            controllers: store.clone(),
            scale_configs: store.clone(),
            executor: Some(executor.clone()),
            history: Some(history.clone()),
            leadership: coordinator.clone(),
            health: health_registry.clone(),
        },
        config.scheduler(),
        logger.clone(),
    ));

    let reactive = Arc::new(ReactiveExecutor::new(
        ReactiveDeps {
            metrics_source,
            controllers: store.clone(),
            scale_configs: store.clone(),
            executor,
            history: history.clone(),
            leadership: coordinator.clone(),
        },
        config.thresholds(),
        AlertDebouncer::new(config.debounce_window()),
        logger.clone(),
    ));

    let trigger = Arc::new(PeriodicTrigger::new(
        reactive,
        TrendsLearner::new(history.clone(), config.trends()),
        scheduler.clone(),
        store,
        coordinator.clone(),
        health_registry.clone(),
        config.trigger(),
    ));

    let runtime = Arc::new(ScalerRuntime::new(
        coordinator,
        scheduler,
        trigger,
        history,
        health_registry.clone(),
        logger.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, shutdown_tx.subscribe()));

    let runtime_handle = tokio::spawn({
        let runtime = runtime.clone();
        let shutdown = shutdown_tx.subscribe();
        async move { runtime.run(shutdown).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    let _ = shutdown_tx.send(());

    if let Err(e) = runtime_handle.await {
        error!(error = %e, "Scaler runtime task failed");
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
