//! Ties leader election to the leader-only components
//!
//! Gaining the lease arms the prediction scheduler and the periodic trigger;
//! losing it cancels both. Shutdown stops everything, cancels pending
//! post-scaling evaluations and releases the lease.

use crate::health::{components, HealthRegistry};
use crate::history::PerformanceHistory;
use crate::leader::LeaderCoordinator;
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::scheduler::PredictionScheduler;
use crate::trigger::PeriodicTrigger;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct ScalerRuntime {
    coordinator: Arc<LeaderCoordinator>,
    scheduler: Arc<PredictionScheduler>,
    trigger: Arc<PeriodicTrigger>,
    history: PerformanceHistory,
    health: HealthRegistry,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl ScalerRuntime {
    pub fn new(
        coordinator: Arc<LeaderCoordinator>,
        scheduler: Arc<PredictionScheduler>,
        trigger: Arc<PeriodicTrigger>,
        history: PerformanceHistory,
        health: HealthRegistry,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            coordinator,
            scheduler,
            trigger,
            history,
            health,
            metrics: ScalerMetrics::new(),
            logger,
        }
    }

    pub fn scheduler(&self) -> &Arc<PredictionScheduler> {
        &self.scheduler
    }

    pub fn trigger(&self) -> &Arc<PeriodicTrigger> {
        &self.trigger
    }

    /// Run until `shutdown` fires
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        for name in [
            components::LEADER,
            components::SCHEDULER,
            components::TRIGGER,
            components::STORE,
        ] {
            self.health.register(name).await;
        }

        let mut leadership = self.coordinator.subscribe();
        let (stop_election, election_shutdown) = broadcast::channel(1);
        let election = tokio::spawn(self.coordinator.clone().run(election_shutdown));
        self.health.set_ready(true).await;

        loop {
            tokio::select! {
                changed = leadership.changed() => {
                    if changed.is_err() {
                        warn!("Leader election ended unexpectedly");
                        self.health.set_unhealthy(components::LEADER, "election stopped").await;
                        break;
                    }
                    let leader = *leadership.borrow_and_update();
                    self.on_leadership(leader).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.health.set_ready(false).await;
        self.trigger.stop().await;
        self.scheduler.stop().await;
        self.history.shutdown();

        // election releases the lease on its way out
        let _ = stop_election.send(());
        if let Err(e) = election.await {
            warn!(error = %e, "Leader election task failed");
        }
        self.metrics.set_leader(false);
        self.health.set_leader(false).await;
        self.logger.log_shutdown("signal");
    }

    async fn on_leadership(&self, leader: bool) {
        self.metrics.set_leader(leader);
        self.health.set_leader(leader).await;
        self.logger.log_leadership_change(leader);

        if leader {
            self.scheduler.start().await;
            self.trigger.start().await;
        } else {
            self.trigger.stop().await;
            self.scheduler.stop().await;
        }
    }
}
