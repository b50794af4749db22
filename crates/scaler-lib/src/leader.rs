//! Leader election over a lease in the shared coordination store
//!
//! Every replica polls `acquire_lease` on a fixed interval. The replica that
//! owns the lease is the leader; a lease that stops being renewed expires
//! after its TTL and is picked up by another replica on its next poll.

use crate::health::{components, HealthRegistry};
use crate::store::CoordinationStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Default lease name shared by all scaler replicas
pub const DEFAULT_LEASE_NAME: &str = "pod-scaler-leader";

/// Anything the scaling paths can ask "may I act?"
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Leadership fixed by the caller, for single-replica mode and tests
#[derive(Debug, Default)]
pub struct StaticLeadership(AtomicBool);

impl StaticLeadership {
    pub fn new(leader: bool) -> Self {
        Self(AtomicBool::new(leader))
    }

    pub fn set(&self, leader: bool) {
        self.0.store(leader, Ordering::SeqCst);
    }
}

impl Leadership for StaticLeadership {
    fn is_leader(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for the leader coordinator
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    pub lease_name: String,
    /// Identity of this replica; must be unique across replicas
    pub holder_id: String,
    /// Lease lifetime without renewal
    pub lease_ttl: Duration,
    /// Interval between acquire/renew attempts
    pub poll_interval: Duration,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            holder_id: "pod-scaler-0".to_string(),
            lease_ttl: Duration::from_secs(15),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Acquires and renews the leader lease; publishes leadership on a watch channel
pub struct LeaderCoordinator {
    store: Arc<dyn CoordinationStore>,
    config: LeaderConfig,
    state: watch::Sender<bool>,
    health: Option<HealthRegistry>,
}

impl LeaderCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, config: LeaderConfig) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            store,
            config,
            state,
            health: None,
        }
    }

    /// Report lease store reachability to a health registry
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &LeaderConfig {
        &self.config
    }

    /// Receiver that observes every leadership transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Try to acquire or renew the lease once. A store failure counts as not
    /// holding the lease.
    pub async fn poll_once(&self) -> bool {
        let held = match self
            .store
            .acquire_lease(
                &self.config.lease_name,
                &self.config.holder_id,
                self.config.lease_ttl,
            )
            .await
        {
            Ok(held) => {
                if let Some(health) = &self.health {
                    health.set_healthy(components::LEADER).await;
                }
                held
            }
            Err(e) => {
                warn!(
                    lease = %self.config.lease_name,
                    holder = %self.config.holder_id,
                    error_kind = e.kind(),
                    error = %e,
                    "Lease renewal failed"
                );
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::LEADER, format!("lease renewal failed: {e}"))
                        .await;
                }
                false
            }
        };

        let changed = self.state.send_if_modified(|current| {
            if *current != held {
                *current = held;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(holder = %self.config.holder_id, leader = held, "Leadership changed");
        }
        held
    }

    /// Give up the lease if held, so another replica can take over without
    /// waiting for the TTL
    pub async fn release(&self) {
        if self.is_leader() {
            if let Err(e) = self
                .store
                .release_lease(&self.config.lease_name, &self.config.holder_id)
                .await
            {
                warn!(error = %e, error_kind = e.kind(), "Failed to release leader lease");
            }
        }
        self.state.send_replace(false);
    }

    /// Run the poll loop until shutdown, then release the lease
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            holder = %self.config.holder_id,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Starting leader election"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down leader election");
                    break;
                }
            }
        }

        self.release().await;
    }
}

impl Leadership for LeaderCoordinator {
    fn is_leader(&self) -> bool {
        *self.state.borrow()
    }
}
