//! Cluster controller API and the scaling executor built on it

use crate::error::{Result, ScalerError};
use crate::models::{epoch_millis, ControllerRecord};
use crate::scaling::{ScalingExecutor, ScalingOutcome};
use crate::store::ControllerStorage;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Trait for the cluster controller API
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Live replica count of a controller
    async fn get_controller(
        &self,
        controller_id: &str,
        namespace: &str,
        api_version: &str,
        kind: &str,
    ) -> Result<u32>;

    async fn set_controller(&self, controller_id: &str, namespace: &str, replicas: u32)
        -> Result<()>;
}

/// Cluster API double holding replica counts in memory
#[derive(Default)]
pub struct MemoryCluster {
    replicas: DashMap<(String, String), u32>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replicas(&self, controller_id: &str, namespace: &str) -> Option<u32> {
        self.replicas
            .get(&(controller_id.to_string(), namespace.to_string()))
            .map(|r| *r)
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get_controller(
        &self,
        controller_id: &str,
        namespace: &str,
        _api_version: &str,
        _kind: &str,
    ) -> Result<u32> {
        self.replicas(controller_id, namespace)
            .ok_or_else(|| ScalerError::NotFound(format!("{namespace}/{controller_id}")))
    }

    async fn set_controller(
        &self,
        controller_id: &str,
        namespace: &str,
        replicas: u32,
    ) -> Result<()> {
        self.replicas
            .insert((controller_id.to_string(), namespace.to_string()), replicas);
        Ok(())
    }
}

/// Applies replica targets through the cluster API and mirrors them into
/// controller storage
pub struct ClusterScalingExecutor {
    cluster: Arc<dyn ClusterApi>,
    controllers: Arc<dyn ControllerStorage>,
}

impl ClusterScalingExecutor {
    pub fn new(cluster: Arc<dyn ClusterApi>, controllers: Arc<dyn ControllerStorage>) -> Self {
        Self {
            cluster,
            controllers,
        }
    }

    /// Refresh the stored replica count from the live controller.
    /// Returns the live count, or `None` when the application has no controller.
    pub async fn sync_controller(&self, application_id: &str) -> Result<Option<u32>> {
        let Some(record) = self.controllers.latest_controller(application_id).await? else {
            return Ok(None);
        };
        let live = self
            .cluster
            .get_controller(
                &record.controller_id,
                &record.namespace,
                &record.api_version,
                &record.kind,
            )
            .await?;

        if live != record.replicas {
            self.save_replicas(record, live).await?;
        }
        Ok(Some(live))
    }

    async fn save_replicas(&self, previous: ControllerRecord, replicas: u32) -> Result<()> {
        let created_at = epoch_millis().max(previous.created_at + 1);
        self.controllers
            .save_controller(ControllerRecord {
                replicas,
                created_at,
                ..previous
            })
            .await
    }
}

#[async_trait]
impl ScalingExecutor for ClusterScalingExecutor {
    async fn execute_scaling(
        &self,
        application_id: &str,
        target_pods: u32,
        reason: &str,
    ) -> Result<ScalingOutcome> {
        let record = match self.controllers.latest_controller(application_id).await? {
            Some(r) => r,
            None => {
                return Ok(ScalingOutcome::failed(format!(
                    "no controller for application {application_id}"
                )))
            }
        };

        if let Err(e) = self
            .cluster
            .set_controller(&record.controller_id, &record.namespace, target_pods)
            .await
        {
            warn!(
                application_id = %application_id,
                controller_id = %record.controller_id,
                error = %e,
                error_kind = e.kind(),
                "Failed to update controller replicas"
            );
            return Ok(ScalingOutcome::failed(e.to_string()));
        }

        let from = record.replicas;
        if let Err(e) = self.save_replicas(record, target_pods).await {
            // the cluster already changed; the next live read repairs the record
            warn!(
                application_id = %application_id,
                operation = "save_controller",
                error = %e,
                error_kind = e.kind(),
                "Failed to mirror controller replicas"
            );
        }

        info!(
            application_id = %application_id,
            from,
            to = target_pods,
            reason = %reason,
            "Controller replicas updated"
        );
        Ok(ScalingOutcome::succeeded())
    }

    async fn live_replicas(&self, application_id: &str) -> Result<Option<u32>> {
        self.sync_controller(application_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Controller storage whose writes can be made to fail
    struct FlakyWrites {
        inner: Arc<MemoryStore>,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl ControllerStorage for FlakyWrites {
        async fn latest_controller(
            &self,
            application_id: &str,
        ) -> Result<Option<ControllerRecord>> {
            self.inner.latest_controller(application_id).await
        }

        async fn save_controller(&self, record: ControllerRecord) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(ScalerError::Storage("write rejected".to_string()));
            }
            self.inner.save_controller(record).await
        }

        async fn list_applications(&self) -> Result<Vec<String>> {
            self.inner.list_applications().await
        }
    }

    async fn setup() -> (Arc<MemoryCluster>, Arc<MemoryStore>, ClusterScalingExecutor) {
        let cluster = Arc::new(MemoryCluster::new());
        let store = Arc::new(MemoryStore::new());
        cluster.set_controller("web", "default", 3).await.unwrap();
        store
            .save_controller(ControllerRecord {
                application_id: "app".to_string(),
                controller_id: "web".to_string(),
                namespace: "default".to_string(),
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                replicas: 3,
                created_at: 1,
            })
            .await
            .unwrap();
        let executor = ClusterScalingExecutor::new(cluster.clone(), store.clone());
        (cluster, store, executor)
    }

    #[tokio::test]
    async fn test_execute_updates_cluster_and_record() {
        let (cluster, store, executor) = setup().await;

        let outcome = executor.execute_scaling("app", 5, "test").await.unwrap();
        assert!(outcome.success);
        assert_eq!(cluster.replicas("web", "default"), Some(5));
        assert_eq!(store.latest_controller("app").await.unwrap().unwrap().replicas, 5);
    }

    #[tokio::test]
    async fn test_execute_without_controller_fails_softly() {
        let (_cluster, _store, executor) = setup().await;
        let outcome = executor.execute_scaling("missing", 5, "test").await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("no controller"));
    }

    #[tokio::test]
    async fn test_sync_controller_mirrors_live_count() {
        let (cluster, store, executor) = setup().await;
        cluster.set_controller("web", "default", 7).await.unwrap();

        assert_eq!(executor.sync_controller("app").await.unwrap(), Some(7));
        assert_eq!(store.latest_controller("app").await.unwrap().unwrap().replicas, 7);
        assert_eq!(executor.sync_controller("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_live_replicas_prefers_cluster_over_record() {
        let (cluster, _store, executor) = setup().await;
        cluster.set_controller("web", "default", 10).await.unwrap();

        assert_eq!(executor.live_replicas("app").await.unwrap(), Some(10));
        assert_eq!(executor.live_replicas("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mirror_failure_still_reports_success() {
        let (cluster, store, _) = setup().await;
        let flaky = Arc::new(FlakyWrites {
            inner: store.clone(),
            fail_saves: AtomicBool::new(true),
        });
        let executor = ClusterScalingExecutor::new(cluster.clone(), flaky);

        let outcome = executor.execute_scaling("app", 6, "test").await.unwrap();
        assert!(outcome.success);
        assert_eq!(cluster.replicas("web", "default"), Some(6));
        assert_eq!(store.latest_controller("app").await.unwrap().unwrap().replicas, 3);
    }
}
