//! Scaling execution contract and replica constraints

use crate::error::Result;
use crate::store::ControllerStorage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result reported by a scaling executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScalingOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Trait for applying a replica target to an application
#[async_trait]
pub trait ScalingExecutor: Send + Sync {
    async fn execute_scaling(
        &self,
        application_id: &str,
        target_pods: u32,
        reason: &str,
    ) -> Result<ScalingOutcome>;

    /// Live replica count read from the cluster, when the executor can see it.
    /// `None` means the stored controller record is authoritative.
    async fn live_replicas(&self, _application_id: &str) -> Result<Option<u32>> {
        Ok(None)
    }
}

/// Replica count to scale from: the live count when the executor reports one,
/// else the newest controller record. `None` when the application has no
/// controller.
pub async fn current_replicas(
    executor: &dyn ScalingExecutor,
    controllers: &dyn ControllerStorage,
    application_id: &str,
) -> Result<Option<u32>> {
    if let Some(live) = executor.live_replicas(application_id).await? {
        return Ok(Some(live));
    }
    Ok(controllers
        .latest_controller(application_id)
        .await?
        .map(|record| record.replicas))
}

/// Clamp a desired replica count into `[min_pods ?? 1, max_pods ?? unbounded]`.
///
/// The lower bound is applied first, so a `max_pods` below `min_pods` wins.
pub fn apply_scale_constraints(target: i64, min_pods: Option<u32>, max_pods: Option<u32>) -> u32 {
    let lower = i64::from(min_pods.unwrap_or(1));
    let mut resolved = target.max(lower);
    if let Some(max) = max_pods {
        resolved = resolved.min(i64::from(max));
    }
    resolved.clamp(0, i64::from(u32::MAX)) as u32
}
