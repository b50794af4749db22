//! Error types shared by the scaler core and its collaborators.

use thiserror::Error;

/// Result alias used by every collaborator trait in this crate.
pub type Result<T> = std::result::Result<T, ScalerError>;

/// Errors raised at collaborator boundaries.
///
/// The core catches these at the point of use; they are logged with the
/// application id and operation and never escape a timer or trigger loop.
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("metrics service error: {0}")]
    Metrics(String),

    #[error("cluster api error: {0}")]
    Cluster(String),

    #[error("scaling execution error: {0}")]
    Execution(String),

    #[error("coordination store error: {0}")]
    Coordination(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScalerError {
    /// Short operation-agnostic label, used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ScalerError::Storage(_) => "storage",
            ScalerError::Metrics(_) => "metrics",
            ScalerError::Cluster(_) => "cluster",
            ScalerError::Execution(_) => "execution",
            ScalerError::Coordination(_) => "coordination",
            ScalerError::NotFound(_) => "not_found",
            ScalerError::Serialization(_) => "serialization",
            ScalerError::Other(_) => "other",
        }
    }
}
