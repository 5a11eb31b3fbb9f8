//! Snapshot sources consumed by the collector

use super::sync_info::CacheKind;
use crate::models::{NodeSnapshot, WorkloadSnapshot};
use thiserror::Error;

/// Failure to produce a snapshot; transient from the collector's view
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("{0} cache has not completed its initial sync")]
    NotSynced(CacheKind),

    #[error("listing {cache} cache failed: {message}")]
    List { cache: CacheKind, message: String },
}

/// Read-only access to the current set of nodes
pub trait NodeSource: Send + Sync {
    fn list(&self) -> Result<Vec<NodeSnapshot>, CacheError>;
}

/// Read-only access to the current set of pods
pub trait WorkloadSource: Send + Sync {
    fn list(&self) -> Result<Vec<WorkloadSnapshot>, CacheError>;
}
