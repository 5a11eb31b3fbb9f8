//! Probe and sync status reporting
//!
//! Builds the payloads behind the liveness, readiness and `/sync`
//! endpoints from the shared cache [`SyncInfo`].

use crate::collector::{CacheKind, SyncInfo};
use crate::duration::format_duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness response; the process answering is all it reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

impl LivenessResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReadinessResponse {
    /// Ready once both caches have completed their initial list
    pub fn from_sync_info(sync_info: &SyncInfo) -> Self {
        let pending: Vec<&str> = [CacheKind::Node, CacheKind::Pod]
            .into_iter()
            .filter(|cache| !sync_info.is_synced(*cache))
            .map(|cache| cache.as_str())
            .collect();

        if pending.is_empty() {
            Self {
                ready: true,
                reason: None,
            }
        } else {
            Self {
                ready: false,
                reason: Some(format!(
                    "informer cache not synced: {}",
                    pending.join(", ")
                )),
            }
        }
    }
}

/// Cache synchronization status served on `/sync`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    /// Time of the last full resync, `null` before the first one
    pub last_sync: Option<DateTime<Utc>>,
    /// Whole seconds since `last_sync`
    pub sync_age_seconds: Option<u64>,
    pub resync_period: String,
    pub node_synced: bool,
    pub pod_synced: bool,
}

impl SyncStatusResponse {
    pub fn from_sync_info(sync_info: &SyncInfo, now: DateTime<Utc>) -> Self {
        Self {
            last_sync: sync_info.last_full_sync(),
            sync_age_seconds: sync_info.cache_age(now).map(|age| age.as_secs()),
            resync_period: format_duration(sync_info.resync_period()),
            node_synced: sync_info.node_synced(),
            pod_synced: sync_info.pod_synced(),
        }
    }
}
