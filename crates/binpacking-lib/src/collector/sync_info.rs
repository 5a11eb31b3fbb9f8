//! Cache synchronization status shared between the caches and consumers

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

/// The two object caches the exporter reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Node,
    Pod,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Node => "node",
            CacheKind::Pod => "pod",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync state written by the cache watchers and read by scrapes and probes
#[derive(Debug)]
pub struct SyncInfo {
    resync_period: Duration,
    node_relist: RwLock<Option<DateTime<Utc>>>,
    pod_relist: RwLock<Option<DateTime<Utc>>>,
}

impl SyncInfo {
    pub fn new(resync_period: Duration) -> Self {
        Self {
            resync_period,
            node_relist: RwLock::new(None),
            pod_relist: RwLock::new(None),
        }
    }

    pub fn resync_period(&self) -> Duration {
        self.resync_period
    }

    /// Older of the two latest relists, `None` until both caches have listed
    pub fn last_full_sync(&self) -> Option<DateTime<Utc>> {
        let node = self.last_relist(CacheKind::Node)?;
        let pod = self.last_relist(CacheKind::Pod)?;
        Some(node.min(pod))
    }

    /// Time of the latest completed list of one cache
    pub fn last_relist(&self, cache: CacheKind) -> Option<DateTime<Utc>> {
        match self.slot(cache).read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Record a completed list of one cache at `at`
    pub fn mark_synced(&self, cache: CacheKind, at: DateTime<Utc>) {
        match self.slot(cache).write() {
            Ok(mut guard) => *guard = Some(at),
            Err(poisoned) => *poisoned.into_inner() = Some(at),
        }
    }

    pub fn is_synced(&self, cache: CacheKind) -> bool {
        self.last_relist(cache).is_some()
    }

    pub fn node_synced(&self) -> bool {
        self.is_synced(CacheKind::Node)
    }

    pub fn pod_synced(&self) -> bool {
        self.is_synced(CacheKind::Pod)
    }

    /// Both caches have completed an initial list
    pub fn is_ready(&self) -> bool {
        self.node_synced() && self.pod_synced()
    }

    /// Elapsed time since the last full resync; clock steps backwards read as zero
    pub fn cache_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_full_sync()?;
        Some((now - last).to_std().unwrap_or(Duration::ZERO))
    }

    fn slot(&self, cache: CacheKind) -> &RwLock<Option<DateTime<Utc>>> {
        match cache {
            CacheKind::Node => &self.node_relist,
            CacheKind::Pod => &self.pod_relist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_info_initial_state() {
        let info = SyncInfo::new(Duration::from_secs(300));

        assert_eq!(info.resync_period(), Duration::from_secs(300));
        assert!(info.last_full_sync().is_none());
        assert!(info.cache_age(Utc::now()).is_none());
        assert!(!info.is_ready());
    }

    #[test]
    fn test_full_sync_requires_both_caches() {
        let info = SyncInfo::new(Duration::from_secs(300));
        let t0 = Utc::now();

        info.mark_synced(CacheKind::Node, t0);
        assert!(info.node_synced());
        assert!(!info.pod_synced());
        assert!(info.last_full_sync().is_none());

        info.mark_synced(CacheKind::Pod, t0);
        assert!(info.is_ready());
        assert_eq!(info.last_full_sync(), Some(t0));
    }

    #[test]
    fn test_readiness_matrix() {
        for (node, pod, ready) in [
            (true, true, true),
            (true, false, false),
            (false, true, false),
            (false, false, false),
        ] {
            let info = SyncInfo::new(Duration::from_secs(60));
            if node {
                info.mark_synced(CacheKind::Node, Utc::now());
            }
            if pod {
                info.mark_synced(CacheKind::Pod, Utc::now());
            }
            assert_eq!(info.is_ready(), ready, "node={} pod={}", node, pod);
        }
    }

    #[test]
    fn test_single_cache_relist_does_not_refresh_full_sync() {
        let info = SyncInfo::new(Duration::from_secs(300));
        let t0 = Utc::now() - chrono::Duration::seconds(600);
        let t1 = t0 + chrono::Duration::seconds(300);

        info.mark_synced(CacheKind::Node, t0);
        info.mark_synced(CacheKind::Pod, t0);
        // pod watcher stuck, only nodes relist
        info.mark_synced(CacheKind::Node, t1);

        assert_eq!(info.last_relist(CacheKind::Node), Some(t1));
        assert_eq!(info.last_full_sync(), Some(t0));
        assert_eq!(info.cache_age(t1).unwrap(), Duration::from_secs(300));

        info.mark_synced(CacheKind::Pod, t1);
        assert_eq!(info.last_full_sync(), Some(t1));
        assert_eq!(info.cache_age(t1).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_cache_age() {
        let info = SyncInfo::new(Duration::from_secs(300));
        let synced_at = Utc::now() - chrono::Duration::seconds(30);
        info.mark_synced(CacheKind::Node, synced_at);
        info.mark_synced(CacheKind::Pod, synced_at);

        let age = info
            .cache_age(synced_at + chrono::Duration::seconds(30))
            .unwrap();
        assert_eq!(age, Duration::from_secs(30));

        // clock stepped backwards
        let age = info
            .cache_age(synced_at - chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(age, Duration::ZERO);
    }
}
