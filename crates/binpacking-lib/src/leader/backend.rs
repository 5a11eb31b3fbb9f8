//! Lease storage contract and the in-process backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Contents of the shared lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRecord {
    /// Current holder, empty once released
    pub holder_identity: String,
    pub lease_duration: Duration,
    pub acquire_time: DateTime<Utc>,
    pub renew_time: DateTime<Utc>,
    pub lease_transitions: u32,
    /// Version the record was read at; `None` for records not yet stored
    pub resource_version: Option<String>,
}

impl LeaseRecord {
    /// A fresh record held by `identity`
    pub fn new(identity: impl Into<String>, lease_duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            holder_identity: identity.into(),
            lease_duration,
            acquire_time: now,
            renew_time: now,
            lease_transitions: 0,
            resource_version: None,
        }
    }

    /// Same lease state, ignoring the storage version
    pub(crate) fn same_contents(&self, other: &LeaseRecord) -> bool {
        self.holder_identity == other.holder_identity
            && self.lease_duration == other.lease_duration
            && self.acquire_time == other.acquire_time
            && self.renew_time == other.renew_time
            && self.lease_transitions == other.lease_transitions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseError {
    /// Another writer changed or created the lease first
    #[error("lease {0} was modified concurrently")]
    Conflict(String),

    #[error("lease {0} does not exist")]
    NotFound(String),

    #[error("lease backend error: {0}")]
    Backend(String),
}

/// Versioned storage for a single named lease
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Current record, `None` if the lease has never been created
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError>;

    /// Create the lease; fails with `Conflict` if it already exists
    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError>;

    /// Replace the lease if it is still at `record.resource_version`
    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError>;

    /// `namespace/name` of the lease, for logging
    fn describe(&self) -> String;
}

/// In-process lease store shared by clones
///
/// Every backend cloned from the same instance, or built with
/// [`InMemoryLeaseBackend::for_lease`] on a shared store, sees the same records.
#[derive(Clone, Default)]
pub struct InMemoryLeaseBackend {
    key: String,
    leases: Arc<DashMap<String, LeaseRecord>>,
    version: Arc<AtomicU64>,
}

impl InMemoryLeaseBackend {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            key: format!("{}/{}", namespace, name),
            ..Default::default()
        }
    }

    /// A backend for another lease in the same store
    pub fn for_lease(&self, namespace: &str, name: &str) -> Self {
        Self {
            key: format!("{}/{}", namespace, name),
            leases: self.leases.clone(),
            version: self.version.clone(),
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

#[async_trait]
impl LeaseBackend for InMemoryLeaseBackend {
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        Ok(self.leases.get(&self.key).map(|r| r.value().clone()))
    }

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        match self.leases.entry(self.key.clone()) {
            Entry::Occupied(_) => Err(LeaseError::Conflict(self.key.clone())),
            Entry::Vacant(slot) => {
                let mut stored = record.clone();
                stored.resource_version = Some(self.next_version());
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let mut current = self
            .leases
            .get_mut(&self.key)
            .ok_or_else(|| LeaseError::NotFound(self.key.clone()))?;
        if current.resource_version != record.resource_version {
            return Err(LeaseError::Conflict(self.key.clone()));
        }

        let mut stored = record.clone();
        stored.resource_version = Some(self.next_version());
        *current = stored.clone();
        Ok(stored)
    }

    fn describe(&self) -> String {
        self.key.clone()
    }
}
