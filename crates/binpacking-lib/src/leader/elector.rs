//! Lease-based leader election loop
//!
//! A candidate polls the lease every jittered retry period and takes it
//! over once it is unheld or has not changed for a full lease duration.
//! Expiry is judged against the local monotonic instant at which this
//! process last saw the record change, never against the timestamps
//! written by other replicas, so clock skew between nodes cannot cause
//! an early takeover.
//!
//! Once leading, the holder renews every retry period. If no renewal
//! succeeds within the renew deadline the elector steps down and reports
//! [`ElectionOutcome::LeadershipLost`]; the caller is expected to exit.

use super::backend::{LeaseBackend, LeaseRecord};
use super::config::LeaderElectionConfig;
use crate::observability::StructuredLogger;
use chrono::Utc;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Upper bound of the extra random wait between acquire attempts,
/// as a fraction of the retry period
pub const JITTER_FACTOR: f64 = 1.2;

/// Lease duration written when the holder releases on shutdown
const RELEASED_LEASE_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderState {
    Candidate,
    Leader,
    NotLeader,
}

impl fmt::Display for LeaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LeaderState::Candidate => "candidate",
            LeaderState::Leader => "leader",
            LeaderState::NotLeader => "not_leader",
        };
        f.write_str(s)
    }
}

/// How an election run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// Renewal failed past the renew deadline
    LeadershipLost,
    /// Shutdown was requested; a held lease has been released
    Shutdown,
}

/// Leadership view shared with the rest of the process
#[derive(Debug)]
pub struct LeaderStatus {
    identity: String,
    is_leader: AtomicBool,
    state: RwLock<LeaderState>,
    current_leader: RwLock<Option<String>>,
}

impl LeaderStatus {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            is_leader: AtomicBool::new(false),
            state: RwLock::new(LeaderState::Candidate),
            current_leader: RwLock::new(None),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LeaderState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Last observed holder of the lease, possibly this process
    pub fn current_leader(&self) -> Option<String> {
        match self.current_leader.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_state(&self, state: LeaderState) {
        self.is_leader
            .store(state == LeaderState::Leader, Ordering::SeqCst);
        match self.state.write() {
            Ok(mut guard) => *guard = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    /// Record the observed holder; true when it differs from the previous one
    fn observe_leader(&self, holder: &str) -> bool {
        let mut guard = match self.current_leader.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.as_deref() == Some(holder) {
            return false;
        }
        *guard = Some(holder.to_string());
        true
    }
}

/// Last record seen and when this process saw it change
struct Observed {
    record: LeaseRecord,
    at: Instant,
}

/// One participant in the election for a single lease
pub struct LeaderElector {
    config: LeaderElectionConfig,
    backend: Arc<dyn LeaseBackend>,
    status: Arc<LeaderStatus>,
    logger: StructuredLogger,
    observed: Option<Observed>,
}

impl LeaderElector {
    pub fn new(
        config: LeaderElectionConfig,
        backend: Arc<dyn LeaseBackend>,
        logger: StructuredLogger,
    ) -> Self {
        let status = Arc::new(LeaderStatus::new(config.identity.clone()));
        Self {
            config,
            backend,
            status,
            logger,
            observed: None,
        }
    }

    /// Shared handle to this elector's leadership state
    pub fn status(&self) -> Arc<LeaderStatus> {
        self.status.clone()
    }

    /// Campaign for the lease, then hold it until renewal fails or
    /// `shutdown` fires. A dropped shutdown sender counts as shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> ElectionOutcome {
        info!(
            lease = %self.backend.describe(),
            identity = %self.config.identity,
            lease_duration_ms = self.config.lease_duration.as_millis() as u64,
            renew_deadline_ms = self.config.renew_deadline.as_millis() as u64,
            retry_period_ms = self.config.retry_period.as_millis() as u64,
            "Starting leader election"
        );

        if !self.acquire(&mut shutdown).await {
            self.status.set_state(LeaderState::NotLeader);
            return ElectionOutcome::Shutdown;
        }

        self.status.set_state(LeaderState::Leader);
        self.status.observe_leader(&self.config.identity);
        self.logger.log_leadership(&self.backend.describe(), true);

        loop {
            let stop = tokio::select! {
                _ = shutdown.recv() => true,
                _ = sleep(self.config.retry_period) => false,
            };
            if stop {
                self.release().await;
                return ElectionOutcome::Shutdown;
            }

            let deadline = Instant::now() + self.config.renew_deadline;
            let renewed = tokio::select! {
                renewed = self.renew_until(deadline) => Some(renewed),
                _ = shutdown.recv() => None,
            };
            match renewed {
                Some(true) => {}
                Some(false) => {
                    self.status.set_state(LeaderState::NotLeader);
                    self.logger.log_leadership(&self.backend.describe(), false);
                    return ElectionOutcome::LeadershipLost;
                }
                None => {
                    self.release().await;
                    return ElectionOutcome::Shutdown;
                }
            }
        }
    }

    /// Retry every jittered retry period until the lease is ours;
    /// false on shutdown
    async fn acquire(&mut self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        loop {
            if self.try_acquire_or_renew().await {
                return true;
            }
            let wait = jittered(self.config.retry_period, JITTER_FACTOR);
            tokio::select! {
                _ = shutdown.recv() => return false,
                _ = sleep(wait) => {}
            }
        }
    }

    /// Attempt a renewal immediately, then every retry period, until one
    /// succeeds or `deadline` passes
    async fn renew_until(&mut self, deadline: Instant) -> bool {
        loop {
            match timeout_at(deadline, self.try_acquire_or_renew()).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => {
                    warn!(lease = %self.backend.describe(), "Lease renewal timed out");
                    return false;
                }
            }
            if timeout_at(deadline, sleep(self.config.retry_period))
                .await
                .is_err()
            {
                warn!(lease = %self.backend.describe(), "Failed to renew lease before deadline");
                return false;
            }
        }
    }

    /// One round of the lease protocol: create it if absent, otherwise take
    /// it over when unheld, held by us, or expired
    async fn try_acquire_or_renew(&mut self) -> bool {
        let now = Utc::now();
        let identity = self.config.identity.clone();

        let current = match self.backend.get().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let record = LeaseRecord::new(identity, self.config.lease_duration, now);
                return match self.backend.create(&record).await {
                    Ok(created) => {
                        self.observe(created);
                        true
                    }
                    Err(e) => {
                        debug!(lease = %self.backend.describe(), error = %e, "Failed to create lease");
                        false
                    }
                };
            }
            Err(e) => {
                warn!(lease = %self.backend.describe(), error = %e, "Failed to read lease");
                return false;
            }
        };

        self.observe_if_changed(&current);
        if !current.holder_identity.is_empty()
            && self.status.observe_leader(&current.holder_identity)
            && current.holder_identity != identity
        {
            self.logger
                .log_new_leader(&self.backend.describe(), &current.holder_identity);
        }

        let held_by_other =
            !current.holder_identity.is_empty() && current.holder_identity != identity;
        if held_by_other && self.lease_valid() {
            debug!(
                lease = %self.backend.describe(),
                holder = %current.holder_identity,
                "Lease is held by another candidate and has not expired"
            );
            return false;
        }

        let mut next = LeaseRecord {
            holder_identity: identity.clone(),
            lease_duration: self.config.lease_duration,
            acquire_time: now,
            renew_time: now,
            lease_transitions: current.lease_transitions,
            resource_version: current.resource_version.clone(),
        };
        if current.holder_identity == identity {
            next.acquire_time = current.acquire_time;
        } else {
            next.lease_transitions = current.lease_transitions.saturating_add(1);
        }

        match self.backend.update(&next).await {
            Ok(updated) => {
                self.observe(updated);
                true
            }
            Err(e) => {
                debug!(lease = %self.backend.describe(), error = %e, "Failed to update lease");
                false
            }
        }
    }

    /// Hand the lease back so another candidate can take it without
    /// waiting for expiry
    async fn release(&mut self) {
        self.status.set_state(LeaderState::NotLeader);

        let Some(observed) = &self.observed else {
            return;
        };
        if observed.record.holder_identity != self.config.identity {
            return;
        }

        let released = LeaseRecord {
            holder_identity: String::new(),
            lease_duration: RELEASED_LEASE_DURATION,
            acquire_time: Utc::now(),
            renew_time: Utc::now(),
            lease_transitions: observed.record.lease_transitions,
            resource_version: observed.record.resource_version.clone(),
        };
        match self.backend.update(&released).await {
            Ok(updated) => {
                info!(lease = %self.backend.describe(), "Released leader lease");
                self.observe(updated);
            }
            Err(e) => {
                warn!(lease = %self.backend.describe(), error = %e, "Failed to release lease");
            }
        }
    }

    fn observe(&mut self, record: LeaseRecord) {
        self.observed = Some(Observed {
            record,
            at: Instant::now(),
        });
    }

    fn observe_if_changed(&mut self, record: &LeaseRecord) {
        let changed = match &self.observed {
            Some(observed) => {
                observed.record.resource_version != record.resource_version
                    || !observed.record.same_contents(record)
            }
            None => true,
        };
        if changed {
            self.observe(record.clone());
        }
    }

    /// Whether the observed lease is still within its duration, measured
    /// from when this process last saw it change
    fn lease_valid(&self) -> bool {
        match &self.observed {
            Some(observed) => observed.at + observed.record.lease_duration > Instant::now(),
            None => false,
        }
    }
}

/// `base` plus a random extra wait of up to `factor * base`
pub(crate) fn jittered(base: Duration, factor: f64) -> Duration {
    let max_ms = (base.as_millis() as f64 * factor) as u64;
    base + Duration::from_millis(rand_jitter(max_ms))
}

fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}
