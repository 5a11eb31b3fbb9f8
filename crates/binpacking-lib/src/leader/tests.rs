//! Election timing tests on a paused clock
//!
//! All candidates share one in-memory lease. Timings are the production
//! defaults: 15s lease duration, 10s renew deadline, 2s retry period.

use super::elector::jittered;
use super::*;
use crate::observability::StructuredLogger;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

const NAMESPACE: &str = "monitoring";
const LEASE: &str = "kube-cluster-binpacking-exporter";

/// Longest wait between two acquire attempts
const MAX_RETRY_WAIT: Duration = Duration::from_millis(4400);

/// Wraps the shared store, records successful writes and can be cut off
#[derive(Clone)]
struct ObservedBackend {
    inner: InMemoryLeaseBackend,
    partitioned: Arc<AtomicBool>,
    last_write: Arc<Mutex<Option<Instant>>>,
}

impl ObservedBackend {
    fn new(inner: InMemoryLeaseBackend) -> Self {
        Self {
            inner,
            partitioned: Arc::new(AtomicBool::new(false)),
            last_write: Arc::new(Mutex::new(None)),
        }
    }

    fn partition(&self) {
        self.partitioned.store(true, Ordering::SeqCst);
    }

    fn last_write(&self) -> Instant {
        self.last_write.lock().unwrap().expect("no successful write")
    }

    fn check(&self) -> Result<(), LeaseError> {
        if self.partitioned.load(Ordering::SeqCst) {
            return Err(LeaseError::Backend("connection refused".to_string()));
        }
        Ok(())
    }

    fn wrote(&self, result: Result<LeaseRecord, LeaseError>) -> Result<LeaseRecord, LeaseError> {
        if result.is_ok() {
            *self.last_write.lock().unwrap() = Some(Instant::now());
        }
        result
    }
}

#[async_trait]
impl LeaseBackend for ObservedBackend {
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        self.check()?;
        self.inner.get().await
    }

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        self.check()?;
        let result = self.inner.create(record).await;
        self.wrote(result)
    }

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        self.check()?;
        let result = self.inner.update(record).await;
        self.wrote(result)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

struct Candidate {
    status: Arc<LeaderStatus>,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<ElectionOutcome>,
}

fn spawn_candidate(identity: &str, backend: Arc<dyn LeaseBackend>) -> Candidate {
    let config = LeaderElectionConfig::new(LEASE, NAMESPACE, identity);
    assert!(config.validate().is_ok());

    let elector = LeaderElector::new(config, backend, StructuredLogger::new(identity));
    let status = elector.status();
    let (shutdown, rx) = broadcast::channel(1);
    let handle = tokio::spawn(elector.run(rx));

    Candidate {
        status,
        shutdown,
        handle,
    }
}

async fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(start.elapsed() <= limit, "condition not met within {:?}", limit);
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_candidate_acquires_and_releases() {
    let store = InMemoryLeaseBackend::new(NAMESPACE, LEASE);
    let a = spawn_candidate("exporter-a", Arc::new(store.clone()));

    wait_for(Duration::from_secs(1), || a.status.is_leader()).await;
    assert_eq!(a.status.state(), LeaderState::Leader);
    assert_eq!(a.status.current_leader().as_deref(), Some("exporter-a"));

    let record = store.get().await.unwrap().unwrap();
    assert_eq!(record.holder_identity, "exporter-a");
    assert_eq!(record.lease_duration, Duration::from_secs(15));
    assert_eq!(record.lease_transitions, 0);

    // renewals keep the acquire time and move the renew time
    sleep(Duration::from_secs(7)).await;
    let renewed = store.get().await.unwrap().unwrap();
    assert_eq!(renewed.acquire_time, record.acquire_time);
    assert_ne!(renewed.resource_version, record.resource_version);

    a.shutdown.send(()).unwrap();
    assert_eq!(a.handle.await.unwrap(), ElectionOutcome::Shutdown);
    assert!(!a.status.is_leader());

    let released = store.get().await.unwrap().unwrap();
    assert_eq!(released.holder_identity, "");
    assert_eq!(released.lease_duration, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_second_candidate_blocked_while_leader_renews() {
    let store = InMemoryLeaseBackend::new(NAMESPACE, LEASE);
    let a = spawn_candidate("exporter-a", Arc::new(store.clone()));
    wait_for(Duration::from_secs(1), || a.status.is_leader()).await;

    let b = spawn_candidate("exporter-b", Arc::new(store.clone()));
    sleep(Duration::from_secs(60)).await;

    assert!(a.status.is_leader());
    assert!(!b.status.is_leader());
    assert_eq!(b.status.state(), LeaderState::Candidate);
    assert_eq!(b.status.current_leader().as_deref(), Some("exporter-a"));

    let record = store.get().await.unwrap().unwrap();
    assert_eq!(record.holder_identity, "exporter-a");
    assert_eq!(record.lease_transitions, 0);

    b.shutdown.send(()).unwrap();
    assert_eq!(b.handle.await.unwrap(), ElectionOutcome::Shutdown);
    // a non-leader leaves the lease untouched on shutdown
    assert_eq!(
        store.get().await.unwrap().unwrap().holder_identity,
        "exporter-a"
    );
}

#[tokio::test(start_paused = true)]
async fn test_failover_after_leader_crash() {
    let store = InMemoryLeaseBackend::new(NAMESPACE, LEASE);
    let a_backend = ObservedBackend::new(store.clone());
    let a = spawn_candidate("exporter-a", Arc::new(a_backend.clone()));
    wait_for(Duration::from_secs(1), || a.status.is_leader()).await;

    let b = spawn_candidate("exporter-b", Arc::new(store.clone()));
    sleep(Duration::from_secs(20)).await;

    // abrupt termination: no release
    a.handle.abort();
    let crashed_at_last_write = a_backend.last_write();

    wait_for(Duration::from_secs(60), || b.status.is_leader()).await;
    let took_over = Instant::now() - crashed_at_last_write;

    let lease_duration = Duration::from_secs(15);
    assert!(
        took_over >= lease_duration,
        "took over after {:?}",
        took_over
    );
    assert!(
        took_over <= lease_duration + MAX_RETRY_WAIT * 2 + Duration::from_millis(50),
        "took over after {:?}",
        took_over
    );

    let record = store.get().await.unwrap().unwrap();
    assert_eq!(record.holder_identity, "exporter-b");
    assert_eq!(record.lease_transitions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_partitioned_leader_steps_down_before_takeover() {
    let store = InMemoryLeaseBackend::new(NAMESPACE, LEASE);
    let a_backend = ObservedBackend::new(store.clone());
    let a = spawn_candidate("exporter-a", Arc::new(a_backend.clone()));
    wait_for(Duration::from_secs(1), || a.status.is_leader()).await;

    let b = spawn_candidate("exporter-b", Arc::new(store.clone()));
    sleep(Duration::from_secs(10)).await;

    a_backend.partition();
    wait_for(Duration::from_secs(30), || {
        a.status.state() == LeaderState::NotLeader
    })
    .await;
    let stepped_down = Instant::now() - a_backend.last_write();

    assert!(!a.status.is_leader());
    assert!(!b.status.is_leader(), "two leaders at once");
    assert!(
        stepped_down <= Duration::from_secs(12) + Duration::from_millis(50),
        "stepped down after {:?}",
        stepped_down
    );
    assert_eq!(a.handle.await.unwrap(), ElectionOutcome::LeadershipLost);

    wait_for(Duration::from_secs(30), || b.status.is_leader()).await;
    assert!(Instant::now() - a_backend.last_write() >= Duration::from_secs(15));
    assert_eq!(
        store.get().await.unwrap().unwrap().holder_identity,
        "exporter-b"
    );
}

#[tokio::test(start_paused = true)]
async fn test_released_lease_is_taken_without_waiting_for_expiry() {
    let store = InMemoryLeaseBackend::new(NAMESPACE, LEASE);
    let a = spawn_candidate("exporter-a", Arc::new(store.clone()));
    wait_for(Duration::from_secs(1), || a.status.is_leader()).await;

    let b = spawn_candidate("exporter-b", Arc::new(store.clone()));
    sleep(Duration::from_secs(5)).await;

    a.shutdown.send(()).unwrap();
    assert_eq!(a.handle.await.unwrap(), ElectionOutcome::Shutdown);
    let released_at = Instant::now();

    wait_for(Duration::from_secs(15), || b.status.is_leader()).await;
    assert!(Instant::now() - released_at <= MAX_RETRY_WAIT + Duration::from_millis(50));

    let record = store.get().await.unwrap().unwrap();
    assert_eq!(record.holder_identity, "exporter-b");
    assert_eq!(record.lease_transitions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_backend_never_leads() {
    let backend = ObservedBackend::new(InMemoryLeaseBackend::new(NAMESPACE, LEASE));
    backend.partition();
    let a = spawn_candidate("exporter-a", Arc::new(backend));

    sleep(Duration::from_secs(30)).await;
    assert!(!a.status.is_leader());

    a.shutdown.send(()).unwrap();
    assert_eq!(a.handle.await.unwrap(), ElectionOutcome::Shutdown);
}

#[test]
fn test_leader_status_defaults() {
    let status = LeaderStatus::new("exporter-a");
    assert_eq!(status.identity(), "exporter-a");
    assert!(!status.is_leader());
    assert_eq!(status.state(), LeaderState::Candidate);
    assert_eq!(status.current_leader(), None);
    assert_eq!(LeaderState::NotLeader.to_string(), "not_leader");
}

#[test]
fn test_jitter_bounds() {
    let base = Duration::from_secs(2);
    for _ in 0..100 {
        let wait = jittered(base, JITTER_FACTOR);
        assert!(wait >= base);
        assert!(wait <= MAX_RETRY_WAIT);
    }
    assert_eq!(jittered(Duration::ZERO, JITTER_FACTOR), Duration::ZERO);
}
