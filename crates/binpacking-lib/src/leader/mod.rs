//! Lease-based leader election
//!
//! Replicas compete for a single named lease. The winner is advertised
//! through [`LeaderStatus`]; losing the lease ends the election run so the
//! process can exit and re-enter the election after a restart.

mod backend;
mod config;
mod elector;
mod kube_lock;

#[cfg(test)]
mod tests;

pub use backend::{InMemoryLeaseBackend, LeaseBackend, LeaseError, LeaseRecord};
pub use config::{
    detect_identity, detect_namespace, detect_namespace_from, LeaderElectionConfig,
    LeaderElectionError, SERVICE_ACCOUNT_NAMESPACE_FILE,
};
pub use elector::{ElectionOutcome, LeaderElector, LeaderState, LeaderStatus, JITTER_FACTOR};
pub use kube_lock::KubeLeaseBackend;
