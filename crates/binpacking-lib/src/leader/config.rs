//! Leader election settings and in-cluster detection

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Where Kubernetes mounts the pod's namespace via the service account volume
pub const SERVICE_ACCOUNT_NAMESPACE_FILE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaderElectionError {
    #[error("lease name must not be empty")]
    MissingLeaseName,

    #[error("lease namespace must not be empty")]
    MissingNamespace,

    #[error("leader election identity must not be empty")]
    MissingIdentity,

    #[error("{0} must be greater than zero")]
    NonPositiveDuration(&'static str),

    #[error("lease_duration ({lease_duration:?}) must be greater than renew_deadline ({renew_deadline:?})")]
    LeaseDurationTooShort {
        lease_duration: Duration,
        renew_deadline: Duration,
    },

    #[error("renew_deadline ({renew_deadline:?}) must be greater than retry_period ({retry_period:?})")]
    RenewDeadlineTooShort {
        renew_deadline: Duration,
        retry_period: Duration,
    },

    #[error("cannot detect namespace from {path} (not running in-cluster?): set leader_election.namespace explicitly: {reason}")]
    NamespaceUnavailable { path: String, reason: String },

    #[error("namespace file {0} is empty: set leader_election.namespace explicitly")]
    EmptyNamespaceFile(String),

    #[error("cannot detect identity from hostname: set leader_election.id explicitly: {0}")]
    IdentityUnavailable(String),
}

/// Lease coordinates and timings for one election participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub lease_namespace: String,
    pub identity: String,
    /// How long a lease stays valid without renewal
    pub lease_duration: Duration,
    /// How long the holder keeps retrying a renewal before giving up
    pub renew_deadline: Duration,
    /// Interval between acquire and renew attempts
    pub retry_period: Duration,
}

impl LeaderElectionConfig {
    pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
    pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
    pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);

    /// Create a config with the default 15s/10s/2s timings
    pub fn new(
        lease_name: impl Into<String>,
        lease_namespace: impl Into<String>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            lease_name: lease_name.into(),
            lease_namespace: lease_namespace.into(),
            identity: identity.into(),
            lease_duration: Self::DEFAULT_LEASE_DURATION,
            renew_deadline: Self::DEFAULT_RENEW_DEADLINE,
            retry_period: Self::DEFAULT_RETRY_PERIOD,
        }
    }

    pub fn with_timings(
        mut self,
        lease_duration: Duration,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        self.lease_duration = lease_duration;
        self.renew_deadline = renew_deadline;
        self.retry_period = retry_period;
        self
    }

    /// `namespace/name` of the lease
    pub fn lease_key(&self) -> String {
        format!("{}/{}", self.lease_namespace, self.lease_name)
    }

    /// Check names are present and `retry_period < renew_deadline < lease_duration`
    pub fn validate(&self) -> Result<(), LeaderElectionError> {
        if self.lease_name.is_empty() {
            return Err(LeaderElectionError::MissingLeaseName);
        }
        if self.lease_namespace.is_empty() {
            return Err(LeaderElectionError::MissingNamespace);
        }
        if self.identity.is_empty() {
            return Err(LeaderElectionError::MissingIdentity);
        }

        for (name, value) in [
            ("lease_duration", self.lease_duration),
            ("renew_deadline", self.renew_deadline),
            ("retry_period", self.retry_period),
        ] {
            if value.is_zero() {
                return Err(LeaderElectionError::NonPositiveDuration(name));
            }
        }

        if self.lease_duration <= self.renew_deadline {
            return Err(LeaderElectionError::LeaseDurationTooShort {
                lease_duration: self.lease_duration,
                renew_deadline: self.renew_deadline,
            });
        }
        if self.renew_deadline <= self.retry_period {
            return Err(LeaderElectionError::RenewDeadlineTooShort {
                renew_deadline: self.renew_deadline,
                retry_period: self.retry_period,
            });
        }

        Ok(())
    }
}

/// The override if set, otherwise the service account namespace file
pub fn detect_namespace(override_ns: Option<&str>) -> Result<String, LeaderElectionError> {
    detect_namespace_from(override_ns, Path::new(SERVICE_ACCOUNT_NAMESPACE_FILE))
}

pub fn detect_namespace_from(
    override_ns: Option<&str>,
    path: &Path,
) -> Result<String, LeaderElectionError> {
    if let Some(ns) = override_ns.filter(|ns| !ns.is_empty()) {
        return Ok(ns.to_string());
    }

    let data = std::fs::read_to_string(path).map_err(|e| {
        LeaderElectionError::NamespaceUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })?;
    let ns = data.trim();
    if ns.is_empty() {
        return Err(LeaderElectionError::EmptyNamespaceFile(
            path.display().to_string(),
        ));
    }
    Ok(ns.to_string())
}

/// The override if set, otherwise the host name (the pod name in-cluster)
pub fn detect_identity(override_id: Option<&str>) -> Result<String, LeaderElectionError> {
    if let Some(id) = override_id.filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }

    hostname::get()
        .map_err(|e| LeaderElectionError::IdentityUnavailable(e.to_string()))?
        .into_string()
        .map_err(|raw| {
            LeaderElectionError::IdentityUnavailable(format!(
                "host name {:?} is not valid UTF-8",
                raw
            ))
        })
}
