//! Exporter configuration
//!
//! Settings come from an optional file named by `BINPACKING_CONFIG`,
//! overridden by `BINPACKING_*` environment variables. Nested keys use a
//! double underscore, e.g. `BINPACKING_LEADER_ELECTION__ENABLED=true`.

use anyhow::{bail, Context, Result};
use binpacking_lib::duration::parse_duration;
use binpacking_lib::leader::{detect_identity, detect_namespace, LeaderElectionConfig};
use binpacking_lib::models::{parse_resources, ResourceKind};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the optional configuration file
pub const CONFIG_FILE_ENV: &str = "BINPACKING_CONFIG";

/// Paths served by fixed routes; the metrics path must not collide with them
const RESERVED_PATHS: &[&str] = &["/", "/healthz", "/readyz", "/sync"];

/// Raw exporter configuration as read from file and environment
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Path to a kubeconfig; in-cluster or `~/.kube/config` when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,

    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Comma-separated resources to track
    #[serde(default = "default_resources")]
    pub resources: String,

    #[serde(default)]
    pub debug: bool,

    /// How often the caches relist everything, e.g. `5m`
    #[serde(default = "default_resync_period")]
    pub resync_period: String,

    #[serde(default)]
    pub leader_election: LeaderElectionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderElectionSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_lease_name")]
    pub lease_name: String,

    /// Detected from the service account when unset
    #[serde(default)]
    pub namespace: Option<String>,

    /// Host name when unset
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default = "default_lease_duration")]
    pub lease_duration: String,

    #[serde(default = "default_renew_deadline")]
    pub renew_deadline: String,

    #[serde(default = "default_retry_period")]
    pub retry_period: String,
}

impl Default for LeaderElectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            lease_name: default_lease_name(),
            namespace: None,
            id: None,
            lease_duration: default_lease_duration(),
            renew_deadline: default_renew_deadline(),
            retry_period: default_retry_period(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9101".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_resources() -> String {
    "cpu,memory".to_string()
}

fn default_resync_period() -> String {
    "5m".to_string()
}

fn default_lease_name() -> String {
    "kube-cluster-binpacking-exporter".to_string()
}

fn default_lease_duration() -> String {
    "15s".to_string()
}

fn default_renew_deadline() -> String {
    "10s".to_string()
}

fn default_retry_period() -> String {
    "2s".to_string()
}

/// Validated settings the exporter runs with
#[derive(Debug, Clone)]
pub struct Settings {
    pub kubeconfig: Option<PathBuf>,
    pub metrics_addr: SocketAddr,
    pub metrics_path: String,
    pub resources: Vec<ResourceKind>,
    pub debug: bool,
    pub resync_period: Duration,
    /// `None` when leader election is disabled
    pub leader_election: Option<LeaderElectionConfig>,
}

impl ExporterConfig {
    /// Load configuration from the optional file and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().filter(|p| !p.is_empty());
        Self::from_sources(file, environment())
    }

    pub(crate) fn from_sources(file: Option<String>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?;
        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Parse and validate every setting
    pub fn resolve(&self) -> Result<Settings> {
        let metrics_addr = parse_listen_addr(&self.metrics_addr)?;

        if !self.metrics_path.starts_with('/') {
            bail!("metrics_path {:?} must start with '/'", self.metrics_path);
        }
        if RESERVED_PATHS.contains(&self.metrics_path.as_str()) {
            bail!(
                "metrics_path {:?} collides with a built-in endpoint",
                self.metrics_path
            );
        }

        let resources = parse_resources(&self.resources);
        if resources.is_empty() {
            bail!("resources must name at least one resource");
        }

        let resync_period = parse_duration(&self.resync_period)
            .with_context(|| format!("invalid resync_period {:?}", self.resync_period))?;

        let leader_election = if self.leader_election.enabled {
            Some(self.leader_election.resolve()?)
        } else {
            None
        };

        Ok(Settings {
            kubeconfig: self.kubeconfig.clone().filter(|p| !p.as_os_str().is_empty()),
            metrics_addr,
            metrics_path: self.metrics_path.clone(),
            resources,
            debug: self.debug,
            resync_period,
            leader_election,
        })
    }
}

impl LeaderElectionSettings {
    fn resolve(&self) -> Result<LeaderElectionConfig> {
        let lease_duration = parse_duration(&self.lease_duration).with_context(|| {
            format!("invalid leader_election.lease_duration {:?}", self.lease_duration)
        })?;
        let renew_deadline = parse_duration(&self.renew_deadline).with_context(|| {
            format!("invalid leader_election.renew_deadline {:?}", self.renew_deadline)
        })?;
        let retry_period = parse_duration(&self.retry_period).with_context(|| {
            format!("invalid leader_election.retry_period {:?}", self.retry_period)
        })?;

        let namespace = detect_namespace(self.namespace.as_deref())?;
        let identity = detect_identity(self.id.as_deref())?;

        let config = LeaderElectionConfig::new(self.lease_name.clone(), namespace, identity)
            .with_timings(lease_duration, renew_deadline, retry_period);
        config.validate().context("invalid leader election settings")?;
        Ok(config)
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("BINPACKING")
        .prefix_separator("_")
        .separator("__")
}

/// Accept `host:port`, or `:port` for all interfaces
fn parse_listen_addr(addr: &str) -> Result<SocketAddr> {
    let full = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };
    full.parse()
        .with_context(|| format!("invalid metrics_addr {:?}", addr))
}
