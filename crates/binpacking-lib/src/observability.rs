//! Observability infrastructure for the exporter itself
//!
//! Provides:
//! - Prometheus self-metrics (collection latency, listing errors, leadership)
//! - Structured JSON logging with tracing

use crate::models::ResourceKind;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for scrape-time collection latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Exporter self-metrics
///
/// Handles are cheap to clone; clones share the underlying metrics.
#[derive(Clone)]
pub struct ExporterMetrics {
    collect_duration_seconds: Histogram,
    list_errors: IntCounterVec,
    leader: IntGauge,
}

impl ExporterMetrics {
    /// Create the metrics and register them with `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let collect_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "binpacking_exporter_collect_duration_seconds",
                "Time spent computing binpacking metrics during a scrape",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let list_errors = IntCounterVec::new(
            Opts::new(
                "binpacking_exporter_list_errors_total",
                "Number of failed cache listings during scrapes",
            ),
            &["source"],
        )?;
        let leader = IntGauge::new(
            "binpacking_exporter_leader",
            "Whether this replica currently holds the leader lease (1) or not (0)",
        )?;

        registry.register(Box::new(collect_duration_seconds.clone()))?;
        registry.register(Box::new(list_errors.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            collect_duration_seconds,
            list_errors,
            leader,
        })
    }

    /// Record how long one collection pass took
    pub fn observe_collect_duration(&self, elapsed: Duration) {
        self.collect_duration_seconds.observe(elapsed.as_secs_f64());
    }

    /// Count a failed listing of the given cache
    pub fn inc_list_errors(&self, source: &str) {
        self.list_errors.with_label_values(&[source]).inc();
    }

    pub fn list_errors(&self, source: &str) -> u64 {
        self.list_errors.with_label_values(&[source]).get()
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.leader.set(i64::from(is_leader));
    }
}

/// Structured logger for exporter lifecycle events
///
/// Emits consistent `event = "..."` log lines for startup, shutdown,
/// cache synchronization and leadership changes.
#[derive(Clone)]
pub struct StructuredLogger {
    identity: String,
}

impl StructuredLogger {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    /// Log exporter startup
    pub fn log_startup(&self, version: &str, resources: &[ResourceKind]) {
        let resources = resources
            .iter()
            .map(ResourceKind::as_str)
            .collect::<Vec<_>>()
            .join(",");
        info!(
            event = "exporter_started",
            identity = %self.identity,
            version = %version,
            resources = %resources,
            "Binpacking exporter started"
        );
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            identity = %self.identity,
            reason = %reason,
            "Binpacking exporter shutting down"
        );
    }

    /// Log a completed full list of one cache
    pub fn log_cache_synced(&self, cache: &str, objects: usize) {
        info!(
            event = "cache_synced",
            identity = %self.identity,
            cache = %cache,
            objects = objects,
            "Cache listed from API server"
        );
    }

    /// Log a leadership transition
    pub fn log_leadership(&self, lease: &str, acquired: bool) {
        if acquired {
            info!(
                event = "leadership_acquired",
                identity = %self.identity,
                lease = %lease,
                "Acquired leadership, publishing binpacking metrics"
            );
        } else {
            warn!(
                event = "leadership_lost",
                identity = %self.identity,
                lease = %lease,
                "Lost leadership, exiting to re-enter election"
            );
        }
    }

    /// Log a lease holder other than this replica
    pub fn log_new_leader(&self, lease: &str, leader: &str) {
        info!(
            event = "leader_observed",
            identity = %self.identity,
            lease = %lease,
            leader = %leader,
            "Current leader"
        );
    }
}
