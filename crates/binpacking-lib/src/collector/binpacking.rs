//! Pull-model binpacking collector
//!
//! Every scrape re-reads the node and pod caches, aggregates them and
//! emits gauge samples. Nothing is retained between scrapes.

use super::source::{NodeSource, WorkloadSource};
use super::sync_info::{CacheKind, SyncInfo};
use crate::binpacking::aggregate;
use crate::models::ResourceKind;
use crate::observability::ExporterMetrics;
use chrono::Utc;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const NODE_LABELS: &[&str] = &["node", "resource"];
const CLUSTER_LABELS: &[&str] = &["resource"];

/// The fixed set of metrics this collector exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinpackingMetric {
    NodeAllocated,
    NodeAllocatable,
    NodeUtilizationRatio,
    ClusterAllocated,
    ClusterAllocatable,
    ClusterUtilizationRatio,
    CacheAgeSeconds,
}

impl BinpackingMetric {
    pub const ALL: [BinpackingMetric; 7] = [
        BinpackingMetric::NodeAllocated,
        BinpackingMetric::NodeAllocatable,
        BinpackingMetric::NodeUtilizationRatio,
        BinpackingMetric::ClusterAllocated,
        BinpackingMetric::ClusterAllocatable,
        BinpackingMetric::ClusterUtilizationRatio,
        BinpackingMetric::CacheAgeSeconds,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NodeAllocated => "binpacking_node_allocated",
            Self::NodeAllocatable => "binpacking_node_allocatable",
            Self::NodeUtilizationRatio => "binpacking_node_utilization_ratio",
            Self::ClusterAllocated => "binpacking_cluster_allocated",
            Self::ClusterAllocatable => "binpacking_cluster_allocatable",
            Self::ClusterUtilizationRatio => "binpacking_cluster_utilization_ratio",
            Self::CacheAgeSeconds => "binpacking_cache_age_seconds",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            Self::NodeAllocated => "Total resource requested by pods scheduled on the node",
            Self::NodeAllocatable => "Allocatable resource capacity of the node",
            Self::NodeUtilizationRatio => {
                "Ratio of requested to allocatable resource on the node (NaN without capacity)"
            }
            Self::ClusterAllocated => "Total resource requested by pods across the cluster",
            Self::ClusterAllocatable => "Allocatable resource capacity across the cluster",
            Self::ClusterUtilizationRatio => {
                "Ratio of requested to allocatable resource across the cluster (NaN without capacity)"
            }
            Self::CacheAgeSeconds => "Seconds since the informer caches last completed a full resync",
        }
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            Self::NodeAllocated | Self::NodeAllocatable | Self::NodeUtilizationRatio => {
                NODE_LABELS
            }
            Self::ClusterAllocated | Self::ClusterAllocatable | Self::ClusterUtilizationRatio => {
                CLUSTER_LABELS
            }
            Self::CacheAgeSeconds => &[],
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }

    fn desc(&self) -> prometheus::Result<Desc> {
        Desc::new(
            self.name().to_string(),
            self.help().to_string(),
            self.label_names().iter().map(|l| l.to_string()).collect(),
            HashMap::new(),
        )
    }

    fn gauge_vec(&self) -> prometheus::Result<GaugeVec> {
        GaugeVec::new(Opts::new(self.name(), self.help()), self.label_names())
    }
}

/// One emitted value, labelled in the order of `metric.label_names()`
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: BinpackingMetric,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    /// Value of the named label, if the metric carries it
    pub fn label(&self, name: &str) -> Option<&str> {
        self.metric
            .label_names()
            .iter()
            .position(|l| *l == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
    }
}

/// Collector computing binpacking metrics from node and pod snapshots
pub struct BinpackingCollector {
    nodes: Arc<dyn NodeSource>,
    workloads: Arc<dyn WorkloadSource>,
    resources: Vec<ResourceKind>,
    sync_info: Option<Arc<SyncInfo>>,
    metrics: Option<ExporterMetrics>,
    descs: Vec<Desc>,
}

impl BinpackingCollector {
    /// Create a collector tracking `resources`
    pub fn new(
        nodes: Arc<dyn NodeSource>,
        workloads: Arc<dyn WorkloadSource>,
        resources: Vec<ResourceKind>,
    ) -> prometheus::Result<Self> {
        let descs = BinpackingMetric::ALL
            .iter()
            .map(BinpackingMetric::desc)
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            nodes,
            workloads,
            resources,
            sync_info: None,
            metrics: None,
            descs,
        })
    }

    /// Emit the cache age sample from this sync status
    pub fn with_sync_info(mut self, sync_info: Arc<SyncInfo>) -> Self {
        self.sync_info = Some(sync_info);
        self
    }

    /// Record collection latency and listing failures
    pub fn with_metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resources(&self) -> &[ResourceKind] {
        &self.resources
    }

    /// The seven descriptors, independent of cluster contents
    pub fn descriptors(&self) -> &[Desc] {
        &self.descs
    }

    /// Run one collection pass, handing every sample to `emit`.
    ///
    /// A failed listing ends the pass after the cache age sample; it is
    /// never surfaced to the caller.
    pub fn collect_samples(&self, mut emit: impl FnMut(Sample)) {
        let start = Instant::now();

        let nodes = match self.nodes.list() {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!(error = %e, "Failed to list nodes, skipping binpacking metrics");
                self.record_list_error(CacheKind::Node);
                self.emit_cache_age(&mut emit);
                return;
            }
        };
        let workloads = match self.workloads.list() {
            Ok(workloads) => workloads,
            Err(e) => {
                warn!(error = %e, "Failed to list pods, skipping binpacking metrics");
                self.record_list_error(CacheKind::Pod);
                self.emit_cache_age(&mut emit);
                return;
            }
        };

        let result = aggregate(&nodes, &workloads, &self.resources);

        for node in &result.nodes {
            for usage in &node.resources {
                let labels = vec![node.node.clone(), usage.resource.to_string()];
                emit(Sample {
                    metric: BinpackingMetric::NodeAllocated,
                    label_values: labels.clone(),
                    value: usage.allocated.as_f64(),
                });
                emit(Sample {
                    metric: BinpackingMetric::NodeAllocatable,
                    label_values: labels.clone(),
                    value: usage.allocatable.as_f64(),
                });
                emit(Sample {
                    metric: BinpackingMetric::NodeUtilizationRatio,
                    label_values: labels,
                    value: usage.ratio(),
                });
            }
        }

        for usage in &result.cluster {
            let labels = vec![usage.resource.to_string()];
            emit(Sample {
                metric: BinpackingMetric::ClusterAllocated,
                label_values: labels.clone(),
                value: usage.allocated.as_f64(),
            });
            emit(Sample {
                metric: BinpackingMetric::ClusterAllocatable,
                label_values: labels.clone(),
                value: usage.allocatable.as_f64(),
            });
            emit(Sample {
                metric: BinpackingMetric::ClusterUtilizationRatio,
                label_values: labels,
                value: usage.ratio(),
            });
        }

        self.emit_cache_age(&mut emit);

        let elapsed = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.observe_collect_duration(elapsed);
        }
        debug!(
            nodes = nodes.len(),
            pods = workloads.len(),
            unattributed = result.unattributed_workloads,
            elapsed_ms = elapsed.as_millis() as u64,
            "Binpacking collection complete"
        );
    }

    fn emit_cache_age(&self, emit: &mut impl FnMut(Sample)) {
        let Some(sync_info) = &self.sync_info else {
            return;
        };
        if let Some(age) = sync_info.cache_age(Utc::now()) {
            emit(Sample {
                metric: BinpackingMetric::CacheAgeSeconds,
                label_values: Vec::new(),
                value: age.as_secs_f64(),
            });
        }
    }

    fn record_list_error(&self, cache: CacheKind) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_list_errors(cache.as_str());
        }
    }
}

impl Collector for BinpackingCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let gauges: Vec<Option<GaugeVec>> = BinpackingMetric::ALL
            .iter()
            .map(|metric| match metric.gauge_vec() {
                Ok(gauge) => Some(gauge),
                Err(e) => {
                    warn!(metric = metric.name(), error = %e, "Failed to build gauge");
                    None
                }
            })
            .collect();

        self.collect_samples(|sample| {
            let Some(gauge) = &gauges[sample.metric.index()] else {
                return;
            };
            let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
            match gauge.get_metric_with_label_values(&values) {
                Ok(g) => g.set(sample.value),
                Err(e) => warn!(metric = sample.metric.name(), error = %e, "Dropped sample"),
            }
        });

        gauges
            .iter()
            .flatten()
            .flat_map(|gauge| Collector::collect(gauge))
            .filter(|family| !family.get_metric().is_empty())
            .collect()
    }
}
