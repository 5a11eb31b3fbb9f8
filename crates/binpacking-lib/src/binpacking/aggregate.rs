//! Node and cluster rollup of effective requests

use super::request::effective_request;
use crate::models::{NodeSnapshot, ResourceKind, WorkloadSnapshot};
use crate::quantity::Quantity;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Allocated versus allocatable figures for one resource
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub resource: ResourceKind,
    pub allocated: Quantity,
    pub allocatable: Quantity,
}

impl AggregateResult {
    /// `allocated / allocatable`, or NaN when no capacity is declared.
    ///
    /// NaN keeps "no capacity" distinguishable from both 0% and 100%.
    pub fn ratio(&self) -> f64 {
        if self.allocatable.is_zero() {
            f64::NAN
        } else {
            self.allocated.as_f64() / self.allocatable.as_f64()
        }
    }
}

/// Per-resource figures for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAggregate {
    pub node: String,
    pub resources: Vec<AggregateResult>,
}

/// Output of one aggregation pass
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAggregate {
    /// One entry per input node, in input order
    pub nodes: Vec<NodeAggregate>,
    /// One entry per resource kind, in configured order
    pub cluster: Vec<AggregateResult>,
    /// Eligible workloads whose node is not in the node list
    pub unattributed_workloads: usize,
}

/// Roll up effective requests of eligible workloads per node and cluster-wide.
///
/// Workloads without a node or in a terminal phase are ignored. Workloads
/// bound to a node missing from `nodes` are dropped with a warning. Cluster
/// ratios come from summed allocated and allocatable, not averaged ratios.
pub fn aggregate(
    nodes: &[NodeSnapshot],
    workloads: &[WorkloadSnapshot],
    resources: &[ResourceKind],
) -> ClusterAggregate {
    let mut by_node: HashMap<&str, Vec<&WorkloadSnapshot>> = HashMap::with_capacity(nodes.len());
    for workload in workloads.iter().filter(|w| w.is_eligible()) {
        by_node
            .entry(workload.node_name.as_str())
            .or_default()
            .push(workload);
    }

    let mut cluster: Vec<AggregateResult> = resources
        .iter()
        .map(|kind| AggregateResult {
            resource: kind.clone(),
            allocated: Quantity::ZERO,
            allocatable: Quantity::ZERO,
        })
        .collect();

    let mut node_aggregates = Vec::with_capacity(nodes.len());
    for node in nodes {
        let assigned = by_node.remove(node.name.as_str()).unwrap_or_default();

        let mut node_resources = Vec::with_capacity(resources.len());
        for (kind, total) in resources.iter().zip(cluster.iter_mut()) {
            let allocated: Quantity = assigned
                .iter()
                .map(|workload| {
                    let request = effective_request(workload, kind);
                    if request.used_init {
                        debug!(
                            namespace = %workload.namespace,
                            pod = %workload.name,
                            resource = %kind,
                            regular_sum = %request.regular_sum,
                            init_max = %request.init_max,
                            "Init container request dominates"
                        );
                    }
                    request.effective
                })
                .sum();
            let allocatable = node.allocatable(kind);

            total.allocated = total.allocated + allocated;
            total.allocatable = total.allocatable + allocatable;

            node_resources.push(AggregateResult {
                resource: kind.clone(),
                allocated,
                allocatable,
            });
        }

        node_aggregates.push(NodeAggregate {
            node: node.name.clone(),
            resources: node_resources,
        });
    }

    // anything left references a node we were not given
    let mut unattributed_workloads = 0;
    for (node, orphans) in by_node {
        for workload in orphans {
            warn!(
                namespace = %workload.namespace,
                pod = %workload.name,
                node = %node,
                "Pod references unknown node, excluded from aggregation"
            );
            unattributed_workloads += 1;
        }
    }

    ClusterAggregate {
        nodes: node_aggregates,
        cluster,
        unattributed_workloads,
    }
}
