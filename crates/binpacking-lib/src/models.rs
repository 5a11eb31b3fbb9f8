//! Core data models for binpacking aggregation

use crate::quantity::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of a trackable resource ("cpu", "memory", "nvidia.com/gpu", ...)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(String);

impl ResourceKind {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn cpu() -> Self {
        Self::new("cpu")
    }

    pub fn memory() -> Self {
        Self::new("memory")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKind {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Parse a comma-separated resource list, skipping blank entries
pub fn parse_resources(csv: &str) -> Vec<ResourceKind> {
    csv.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(ResourceKind::new)
        .collect()
}

/// Requested resources of a single container
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub requests: BTreeMap<ResourceKind, Quantity>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: BTreeMap::new(),
        }
    }

    pub fn with_request(mut self, kind: impl Into<ResourceKind>, amount: Quantity) -> Self {
        self.requests.insert(kind.into(), amount);
        self
    }

    /// Requested amount, zero when the container declares none
    pub fn request(&self, kind: &ResourceKind) -> Quantity {
        self.requests.get(kind).copied().unwrap_or_default()
    }
}

/// Lifecycle phase of a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    /// Map a Kubernetes pod phase string; anything unrecognized is `Unknown`
    pub fn from_pod_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Point-in-time view of a pod
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadSnapshot {
    pub namespace: String,
    pub name: String,
    /// Assigned node, empty while unscheduled
    pub node_name: String,
    pub phase: WorkloadPhase,
    pub containers: Vec<ContainerSpec>,
    pub init_containers: Vec<ContainerSpec>,
}

impl WorkloadSnapshot {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        node_name: impl Into<String>,
        phase: WorkloadPhase,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            node_name: node_name.into(),
            phase,
            containers: Vec::new(),
            init_containers: Vec::new(),
        }
    }

    pub fn with_containers(mut self, containers: Vec<ContainerSpec>) -> Self {
        self.containers = containers;
        self
    }

    pub fn with_init_containers(mut self, init_containers: Vec<ContainerSpec>) -> Self {
        self.init_containers = init_containers;
        self
    }

    /// Whether this workload holds a reservation on a node
    pub fn is_eligible(&self) -> bool {
        !self.node_name.is_empty() && !self.phase.is_terminal()
    }
}

/// Point-in-time view of a node's schedulable capacity
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub name: String,
    pub allocatable: BTreeMap<ResourceKind, Quantity>,
}

impl NodeSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            allocatable: BTreeMap::new(),
        }
    }

    pub fn with_allocatable(mut self, kind: impl Into<ResourceKind>, amount: Quantity) -> Self {
        self.allocatable.insert(kind.into(), amount);
        self
    }

    /// Allocatable amount, zero when the node declares no capacity
    pub fn allocatable(&self, kind: &ResourceKind) -> Quantity {
        self.allocatable.get(kind).copied().unwrap_or_default()
    }
}
