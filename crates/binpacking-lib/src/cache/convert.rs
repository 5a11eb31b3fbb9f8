//! Conversion of Kubernetes objects into snapshots

use crate::models::{ContainerSpec, NodeSnapshot, ResourceKind, WorkloadPhase, WorkloadSnapshot};
use crate::quantity::Quantity;
use k8s_openapi::api::core::v1::{
    Container, Node, NodeStatus, Pod, PodSpec, PodStatus, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity as KubeQuantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::warn;

/// Parse a resource map, dropping entries that fail to parse
fn parse_resource_map(
    owner: &str,
    map: Option<&BTreeMap<String, KubeQuantity>>,
) -> BTreeMap<ResourceKind, Quantity> {
    let Some(map) = map else {
        return BTreeMap::new();
    };

    map.iter()
        .filter_map(|(name, raw)| match Quantity::parse(&raw.0) {
            Ok(quantity) => Some((ResourceKind::new(name.as_str()), quantity)),
            Err(e) => {
                warn!(
                    object = %owner,
                    resource = %name,
                    value = %raw.0,
                    error = %e,
                    "Ignoring unparseable resource quantity"
                );
                None
            }
        })
        .collect()
}

fn container_spec(owner: &str, container: &Container) -> ContainerSpec {
    let owner = format!("{}/{}", owner, container.name);
    let requests = container
        .resources
        .as_ref()
        .and_then(|r| r.requests.as_ref());

    ContainerSpec {
        name: container.name.clone(),
        requests: parse_resource_map(&owner, requests),
    }
}

/// Node name and `status.allocatable`
pub fn node_snapshot(node: &Node) -> NodeSnapshot {
    let name = node.metadata.name.clone().unwrap_or_default();
    let allocatable = node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.as_ref());

    NodeSnapshot {
        allocatable: parse_resource_map(&name, allocatable),
        name,
    }
}

/// Placement, phase and container requests of a pod
pub fn workload_snapshot(pod: &Pod) -> WorkloadSnapshot {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let name = pod.metadata.name.clone().unwrap_or_default();
    let owner = format!("{}/{}", namespace, name);
    let phase = WorkloadPhase::from_pod_phase(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
    );

    let (node_name, containers, init_containers) = match &pod.spec {
        Some(spec) => (
            spec.node_name.clone().unwrap_or_default(),
            spec.containers
                .iter()
                .map(|c| container_spec(&owner, c))
                .collect(),
            spec.init_containers
                .iter()
                .flatten()
                .map(|c| container_spec(&owner, c))
                .collect(),
        ),
        None => (String::new(), Vec::new(), Vec::new()),
    };

    WorkloadSnapshot::new(namespace, name, node_name, phase)
        .with_containers(containers)
        .with_init_containers(init_containers)
}

/// Identity fields only; managed fields, labels and annotations are dropped
fn strip_metadata(meta: &mut ObjectMeta) {
    *meta = ObjectMeta {
        name: meta.name.take(),
        namespace: meta.namespace.take(),
        uid: meta.uid.take(),
        resource_version: meta.resource_version.take(),
        ..Default::default()
    };
}

fn strip_containers(containers: Vec<Container>) -> Vec<Container> {
    containers
        .into_iter()
        .map(|c| Container {
            name: c.name,
            resources: c.resources.map(|r| ResourceRequirements {
                requests: r.requests,
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect()
}

/// Reduce a cached node to what [`node_snapshot`] reads
pub(crate) fn strip_node(node: &mut Node) {
    strip_metadata(&mut node.metadata);
    node.spec = None;
    node.status = node.status.take().map(|status| NodeStatus {
        allocatable: status.allocatable,
        ..Default::default()
    });
}

/// Reduce a cached pod to what [`workload_snapshot`] reads
pub(crate) fn strip_pod(pod: &mut Pod) {
    strip_metadata(&mut pod.metadata);
    pod.spec = pod.spec.take().map(|spec| PodSpec {
        node_name: spec.node_name,
        containers: strip_containers(spec.containers),
        init_containers: spec.init_containers.map(strip_containers),
        ..Default::default()
    });
    pod.status = pod.status.take().map(|status| PodStatus {
        phase: status.phase,
        ..Default::default()
    });
}
