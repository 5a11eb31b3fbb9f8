//! Effective request calculation
//!
//! The scheduler reserves, per resource, the larger of the sum of the
//! regular containers' requests and the largest single init container
//! request. Init containers run one at a time before the regular
//! containers start, so the two groups never add up.

use crate::models::{ResourceKind, WorkloadSnapshot};
use crate::quantity::Quantity;

/// Reservation a workload holds for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveRequest {
    /// Sum across regular containers
    pub regular_sum: Quantity,
    /// Largest single init container request, zero without init containers
    pub init_max: Quantity,
    /// `max(regular_sum, init_max)`
    pub effective: Quantity,
    /// True only when `init_max > regular_sum`
    pub used_init: bool,
}

/// Compute the effective request of `workload` for `kind`.
///
/// Containers that omit the resource contribute zero.
pub fn effective_request(workload: &WorkloadSnapshot, kind: &ResourceKind) -> EffectiveRequest {
    let regular_sum: Quantity = workload.containers.iter().map(|c| c.request(kind)).sum();
    let init_max = workload
        .init_containers
        .iter()
        .map(|c| c.request(kind))
        .max()
        .unwrap_or_default();

    // ties favour the regular sum
    let used_init = init_max > regular_sum;
    let effective = if used_init { init_max } else { regular_sum };

    EffectiveRequest {
        regular_sum,
        init_max,
        effective,
        used_init,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerSpec, WorkloadPhase};

    fn container(name: &str, cpu: &str, memory: &str) -> ContainerSpec {
        let mut spec = ContainerSpec::new(name);
        if !cpu.is_empty() {
            spec = spec.with_request("cpu", Quantity::parse(cpu).unwrap());
        }
        if !memory.is_empty() {
            spec = spec.with_request("memory", Quantity::parse(memory).unwrap());
        }
        spec
    }

    fn pod(containers: Vec<ContainerSpec>, init: Vec<ContainerSpec>) -> WorkloadSnapshot {
        WorkloadSnapshot::new("default", "test-pod", "test-node", WorkloadPhase::Running)
            .with_containers(containers)
            .with_init_containers(init)
    }

    struct Case {
        name: &'static str,
        containers: Vec<ContainerSpec>,
        init: Vec<ContainerSpec>,
        resource: ResourceKind,
        want: f64,
        want_used_init: bool,
    }

    #[test]
    fn test_effective_request_cases() {
        let cases = vec![
            Case {
                name: "regular containers only",
                containers: vec![
                    container("app", "100m", "128Mi"),
                    container("sidecar", "50m", "64Mi"),
                ],
                init: vec![],
                resource: ResourceKind::cpu(),
                want: 0.15,
                want_used_init: false,
            },
            Case {
                name: "init container dominates",
                containers: vec![container("app", "100m", "128Mi")],
                init: vec![container("init-setup", "500m", "256Mi")],
                resource: ResourceKind::cpu(),
                want: 0.5,
                want_used_init: true,
            },
            Case {
                name: "regular containers dominate",
                containers: vec![
                    container("app", "200m", "256Mi"),
                    container("sidecar", "300m", "128Mi"),
                ],
                init: vec![container("init-setup", "100m", "64Mi")],
                resource: ResourceKind::cpu(),
                want: 0.5,
                want_used_init: false,
            },
            Case {
                name: "empty pod",
                containers: vec![],
                init: vec![],
                resource: ResourceKind::cpu(),
                want: 0.0,
                want_used_init: false,
            },
            Case {
                name: "multiple init containers pick the max",
                containers: vec![container("app", "100m", "128Mi")],
                init: vec![
                    container("init-1", "200m", "256Mi"),
                    container("init-2", "500m", "512Mi"),
                    container("init-3", "300m", "128Mi"),
                ],
                resource: ResourceKind::cpu(),
                want: 0.5,
                want_used_init: true,
            },
            Case {
                name: "container without cpu request",
                containers: vec![container("app", "", "128Mi")],
                init: vec![],
                resource: ResourceKind::cpu(),
                want: 0.0,
                want_used_init: false,
            },
            Case {
                name: "some containers have requests",
                containers: vec![
                    container("app", "100m", "128Mi"),
                    container("no-request", "", ""),
                    container("sidecar", "50m", "64Mi"),
                ],
                init: vec![],
                resource: ResourceKind::cpu(),
                want: 0.15,
                want_used_init: false,
            },
            Case {
                name: "memory init dominates",
                containers: vec![
                    container("app", "100m", "256Mi"),
                    container("sidecar", "50m", "128Mi"),
                ],
                init: vec![container("init-setup", "500m", "512Mi")],
                resource: ResourceKind::memory(),
                want: 512.0 * 1024.0 * 1024.0,
                want_used_init: true,
            },
        ];

        for case in cases {
            let request = effective_request(&pod(case.containers, case.init), &case.resource);

            assert_eq!(request.effective.as_f64(), case.want, "{}", case.name);
            assert_eq!(request.used_init, case.want_used_init, "{}", case.name);
            if case.want_used_init {
                assert_eq!(request.init_max, request.effective, "{}", case.name);
            } else {
                assert_eq!(request.regular_sum, request.effective, "{}", case.name);
            }
        }
    }

    #[test]
    fn test_three_init_containers_scenario() {
        let request = effective_request(
            &pod(
                vec![container("app", "100m", "")],
                vec![
                    container("init-1", "200m", ""),
                    container("init-2", "500m", ""),
                    container("init-3", "300m", ""),
                ],
            ),
            &ResourceKind::cpu(),
        );

        assert_eq!(request.init_max, Quantity::from_milli(500));
        assert_eq!(request.regular_sum, Quantity::from_milli(100));
        assert_eq!(request.effective.as_f64(), 0.5);
        assert!(request.used_init);
    }

    #[test]
    fn test_tie_does_not_count_as_init() {
        let request = effective_request(
            &pod(
                vec![container("app", "300m", "")],
                vec![container("init", "300m", "")],
            ),
            &ResourceKind::cpu(),
        );

        assert_eq!(request.effective, Quantity::from_milli(300));
        assert!(!request.used_init);
    }

    #[test]
    fn test_no_init_containers_means_regular_sum() {
        let request = effective_request(
            &pod(
                vec![container("a", "1", "1Gi"), container("b", "2", "1Gi")],
                vec![],
            ),
            &ResourceKind::memory(),
        );

        assert!(!request.used_init);
        assert!(request.init_max.is_zero());
        assert_eq!(request.effective, request.regular_sum);
        assert_eq!(request.effective, Quantity::parse("2Gi").unwrap());
    }

    #[test]
    fn test_absent_resource_is_zero_everywhere() {
        let request = effective_request(
            &pod(
                vec![container("app", "1", "1Gi")],
                vec![container("init", "2", "2Gi")],
            ),
            &ResourceKind::new("nvidia.com/gpu"),
        );

        assert!(request.regular_sum.is_zero());
        assert!(request.init_max.is_zero());
        assert!(request.effective.is_zero());
        assert!(!request.used_init);
    }
}
