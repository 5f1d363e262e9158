use crate::cycle_state::CycleState;
use crate::plugin::{FilterPlugin, Plugin};
use crate::types::Status;
use minisched_core::{ActionType, ClusterEvent, Node, Pod, Resource, ResourceKind, ResourceQuantities};
use tracing::debug;

/// Rejects nodes that are cordoned (`spec.unschedulable`)
pub struct NodeUnschedulable;

impl NodeUnschedulable {
    pub const NAME: &'static str = "NodeUnschedulable";
}

impl Plugin for NodeUnschedulable {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn events_to_register(&self) -> Vec<ClusterEvent> {
        vec![ClusterEvent::new(
            ResourceKind::Node,
            ActionType::ADD | ActionType::UPDATE,
        )]
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for NodeUnschedulable {
    fn filter(&self, _state: &CycleState, _pod: &Pod, node: &Node) -> Status {
        let cordoned = node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false);

        if cordoned {
            return Status::unschedulable("node(s) were unschedulable");
        }

        Status::success()
    }
}

/// Rejects nodes whose allocatable CPU or memory is below the pod's requests
pub struct NodeResourcesFit;

impl NodeResourcesFit {
    pub const NAME: &'static str = "NodeResourcesFit";
}

impl Plugin for NodeResourcesFit {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn events_to_register(&self) -> Vec<ClusterEvent> {
        vec![
            ClusterEvent::new(ResourceKind::Node, ActionType::ADD | ActionType::UPDATE),
            ClusterEvent::new(ResourceKind::Pod, ActionType::DELETE),
        ]
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        Some(self)
    }
}

impl FilterPlugin for NodeResourcesFit {
    fn filter(&self, _state: &CycleState, pod: &Pod, node: &Node) -> Status {
        let requested = match ResourceQuantities::pod_requests(pod) {
            Ok(requested) => requested,
            Err(e) => {
                return Status::unschedulable(format!("Invalid pod resource requests: {}", e))
            }
        };
        let allocatable = match ResourceQuantities::node_allocatable(node) {
            Ok(allocatable) => allocatable,
            Err(e) => {
                return Status::unschedulable(format!(
                    "Invalid allocatable resources on node {}: {}",
                    node.name(),
                    e
                ))
            }
        };

        debug!(
            "Node {} has CPU: {} milli, Memory: {} bytes; pod {} requests CPU: {} milli, Memory: {} bytes",
            node.name(),
            allocatable.cpu_millicores,
            allocatable.memory_bytes,
            pod.name(),
            requested.cpu_millicores,
            requested.memory_bytes
        );

        if allocatable.fits(&requested) {
            return Status::success();
        }

        let mut reasons = Vec::new();
        if requested.cpu_millicores > allocatable.cpu_millicores {
            reasons.push(format!(
                "Insufficient CPU: requested {} milli, available {} milli",
                requested.cpu_millicores, allocatable.cpu_millicores
            ));
        }
        if requested.memory_bytes > allocatable.memory_bytes {
            reasons.push(format!(
                "Insufficient memory: requested {} bytes, available {} bytes",
                requested.memory_bytes, allocatable.memory_bytes
            ));
        }

        Status::unschedulable(reasons.join(", "))
    }
}
