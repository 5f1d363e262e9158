use crate::cycle_state::CycleState;
use crate::types::Status;
use minisched_core::{ClusterEvent, Node, Pod};
use std::time::Duration;

/// A scheduling policy.
///
/// Every plugin has a stable name and implements any subset of the stage
/// traits below. The pipeline asks for each capability through the `as_*`
/// accessors, which return `None` unless the plugin overrides them.
pub trait Plugin: Send + Sync {
    /// Stable name used for failure attribution and requeue filtering
    fn name(&self) -> &str;

    /// Cluster changes that may make a pod this plugin rejected schedulable
    fn events_to_register(&self) -> Vec<ClusterEvent> {
        Vec::new()
    }

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }

    fn as_pre_score(&self) -> Option<&dyn PreScorePlugin> {
        None
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }

    fn as_permit(&self) -> Option<&dyn PermitPlugin> {
        None
    }
}

/// Decides whether a pod can run on a node.
///
/// Must not have side effects: the status is either success or
/// unschedulable with a reason.
pub trait FilterPlugin: Plugin {
    fn filter(&self, state: &CycleState, pod: &Pod, node: &Node) -> Status;
}

/// Runs once per attempt after filtering, before any score call
pub trait PreScorePlugin: Plugin {
    fn pre_score(&self, state: &mut CycleState, pod: &Pod, nodes: &[Node]) -> Status;
}

/// Ranks one feasible node
pub trait ScorePlugin: Plugin {
    fn score(&self, state: &CycleState, pod: &Pod, node_name: &str) -> (i64, Status);
}

/// Approves, rejects or defers binding the pod to the chosen node.
///
/// Returning a wait status with a timeout parks the pod in the waiting
/// registry until the plugin allows it, rejects it, or the timeout fires.
pub trait PermitPlugin: Plugin {
    fn permit(&self, state: &CycleState, pod: &Pod, node_name: &str) -> (Status, Duration);
}
