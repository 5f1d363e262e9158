use crate::cycle_state::CycleState;
use crate::filter::{NodeResourcesFit, NodeUnschedulable};
use crate::plugin::{PermitPlugin, Plugin, PreScorePlugin, ScorePlugin};
use crate::types::Status;
use crate::waiting::{waiting_key, WaitingPods};
use minisched_core::{ActionType, ClusterEvent, Node, Pod, Resource, ResourceKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Score awarded to a node whose trailing digit matches the pod's
const MATCH_SCORE: i64 = 10;

/// How long NodeNumber lets a pod wait at permit
const PERMIT_TIMEOUT: Duration = Duration::from_secs(10);

fn trailing_digit(name: &str) -> Option<u32> {
    name.chars().last().and_then(|c| c.to_digit(10))
}

/// Prefers nodes whose name ends in the same digit as the pod's name.
///
/// At permit it holds the pod for as many seconds as the node's trailing
/// digit, then approves it through the waiting registry.
pub struct NodeNumber {
    handle: Arc<WaitingPods>,
}

impl NodeNumber {
    pub const NAME: &'static str = "NodeNumber";

    pub fn new(handle: Arc<WaitingPods>) -> Self {
        Self { handle }
    }
}

impl Plugin for NodeNumber {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn events_to_register(&self) -> Vec<ClusterEvent> {
        vec![ClusterEvent::new(ResourceKind::Node, ActionType::ADD)]
    }

    fn as_pre_score(&self) -> Option<&dyn PreScorePlugin> {
        Some(self)
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }

    fn as_permit(&self) -> Option<&dyn PermitPlugin> {
        Some(self)
    }
}

impl PreScorePlugin for NodeNumber {
    fn pre_score(&self, state: &mut CycleState, pod: &Pod, _nodes: &[Node]) -> Status {
        if let Some(digit) = trailing_digit(pod.name()) {
            state.write(Self::NAME, digit);
        }
        Status::success()
    }
}

impl ScorePlugin for NodeNumber {
    fn score(&self, state: &CycleState, _pod: &Pod, node_name: &str) -> (i64, Status) {
        let pod_digit = match state.read::<u32>(Self::NAME) {
            Ok(digit) => *digit,
            Err(e) => return (0, Status::error(e.to_string())),
        };

        match trailing_digit(node_name) {
            Some(node_digit) if node_digit == pod_digit => (MATCH_SCORE, Status::success()),
            _ => (0, Status::success()),
        }
    }
}

impl PermitPlugin for NodeNumber {
    fn permit(&self, _state: &CycleState, pod: &Pod, node_name: &str) -> (Status, Duration) {
        let Some(node_digit) = trailing_digit(node_name) else {
            return (Status::success(), Duration::ZERO);
        };

        let handle = self.handle.clone();
        let uid = waiting_key(pod);
        let delay = Duration::from_secs(u64::from(node_digit));
        debug!(
            "NodeNumber will allow pod {} on node {} in {:?}",
            pod.name(),
            node_name,
            delay
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The pod is registered only after permit returns
            match handle.wait_for(&uid, PERMIT_TIMEOUT).await {
                Some(waiting_pod) => waiting_pod.allow(NodeNumber::NAME),
                None => debug!("Pod {} was never parked; nothing to allow", uid),
            }
        });

        (Status::wait(""), PERMIT_TIMEOUT)
    }
}

/// The plugins a scheduler runs unless told otherwise, in registration order
pub fn default_plugins(handle: &Arc<WaitingPods>) -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(NodeUnschedulable),
        Arc::new(NodeResourcesFit),
        Arc::new(NodeNumber::new(handle.clone())),
    ]
}
