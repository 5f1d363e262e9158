use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};

/// Source of the candidate nodes for a scheduling attempt.
///
/// Called once per attempt; implementations must not hand out a cached
/// topology that outlives the call.
#[async_trait]
pub trait NodeLister: Send + Sync {
    /// List every node currently registered in the cluster
    async fn list_nodes(&self) -> Result<Vec<Node>>;
}

/// Durable record of a pod-to-node assignment.
///
/// Any error is treated by the scheduler as a retryable failure.
#[async_trait]
pub trait Binder: Send + Sync {
    /// Assign `pod` to the node called `node_name`
    async fn bind(&self, pod: &Pod, node_name: &str) -> Result<()>;
}
