use crate::queue::SchedulingQueue;
use minisched_core::{
    from_object, is_assigned, ClusterEvent, Pod, ResourceEvent, ResourceKind, WatchEventType,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Feeds cluster watch events into the scheduling queue
#[derive(Clone)]
pub struct EventHandler {
    queue: Arc<SchedulingQueue>,
}

impl EventHandler {
    pub fn new(queue: Arc<SchedulingQueue>) -> Self {
        Self { queue }
    }

    /// A pod without a node was created
    pub fn on_unassigned_pod_added(&self, pod: Pod) {
        self.queue.add(pod);
    }

    /// Something in the cluster changed that may unblock waiting pods
    pub fn on_resource_changed(&self, event: &ClusterEvent) {
        self.queue.move_all_to_active_or_backoff(event);
    }

    /// Dispatch one watch event
    pub fn handle(&self, event: &ResourceEvent) {
        if event.key.kind != ResourceKind::Pod {
            self.on_resource_changed(&event.cluster_event());
            return;
        }

        let pod: Pod = match from_object(event.object.clone()) {
            Ok(pod) => pod,
            Err(e) => {
                warn!("Ignoring malformed pod event for {}: {}", event.key, e);
                return;
            }
        };

        if is_assigned(&pod) {
            self.on_resource_changed(&event.cluster_event());
            return;
        }

        match event.event_type {
            WatchEventType::Added => self.on_unassigned_pod_added(pod),
            WatchEventType::Modified => self.queue.update(pod),
            WatchEventType::Deleted => self.queue.delete(&event.key),
        }
    }

    /// Consume a watch stream until cancelled or the stream closes
    pub async fn run(&self, mut rx: broadcast::Receiver<ResourceEvent>, token: CancellationToken) {
        info!("Starting scheduler event handler");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduler event handler shutting down");
                    return;
                }
                received = rx.recv() => match received {
                    Ok(event) => {
                        debug!(
                            "Handling {:?} event for {} (rv {})",
                            event.event_type, event.key, event.resource_version
                        );
                        self.handle(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(
                            "Event handler lagged by {} events; retrying all unschedulable pods",
                            missed
                        );
                        self.on_resource_changed(&ClusterEvent::wildcard());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Watch stream closed; event handler exiting");
                        return;
                    }
                },
            }
        }
    }
}
