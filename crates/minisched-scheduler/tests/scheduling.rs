use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, NodeSpec, PodSpec};
use minisched_cluster::ClusterStore;
use minisched_core::{
    ActionType, Binder, ClusterEvent, MiniSchedError, Node, Pod, Resource, ResourceKind,
};
use minisched_scheduler::{Scheduler, SchedulerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct FailingBinder;

#[async_trait]
impl Binder for FailingBinder {
    async fn bind(&self, _pod: &Pod, _node_name: &str) -> minisched_core::Result<()> {
        Err(MiniSchedError::internal_error("binding API unavailable"))
    }
}

fn create_test_node(name: &str) -> Node {
    let mut node = Node::default();
    node.metadata.name = Some(name.to_string());
    node
}

fn make_test_pod(name: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some("default".to_string());
    pod.spec = Some(PodSpec {
        containers: vec![Container {
            name: "pause".to_string(),
            image: Some("registry.k8s.io/pause:3.9".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    });
    pod
}

fn bound_node(store: &ClusterStore, pod: &Pod) -> Option<String> {
    store
        .get_pod(&pod.resource_key())
        .ok()
        .and_then(|p| p.spec)
        .and_then(|s| s.node_name)
}

/// Start the scheduler loop and the event handler against `store`
fn start(
    store: &Arc<ClusterStore>,
    scheduler: &Arc<Scheduler>,
    token: &CancellationToken,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let handler = scheduler.event_handler();
    let rx = store.subscribe();
    let handler_task = tokio::spawn({
        let token = token.clone();
        async move { handler.run(rx, token).await }
    });
    let scheduler_task = tokio::spawn({
        let scheduler = scheduler.clone();
        let token = token.clone();
        async move { scheduler.run(token).await }
    });
    (handler_task, scheduler_task)
}

#[tokio::test(start_paused = true)]
async fn test_pod_binds_to_matching_node() {
    let store = Arc::new(ClusterStore::new());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        store.clone(),
        SchedulerConfig::default(),
    ));
    let token = CancellationToken::new();
    let (handler_task, scheduler_task) = start(&store, &scheduler, &token);

    for i in 0..10 {
        store.create_node(create_test_node(&format!("node{}", i))).unwrap();
    }
    let pod = store.create_pod(make_test_pod("pod1")).unwrap();

    // NodeNumber holds the pod at permit for one second on node1
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(bound_node(&store, &pod), None);
    assert_eq!(scheduler.waiting_pods().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(bound_node(&store, &pod).as_deref(), Some("node1"));
    assert!(scheduler.waiting_pods().is_empty());

    token.cancel();
    handler_task.await.unwrap();
    scheduler_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_cordoned_node_is_retried_after_update() {
    let store = Arc::new(ClusterStore::new());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        store.clone(),
        SchedulerConfig::default(),
    ));
    let token = CancellationToken::new();
    let (handler_task, scheduler_task) = start(&store, &scheduler, &token);

    let mut node = create_test_node("node1");
    node.spec = Some(NodeSpec {
        unschedulable: Some(true),
        ..Default::default()
    });
    let node = store.create_node(node).unwrap();
    let pod = store.create_pod(make_test_pod("pod1")).unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let parked = scheduler
        .queue()
        .unschedulable_pod(&pod.resource_key())
        .unwrap();
    assert!(parked.unschedulable_plugins.contains("NodeUnschedulable"));

    // A pod event does not concern NodeUnschedulable
    store.create_pod(make_test_pod("bystander")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler
        .queue()
        .unschedulable_pod(&pod.resource_key())
        .is_some());

    let mut uncordoned = node.clone();
    uncordoned.spec = Some(NodeSpec::default());
    store.update_node(uncordoned).unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(bound_node(&store, &pod).as_deref(), Some("node1"));

    token.cancel();
    handler_task.await.unwrap();
    scheduler_task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bind_failure_is_retried_on_any_event() {
    let store = Arc::new(ClusterStore::new());
    let scheduler = Scheduler::new(
        store.clone(),
        Arc::new(FailingBinder),
        SchedulerConfig::default(),
    );
    for i in 0..3 {
        store.create_node(create_test_node(&format!("node{}", i))).unwrap();
    }
    let pod = store.create_pod(make_test_pod("pod1")).unwrap();
    let key = pod.resource_key();

    scheduler.queue().add(pod);
    let info = scheduler.queue().next_pod().await.unwrap();
    scheduler.schedule_one(info, &CancellationToken::new()).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    let parked = scheduler.queue().unschedulable_pod(&key).unwrap();
    assert!(parked.unschedulable_plugins.is_empty());
    assert_eq!(parked.attempts, 1);

    scheduler
        .event_handler()
        .on_resource_changed(&ClusterEvent::new(
            ResourceKind::StorageClass,
            ActionType::ADD,
        ));
    assert!(scheduler.queue().unschedulable_pod(&key).is_none());
    assert!(scheduler.queue().contains(&key));

    tokio::time::sleep(Duration::from_secs(1)).await;
    scheduler.queue().flush_backoff_completed();
    let retried = scheduler.queue().next_pod().await.unwrap();
    assert_eq!(retried.attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_waiting_pods() {
    let store = Arc::new(ClusterStore::new());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        store.clone(),
        SchedulerConfig::default(),
    ));
    let token = CancellationToken::new();
    let (handler_task, scheduler_task) = start(&store, &scheduler, &token);

    store.create_node(create_test_node("node9")).unwrap();
    let pod = store.create_pod(make_test_pod("pod9")).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.waiting_pods().len(), 1);

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), async {
        handler_task.await.unwrap();
        scheduler_task.await.unwrap();
    })
    .await
    .unwrap();
    assert!(scheduler.queue().is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(bound_node(&store, &pod), None);
    assert!(scheduler.waiting_pods().is_empty());
}
