use crate::cycle_state::CycleState;
use crate::event_handler::EventHandler;
use crate::plugin::Plugin;
use crate::queue::{collect_registered_events, QueueConfig, SchedulingQueue};
use crate::score::default_plugins;
use crate::types::{Code, NodeScore, NodeScoreList, PluginToNodeScores, QueuedPodInfo, Status};
use crate::waiting::{waiting_key, WaitingPod, WaitingPods};
use crate::{Result, SchedulerError};
use minisched_core::{Binder, Node, NodeLister, Pod, Resource};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scheduling queue settings
    pub queue: QueueConfig,
    /// Upper bound for any permit wait
    pub max_permit_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            max_permit_timeout: Duration::from_secs(15 * 60),
        }
    }
}

/// Pod scheduler
pub struct Scheduler {
    queue: Arc<SchedulingQueue>,
    waiting_pods: Arc<WaitingPods>,
    plugins: Vec<Arc<dyn Plugin>>,
    node_lister: Arc<dyn NodeLister>,
    binder: Arc<dyn Binder>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler running the default plugins
    pub fn new(
        node_lister: Arc<dyn NodeLister>,
        binder: Arc<dyn Binder>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_plugins(node_lister, binder, config, default_plugins)
    }

    /// Create a scheduler with a custom plugin set.
    ///
    /// `build` receives the waiting-pod registry so permit plugins can
    /// approve or reject the pods they hold.
    pub fn with_plugins<F>(
        node_lister: Arc<dyn NodeLister>,
        binder: Arc<dyn Binder>,
        config: SchedulerConfig,
        build: F,
    ) -> Self
    where
        F: FnOnce(&Arc<WaitingPods>) -> Vec<Arc<dyn Plugin>>,
    {
        let waiting_pods = Arc::new(WaitingPods::new(config.max_permit_timeout));
        let plugins = build(&waiting_pods);
        let registered_events = collect_registered_events(&plugins);
        let queue = Arc::new(SchedulingQueue::new(config.queue.clone(), registered_events));

        Self {
            queue,
            waiting_pods,
            plugins,
            node_lister,
            binder,
            config,
        }
    }

    pub fn queue(&self) -> &Arc<SchedulingQueue> {
        &self.queue
    }

    pub fn waiting_pods(&self) -> &Arc<WaitingPods> {
        &self.waiting_pods
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Handler that feeds cluster changes into this scheduler's queue
    pub fn event_handler(&self) -> EventHandler {
        EventHandler::new(self.queue.clone())
    }

    /// Run the scheduling loop until cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!(
            "Starting scheduler with plugins {:?}",
            self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        let flush_token = token.child_token();
        let flusher = tokio::spawn({
            let queue = self.queue.clone();
            let flush_token = flush_token.clone();
            async move { queue.run(flush_token).await }
        });

        loop {
            let info = tokio::select! {
                _ = token.cancelled() => break,
                next = self.queue.next_pod() => match next {
                    Some(info) => info,
                    None => break,
                },
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.schedule_one(info, &token) => {}
            }
        }

        info!("Scheduler shutting down");
        self.queue.close();
        self.waiting_pods.stop_all();
        flush_token.cancel();
        if let Err(e) = flusher.await {
            warn!("Queue flusher ended abnormally: {}", e);
        }
    }

    /// Run one scheduling attempt for `info`.
    ///
    /// Returns once the pod is bound, requeued, or handed to a background
    /// task waiting on permit approval.
    pub async fn schedule_one(&self, info: QueuedPodInfo, token: &CancellationToken) {
        debug!(
            "Attempting to schedule pod {} (attempt {})",
            info.key(),
            info.attempts
        );

        let mut state = CycleState::new();
        let node_name = match self.schedule_pod(&mut state, &info.pod).await {
            Ok(node_name) => node_name,
            Err(e) => {
                record_failure(&self.queue, info, &e);
                return;
            }
        };

        let waits = match self.run_permit_plugins(&state, &info.pod, &node_name) {
            Ok(waits) => waits,
            Err(e) => {
                record_failure(&self.queue, info, &e);
                return;
            }
        };
        drop(state);

        if waits.is_empty() {
            bind(self.binder.as_ref(), &self.queue, info, &node_name).await;
            return;
        }

        let waiting_pod = self.waiting_pods.register(info.pod.clone(), waits);
        debug!(
            "Pod {} waiting for permit on node {}",
            info.pod_name(),
            node_name
        );

        let queue = self.queue.clone();
        let waiting_pods = self.waiting_pods.clone();
        let binder = self.binder.clone();
        let token = token.clone();
        tokio::spawn(async move {
            let key = waiting_key(&info.pod);
            let outcome = tokio::select! {
                _ = token.cancelled() => {
                    waiting_pods.remove_if_same(&key, &waiting_pod);
                    debug!("Stopped waiting on permit for pod {}", info.pod_name());
                    return;
                }
                outcome = wait_on_permit(&waiting_pod) => outcome,
            };
            waiting_pods.remove_if_same(&key, &waiting_pod);

            match outcome {
                Ok(()) => bind(binder.as_ref(), &queue, info, &node_name).await,
                Err(e) => record_failure(&queue, info, &e),
            }
        });
    }

    /// List nodes, filter, score and pick a host for `pod`
    async fn schedule_pod(&self, state: &mut CycleState, pod: &Pod) -> Result<String> {
        let nodes = self
            .node_lister
            .list_nodes()
            .await
            .map_err(|source| SchedulerError::NodeListing { source })?;

        let feasible = self.run_filter_plugins(state, pod, &nodes)?;
        debug!("Pod {} has {} feasible nodes", pod.name(), feasible.len());

        self.run_pre_score_plugins(state, pod, &feasible)?;
        let scores = self.run_score_plugins(state, pod, &feasible)?;
        let totals = total_scores(&feasible, &scores);

        let selected = select_host(&totals)?;
        info!("Selected node {} for pod {}", selected, pod.name());
        Ok(selected)
    }

    /// Keep the nodes every filter plugin accepts.
    ///
    /// Plugins run in registration order and the first rejection wins. When
    /// nothing survives, the error names every plugin that rejected a node.
    pub fn run_filter_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Node],
    ) -> Result<Vec<Node>> {
        let mut feasible = Vec::new();
        let mut unschedulable_plugins = BTreeSet::new();
        let mut reasons: BTreeMap<String, usize> = BTreeMap::new();

        for node in nodes {
            let mut rejected = false;

            for plugin in &self.plugins {
                let Some(filter) = plugin.as_filter() else {
                    continue;
                };

                let status = filter.filter(state, pod, node);
                if status.is_success() {
                    continue;
                }
                if status.code() == Code::Error {
                    return Err(SchedulerError::plugin_failure(plugin.name(), status.message()));
                }

                debug!(
                    "Node {} filtered out by {}: {}",
                    node.name(),
                    plugin.name(),
                    status.message()
                );
                unschedulable_plugins.insert(plugin.name().to_string());
                *reasons.entry(status.message()).or_default() += 1;
                rejected = true;
                break;
            }

            if !rejected {
                feasible.push(node.clone());
            }
        }

        if feasible.is_empty() {
            let reasons = if reasons.is_empty() {
                "no nodes available to schedule pods".to_string()
            } else {
                reasons
                    .iter()
                    .map(|(reason, count)| format!("{} {}", count, reason))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            return Err(SchedulerError::FitError {
                pod_name: pod.name().to_string(),
                num_nodes: nodes.len(),
                unschedulable_plugins,
                reasons,
            });
        }

        Ok(feasible)
    }

    /// Run every PreScore plugin once; any failure aborts the attempt
    pub fn run_pre_score_plugins(
        &self,
        state: &mut CycleState,
        pod: &Pod,
        nodes: &[Node],
    ) -> Result<()> {
        for plugin in &self.plugins {
            let Some(pre_score) = plugin.as_pre_score() else {
                continue;
            };

            let status = pre_score.pre_score(state, pod, nodes);
            if !status.is_success() {
                return Err(SchedulerError::plugin_failure(plugin.name(), status.message()));
            }
        }
        Ok(())
    }

    /// Score every node with every Score plugin; any failure aborts the attempt
    pub fn run_score_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        nodes: &[Node],
    ) -> Result<PluginToNodeScores> {
        let mut scores = PluginToNodeScores::new();

        for plugin in &self.plugins {
            let Some(scorer) = plugin.as_score() else {
                continue;
            };

            let mut list = NodeScoreList::with_capacity(nodes.len());
            for node in nodes {
                let (score, status) = scorer.score(state, pod, node.name());
                if !status.is_success() {
                    return Err(SchedulerError::plugin_failure(plugin.name(), status.message()));
                }
                list.push(NodeScore::new(node.name(), score));
            }
            scores.insert(plugin.name().to_string(), list);
        }

        Ok(scores)
    }

    /// Run every Permit plugin for the chosen node.
    ///
    /// Returns the plugins that asked to wait, with their timeouts; an empty
    /// map means the pod may be bound right away.
    pub fn run_permit_plugins(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_name: &str,
    ) -> Result<HashMap<String, Duration>> {
        let mut waits = HashMap::new();

        for plugin in &self.plugins {
            let Some(permit) = plugin.as_permit() else {
                continue;
            };

            let (status, timeout) = permit.permit(state, pod, node_name);
            match status.code() {
                Code::Success => {}
                Code::Wait => {
                    waits.insert(
                        plugin.name().to_string(),
                        timeout.min(self.config.max_permit_timeout),
                    );
                }
                Code::Unschedulable => {
                    return Err(SchedulerError::permit_rejected(plugin.name(), status.message()));
                }
                Code::Error => {
                    return Err(SchedulerError::plugin_failure(plugin.name(), status.message()));
                }
            }
        }

        Ok(waits)
    }
}

/// Sum every plugin's score per node, in node order
pub fn total_scores(nodes: &[Node], scores: &PluginToNodeScores) -> NodeScoreList {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let total = scores
                .values()
                .filter_map(|list| list.get(i))
                .map(|node_score| node_score.score)
                .sum();
            NodeScore::new(node.name(), total)
        })
        .collect()
}

/// Pick the highest scoring node, breaking ties uniformly at random
pub fn select_host(scores: &[NodeScore]) -> Result<String> {
    select_host_with(scores, &mut rand::rng())
}

/// Reservoir-sampling host selection with a caller-provided RNG
pub fn select_host_with<R: Rng>(scores: &[NodeScore], rng: &mut R) -> Result<String> {
    let mut iter = scores.iter();
    let first = iter
        .next()
        .ok_or_else(|| SchedulerError::internal_error("empty node score list"))?;

    let mut max_score = first.score;
    let mut selected = &first.name;
    let mut tied = 1u32;

    for node_score in iter {
        if node_score.score > max_score {
            max_score = node_score.score;
            selected = &node_score.name;
            tied = 1;
        } else if node_score.score == max_score {
            tied += 1;
            if rng.random_range(0..tied) == 0 {
                selected = &node_score.name;
            }
        }
    }

    Ok(selected.clone())
}

/// Block until the waiting pod is approved, rejected or timed out
pub async fn wait_on_permit(waiting_pod: &WaitingPod) -> Result<()> {
    status_to_permit_result(waiting_pod.get_signal().await)
}

fn status_to_permit_result(status: Status) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    let plugin = status.failed_plugin().unwrap_or_default().to_string();
    if let Some(waited) = status.timeout() {
        return Err(SchedulerError::PermitTimeout { plugin, waited });
    }

    match status.code() {
        Code::Unschedulable => Err(SchedulerError::permit_rejected(plugin, status.message())),
        _ => Err(SchedulerError::internal_error(format!(
            "waiting on permit failed: {}",
            status.message()
        ))),
    }
}

async fn bind(binder: &dyn Binder, queue: &SchedulingQueue, info: QueuedPodInfo, node_name: &str) {
    match binder.bind(&info.pod, node_name).await {
        Ok(()) => {
            queue.done(&info.key());
            info!(
                "Bound pod {} to node {} after {} attempt(s)",
                info.key(),
                node_name,
                info.attempts
            );
        }
        Err(source) => {
            let err = SchedulerError::BindFailed {
                pod_name: info.pod_name().to_string(),
                node_name: node_name.to_string(),
                source,
            };
            record_failure(queue, info, &err);
        }
    }
}

/// Send a failed pod back to the queue with the plugins to blame
fn record_failure(queue: &SchedulingQueue, info: QueuedPodInfo, err: &SchedulerError) {
    if err.is_unschedulable() {
        info!("Pod {} is unschedulable: {}", info.key(), err);
    } else {
        error!("Error scheduling pod {}: {}", info.key(), err);
    }
    queue.add_unschedulable(info, err.unschedulable_plugins());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{FilterPlugin, PermitPlugin, ScorePlugin};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Container, NodeSpec, PodSpec};
    use minisched_core::{MiniSchedError, ResourceKey};
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticNodes(Vec<Node>);

    #[async_trait]
    impl NodeLister for StaticNodes {
        async fn list_nodes(&self) -> minisched_core::Result<Vec<Node>> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingBinder {
        bound: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Binder for RecordingBinder {
        async fn bind(&self, pod: &Pod, node_name: &str) -> minisched_core::Result<()> {
            self.bound
                .lock()
                .push((pod.name().to_string(), node_name.to_string()));
            Ok(())
        }
    }

    struct FailingLister;

    #[async_trait]
    impl NodeLister for FailingLister {
        async fn list_nodes(&self) -> minisched_core::Result<Vec<Node>> {
            Err(MiniSchedError::internal_error("store offline"))
        }
    }

    /// Scores every node by the length of its name
    struct NameLength;

    impl Plugin for NameLength {
        fn name(&self) -> &str {
            "NameLength"
        }

        fn as_score(&self) -> Option<&dyn ScorePlugin> {
            Some(self)
        }
    }

    impl ScorePlugin for NameLength {
        fn score(&self, _state: &CycleState, _pod: &Pod, node_name: &str) -> (i64, Status) {
            (node_name.len() as i64, Status::success())
        }
    }

    /// Rejects every pod at permit
    struct Gatekeeper;

    impl Plugin for Gatekeeper {
        fn name(&self) -> &str {
            "Gatekeeper"
        }

        fn as_permit(&self) -> Option<&dyn PermitPlugin> {
            Some(self)
        }
    }

    impl PermitPlugin for Gatekeeper {
        fn permit(&self, _state: &CycleState, _pod: &Pod, _node_name: &str) -> (Status, Duration) {
            (Status::unschedulable("closed for maintenance"), Duration::ZERO)
        }
    }

    /// Rejects every node
    struct RejectAll;

    impl Plugin for RejectAll {
        fn name(&self) -> &str {
            "RejectAll"
        }

        fn as_filter(&self) -> Option<&dyn FilterPlugin> {
            Some(self)
        }
    }

    impl FilterPlugin for RejectAll {
        fn filter(&self, _state: &CycleState, _pod: &Pod, _node: &Node) -> Status {
            Status::unschedulable("never")
        }
    }

    /// Rejects every node and counts how often it was asked
    struct CountingReject {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl CountingReject {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Plugin for CountingReject {
        fn name(&self) -> &str {
            self.name
        }

        fn as_filter(&self) -> Option<&dyn FilterPlugin> {
            Some(self)
        }
    }

    impl FilterPlugin for CountingReject {
        fn filter(&self, _state: &CycleState, _pod: &Pod, _node: &Node) -> Status {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Status::unschedulable(format!("rejected by {}", self.name))
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
        pod.metadata.uid = Some(format!("{}-uid", name));
        pod.spec = Some(PodSpec {
            containers: vec![Container {
                name: "pause".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod
    }

    fn test_scheduler<F>(nodes: Vec<Node>, build: F) -> (Scheduler, Arc<RecordingBinder>)
    where
        F: FnOnce(&Arc<WaitingPods>) -> Vec<Arc<dyn Plugin>>,
    {
        let binder = Arc::new(RecordingBinder::default());
        let scheduler = Scheduler::with_plugins(
            Arc::new(StaticNodes(nodes)),
            binder.clone(),
            SchedulerConfig::default(),
            build,
        );
        (scheduler, binder)
    }

    async fn attempt(scheduler: &Scheduler, pod: Pod) -> ResourceKey {
        let key = pod.resource_key();
        scheduler.queue().add(pod);
        let info = scheduler.queue().next_pod().await.unwrap();
        scheduler.schedule_one(info, &CancellationToken::new()).await;
        key
    }

    #[test]
    fn test_select_host_picks_maximum() {
        let scores = vec![
            NodeScore::new("node0", 0),
            NodeScore::new("node1", 10),
            NodeScore::new("node2", 3),
        ];
        assert_eq!(select_host(&scores).unwrap(), "node1");
        assert!(select_host(&[]).is_err());
    }

    #[test]
    fn test_select_host_ties_are_uniform() {
        let scores = vec![
            NodeScore::new("low", 1),
            NodeScore::new("a", 5),
            NodeScore::new("b", 5),
            NodeScore::new("c", 5),
        ];
        let mut rng = StdRng::seed_from_u64(42);
        let trials = 30_000;
        let mut counts: HashMap<String, usize> = HashMap::new();

        for _ in 0..trials {
            let selected = select_host_with(&scores, &mut rng).unwrap();
            *counts.entry(selected).or_default() += 1;
        }

        assert!(!counts.contains_key("low"));
        for name in ["a", "b", "c"] {
            let frequency = counts[name] as f64 / trials as f64;
            assert!(
                (frequency - 1.0 / 3.0).abs() < 0.02,
                "{} selected with frequency {}",
                name,
                frequency
            );
        }
    }

    #[test]
    fn test_total_scores_sums_plugins() {
        let nodes = vec![create_test_node("node0"), create_test_node("node1")];
        let mut scores = PluginToNodeScores::new();
        scores.insert(
            "A".to_string(),
            vec![NodeScore::new("node0", 1), NodeScore::new("node1", 10)],
        );
        scores.insert(
            "B".to_string(),
            vec![NodeScore::new("node0", 100), NodeScore::new("node1", 5)],
        );

        let totals = total_scores(&nodes, &scores);
        assert_eq!(
            totals,
            vec![NodeScore::new("node0", 101), NodeScore::new("node1", 15)]
        );
    }

    #[test]
    fn test_filter_failure_attribution() {
        let mut cordoned = create_test_node("node0");
        cordoned.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..Default::default()
        });
        let nodes = vec![cordoned, create_test_node("node1")];
        let (scheduler, _) = test_scheduler(vec![], default_plugins);

        let pod = make_test_pod("pod1");
        let feasible = scheduler
            .run_filter_plugins(&CycleState::new(), &pod, &nodes)
            .unwrap();
        assert_eq!(feasible.len(), 1);
        assert_eq!(feasible[0].name(), "node1");

        let err = scheduler
            .run_filter_plugins(&CycleState::new(), &pod, &nodes[..1])
            .unwrap_err();
        match err {
            SchedulerError::FitError {
                num_nodes,
                unschedulable_plugins,
                reasons,
                ..
            } => {
                assert_eq!(num_nodes, 1);
                assert!(unschedulable_plugins.contains("NodeUnschedulable"));
                assert_eq!(reasons, "1 node(s) were unschedulable");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_schedule_one_binds_best_node() {
        let nodes = vec![
            create_test_node("n1"),
            create_test_node("node-long"),
            create_test_node("mid"),
        ];
        let (scheduler, binder) = test_scheduler(nodes, |_| vec![Arc::new(NameLength) as Arc<dyn Plugin>]);

        attempt(&scheduler, make_test_pod("pod1")).await;
        assert_eq!(
            binder.bound.lock().clone(),
            vec![("pod1".to_string(), "node-long".to_string())]
        );
        assert_eq!(scheduler.queue().stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_schedule_one_without_nodes_is_unschedulable() {
        let (scheduler, binder) = test_scheduler(vec![], default_plugins);

        let key = attempt(&scheduler, make_test_pod("pod1")).await;
        let info = scheduler.queue().unschedulable_pod(&key).unwrap();
        assert!(info.unschedulable_plugins.is_empty());
        assert!(binder.bound.lock().is_empty());
    }

    #[tokio::test]
    async fn test_filter_rejection_is_attributed() {
        let (scheduler, _) = test_scheduler(vec![create_test_node("node0")], |_| {
            vec![Arc::new(RejectAll) as Arc<dyn Plugin>, Arc::new(NameLength)]
        });

        let key = attempt(&scheduler, make_test_pod("pod1")).await;
        let info = scheduler.queue().unschedulable_pod(&key).unwrap();
        assert_eq!(
            info.unschedulable_plugins,
            BTreeSet::from(["RejectAll".to_string()])
        );
        assert_eq!(info.attempts, 1);
    }

    #[tokio::test]
    async fn test_first_rejecting_filter_short_circuits() {
        let first = CountingReject::new("First");
        let second = CountingReject::new("Second");
        let nodes = vec![create_test_node("node0"), create_test_node("node1")];
        let plugins: Vec<Arc<dyn Plugin>> = vec![first.clone(), second.clone()];
        let (scheduler, _) = test_scheduler(nodes, move |_| plugins);

        let key = attempt(&scheduler, make_test_pod("pod1")).await;
        let info = scheduler.queue().unschedulable_pod(&key).unwrap();
        assert_eq!(
            info.unschedulable_plugins,
            BTreeSet::from(["First".to_string()])
        );
        assert_eq!(first.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_permit_rejection_is_attributed() {
        let (scheduler, binder) = test_scheduler(vec![create_test_node("node0")], |_| {
            vec![Arc::new(NameLength) as Arc<dyn Plugin>, Arc::new(Gatekeeper)]
        });

        let key = attempt(&scheduler, make_test_pod("pod1")).await;
        let info = scheduler.queue().unschedulable_pod(&key).unwrap();
        assert_eq!(
            info.unschedulable_plugins,
            BTreeSet::from(["Gatekeeper".to_string()])
        );
        assert!(binder.bound.lock().is_empty());
    }

    #[tokio::test]
    async fn test_score_state_miss_fails_attempt() {
        let (scheduler, binder) =
            test_scheduler(vec![create_test_node("node1")], default_plugins);

        let key = attempt(&scheduler, make_test_pod("nginx")).await;
        let info = scheduler.queue().unschedulable_pod(&key).unwrap();
        assert_eq!(
            info.unschedulable_plugins,
            BTreeSet::from(["NodeNumber".to_string()])
        );
        assert!(binder.bound.lock().is_empty());
    }

    #[tokio::test]
    async fn test_node_listing_failure_is_unattributed() {
        let scheduler = Scheduler::with_plugins(
            Arc::new(FailingLister),
            Arc::new(RecordingBinder::default()),
            SchedulerConfig::default(),
            default_plugins,
        );

        let key = attempt(&scheduler, make_test_pod("pod1")).await;
        let info = scheduler.queue().unschedulable_pod(&key).unwrap();
        assert!(info.unschedulable_plugins.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_wait_binds_in_background() {
        let nodes = (0..3).map(|i| create_test_node(&format!("node{}", i))).collect();
        let (scheduler, binder) = test_scheduler(nodes, default_plugins);

        attempt(&scheduler, make_test_pod("pod2")).await;
        assert!(binder.bound.lock().is_empty());
        assert_eq!(scheduler.waiting_pods().len(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            binder.bound.lock().clone(),
            vec![("pod2".to_string(), "node2".to_string())]
        );
        assert!(scheduler.waiting_pods().is_empty());
    }

    #[test]
    fn test_status_to_permit_result() {
        assert!(status_to_permit_result(Status::success()).is_ok());

        let err =
            status_to_permit_result(Status::timed_out("NodeNumber", Duration::from_secs(10)))
                .unwrap_err();
        assert!(matches!(err, SchedulerError::PermitTimeout { .. }));

        let err = status_to_permit_result(
            Status::unschedulable("no").with_failed_plugin("NodeNumber"),
        )
        .unwrap_err();
        assert!(matches!(err, SchedulerError::PermitRejected { ref plugin, .. } if plugin == "NodeNumber"));

        let err = status_to_permit_result(Status::error("superseded")).unwrap_err();
        assert!(err.unschedulable_plugins().is_empty());
    }
}
