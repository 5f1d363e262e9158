use crate::plugin::Plugin;
use crate::types::QueuedPodInfo;
use minisched_core::{ClusterEvent, Pod, Resource, ResourceKey};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Configuration for the scheduling queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Backoff after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff
    pub max_backoff: Duration,
    /// How often pods whose backoff elapsed are moved to the active tier
    pub backoff_flush_interval: Duration,
    /// How often the unschedulable tier is checked for stale pods
    pub unschedulable_flush_interval: Duration,
    /// How long a pod may sit unschedulable before it is retried anyway
    pub unschedulable_max_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_flush_interval: Duration::from_secs(1),
            unschedulable_flush_interval: Duration::from_secs(30),
            unschedulable_max_duration: Duration::from_secs(5 * 60),
        }
    }
}

/// Each registered cluster event with the plugins that registered it
pub type RegisteredEvents = Vec<(ClusterEvent, BTreeSet<String>)>;

/// Collect the events every plugin registered, merged by kind and action
pub fn collect_registered_events(plugins: &[Arc<dyn Plugin>]) -> RegisteredEvents {
    let mut registered: RegisteredEvents = Vec::new();

    for plugin in plugins {
        for event in plugin.events_to_register() {
            let existing = registered.iter_mut().find(|(e, _)| {
                e.resource == event.resource && e.action_type == event.action_type
            });
            match existing {
                Some((_, names)) => {
                    names.insert(plugin.name().to_string());
                }
                None => {
                    registered.push((event, BTreeSet::from([plugin.name().to_string()])));
                }
            }
        }
    }

    registered
}

/// Number of pods in each tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub active: usize,
    pub backoff: usize,
    pub unschedulable: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct QueueState {
    active: VecDeque<QueuedPodInfo>,
    backoff: Vec<QueuedPodInfo>,
    unschedulable: HashMap<ResourceKey, QueuedPodInfo>,
    /// Popped pods whose attempt has not finished; true once deleted
    in_flight: HashMap<ResourceKey, bool>,
    closed: bool,
}

impl QueueState {
    fn remove_everywhere(&mut self, key: &ResourceKey) -> bool {
        let before = self.active.len() + self.backoff.len();
        self.active.retain(|info| info.key() != *key);
        self.backoff.retain(|info| info.key() != *key);
        let removed_unschedulable = self.unschedulable.remove(key).is_some();
        removed_unschedulable || before != self.active.len() + self.backoff.len()
    }

    /// In the active or backoff tier
    fn is_pending(&self, key: &ResourceKey) -> bool {
        self.active.iter().any(|info| info.key() == *key)
            || self.backoff.iter().any(|info| info.key() == *key)
    }

    fn is_queued(&self, key: &ResourceKey) -> bool {
        self.is_pending(key) || self.unschedulable.contains_key(key)
    }
}

/// Pending pods in three tiers: active, backing off and unschedulable.
///
/// All tiers live behind one mutex. Consumers park on a `Notify` that is
/// signalled whenever a pod enters the active tier.
pub struct SchedulingQueue {
    config: QueueConfig,
    registered_events: RegisteredEvents,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SchedulingQueue {
    /// Create a queue that requeues pods according to `registered_events`
    pub fn new(config: QueueConfig, registered_events: RegisteredEvents) -> Self {
        Self {
            config,
            registered_events,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a newly submitted pod to the active tier
    pub fn add(&self, pod: Pod) {
        let key = pod.resource_key();
        {
            let mut state = self.state.lock();
            if let Some(existing) = state.active.iter_mut().find(|info| info.key() == key) {
                existing.pod = pod;
                return;
            }
            state.backoff.retain(|info| info.key() != key);
            state.unschedulable.remove(&key);
            state.active.push_back(QueuedPodInfo::new(pod));
        }
        debug!("Pod {} added to active queue", key);
        self.notify.notify_one();
    }

    /// Wait for the next active pod.
    ///
    /// Returns `None` once the queue is closed.
    pub async fn next_pod(&self) -> Option<QueuedPodInfo> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(mut info) = state.active.pop_front() {
                    info.attempts += 1;
                    if info.initial_attempt_timestamp.is_none() {
                        info.initial_attempt_timestamp = Some(Instant::now());
                    }
                    state.in_flight.insert(info.key(), false);
                    return Some(info);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Park a pod that failed an attempt until a relevant cluster change.
    ///
    /// Dropped when the pod was deleted during the attempt or is already
    /// queued again.
    pub fn add_unschedulable(
        &self,
        mut info: QueuedPodInfo,
        unschedulable_plugins: BTreeSet<String>,
    ) {
        let key = info.key();
        let mut state = self.state.lock();

        if state.in_flight.remove(&key) == Some(true) {
            debug!("Pod {} was deleted while being scheduled; dropping it", key);
            return;
        }
        if state.is_pending(&key) {
            debug!("Pod {} is already queued; not marking it unschedulable", key);
            return;
        }

        info.timestamp = Instant::now();
        info.unschedulable_plugins = unschedulable_plugins;
        debug!(
            "Pod {} unschedulable after {} attempt(s), plugins {:?}",
            key, info.attempts, info.unschedulable_plugins
        );
        state.unschedulable.insert(key, info);
    }

    /// Mark the attempt for `key` finished without requeueing it
    pub fn done(&self, key: &ResourceKey) {
        self.state.lock().in_flight.remove(key);
    }

    /// Refresh the stored copy of a pod.
    ///
    /// An unschedulable pod that changed gets another chance right away.
    pub fn update(&self, pod: Pod) {
        let key = pod.resource_key();
        let moved_to_active = {
            let mut state = self.state.lock();
            if let Some(info) = state.active.iter_mut().find(|info| info.key() == key) {
                info.pod = pod;
                return;
            }
            if let Some(info) = state.backoff.iter_mut().find(|info| info.key() == key) {
                info.pod = pod;
                return;
            }
            match state.unschedulable.remove(&key) {
                Some(mut info) => {
                    info.pod = pod;
                    self.route(&mut state, info)
                }
                None => return,
            }
        };
        debug!("Pod {} updated while unschedulable; requeued", key);
        if moved_to_active {
            self.notify.notify_one();
        }
    }

    /// Remove a pod from every tier
    pub fn delete(&self, key: &ResourceKey) {
        let mut state = self.state.lock();
        if let Some(deleted) = state.in_flight.get_mut(key) {
            *deleted = true;
        }
        if state.remove_everywhere(key) {
            debug!("Pod {} removed from the scheduling queue", key);
        }
    }

    /// Move unschedulable pods that `event` may help to the active or backoff tier
    pub fn move_all_to_active_or_backoff(&self, event: &ClusterEvent) {
        let moved_to_active = {
            let mut state = self.state.lock();
            let eligible: Vec<ResourceKey> = state
                .unschedulable
                .iter()
                .filter(|(_, info)| self.is_worth_requeuing(info, event))
                .map(|(key, _)| key.clone())
                .collect();

            let mut moved_to_active = 0;
            for key in &eligible {
                if let Some(info) = state.unschedulable.remove(key) {
                    if self.route(&mut state, info) {
                        moved_to_active += 1;
                    }
                }
            }

            if !eligible.is_empty() {
                debug!(
                    "Event {} moved {} unschedulable pod(s), {} to active",
                    event,
                    eligible.len(),
                    moved_to_active
                );
            }
            moved_to_active
        };

        for _ in 0..moved_to_active {
            self.notify.notify_one();
        }
    }

    /// Move pods whose backoff elapsed to the active tier
    pub fn flush_backoff_completed(&self) {
        let now = Instant::now();
        let moved = {
            let mut state = self.state.lock();
            let (mut ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.backoff)
                .into_iter()
                .partition(|info| self.backoff_expiry(info) <= now);
            state.backoff = waiting;
            ready.sort_by_key(|info| self.backoff_expiry(info));
            let moved = ready.len();
            state.active.extend(ready);
            moved
        };

        if moved > 0 {
            debug!("Moved {} pod(s) from backoff to active", moved);
        }
        for _ in 0..moved {
            self.notify.notify_one();
        }
    }

    /// Retry pods that sat unschedulable for longer than the configured maximum
    pub fn flush_unschedulable_leftover(&self) {
        let now = Instant::now();
        let moved_to_active = {
            let mut state = self.state.lock();
            let stale: Vec<ResourceKey> = state
                .unschedulable
                .iter()
                .filter(|(_, info)| {
                    now.saturating_duration_since(info.timestamp)
                        > self.config.unschedulable_max_duration
                })
                .map(|(key, _)| key.clone())
                .collect();

            if !stale.is_empty() {
                info!(
                    "Retrying {} pod(s) left unschedulable for over {:?}",
                    stale.len(),
                    self.config.unschedulable_max_duration
                );
            }

            let mut moved_to_active = 0;
            for key in &stale {
                if let Some(info) = state.unschedulable.remove(key) {
                    if self.route(&mut state, info) {
                        moved_to_active += 1;
                    }
                }
            }
            moved_to_active
        };

        for _ in 0..moved_to_active {
            self.notify.notify_one();
        }
    }

    /// Run the periodic backoff and leftover flushes until cancelled
    pub async fn run(&self, token: CancellationToken) {
        info!("Starting scheduling queue flushers");

        let mut backoff_tick = tokio::time::interval(self.config.backoff_flush_interval);
        let mut leftover_tick = tokio::time::interval(self.config.unschedulable_flush_interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Scheduling queue flushers shutting down");
                    return;
                }
                _ = backoff_tick.tick() => self.flush_backoff_completed(),
                _ = leftover_tick.tick() => self.flush_unschedulable_leftover(),
            }
        }
    }

    /// Close the queue and wake every consumer
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            active: state.active.len(),
            backoff: state.backoff.len(),
            unschedulable: state.unschedulable.len(),
            in_flight: state.in_flight.len(),
        }
    }

    /// A copy of the pod parked in the unschedulable tier under `key`
    pub fn unschedulable_pod(&self, key: &ResourceKey) -> Option<QueuedPodInfo> {
        self.state.lock().unschedulable.get(key).cloned()
    }

    /// Whether `key` sits in the backoff tier
    pub fn is_backing_off(&self, key: &ResourceKey) -> bool {
        self.state.lock().backoff.iter().any(|info| info.key() == *key)
    }

    /// Whether `key` is in any tier
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state.lock().is_queued(key)
    }

    /// Backoff for a pod's attempt count: doubles per attempt, capped
    pub fn backoff_duration(&self, info: &QueuedPodInfo) -> Duration {
        let mut duration = self.config.initial_backoff;
        for _ in 1..info.attempts {
            duration = duration.saturating_mul(2);
            if duration > self.config.max_backoff {
                return self.config.max_backoff;
            }
        }
        duration.min(self.config.max_backoff)
    }

    fn backoff_expiry(&self, info: &QueuedPodInfo) -> Instant {
        info.timestamp + self.backoff_duration(info)
    }

    fn is_worth_requeuing(&self, info: &QueuedPodInfo, event: &ClusterEvent) -> bool {
        // A wildcard stands for events that were missed, so nothing is filtered
        if info.unschedulable_plugins.is_empty() || event.is_wildcard() {
            return true;
        }

        self.registered_events.iter().any(|(registered, plugins)| {
            registered.matches(event)
                && plugins
                    .iter()
                    .any(|plugin| info.unschedulable_plugins.contains(plugin))
        })
    }

    /// Place a pod leaving the unschedulable tier; true when it went to active
    fn route(&self, state: &mut QueueState, info: QueuedPodInfo) -> bool {
        if self.backoff_expiry(&info) > Instant::now() {
            state.backoff.push(info);
            false
        } else {
            state.active.push_back(info);
            true
        }
    }
}
