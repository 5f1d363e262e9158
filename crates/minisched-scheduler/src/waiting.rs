use crate::types::Status;
use minisched_core::{Pod, Resource};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Key a pod is tracked under in the waiting registry
pub fn waiting_key(pod: &Pod) -> String {
    match pod.uid() {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => pod.resource_key().to_string(),
    }
}

/// Pods whose binding is held until their permit plugins approve
pub struct WaitingPods {
    pods: RwLock<HashMap<String, Arc<WaitingPod>>>,
    registered: Notify,
    max_timeout: Duration,
}

impl WaitingPods {
    /// Create a registry; per-plugin timeouts are clamped to `max_timeout`
    pub fn new(max_timeout: Duration) -> Self {
        Self {
            pods: RwLock::new(HashMap::new()),
            registered: Notify::new(),
            max_timeout,
        }
    }

    /// Park `pod` until every plugin in `plugin_timeouts` allows it.
    ///
    /// One timer per plugin is started; the first to fire rejects the pod.
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        pod: Pod,
        plugin_timeouts: HashMap<String, Duration>,
    ) -> Arc<WaitingPod> {
        let key = waiting_key(&pod);
        let (signal_tx, signal_rx) = oneshot::channel();
        let waiting_pod = Arc::new(WaitingPod {
            pod,
            state: Mutex::new(WaitingPodState {
                pending: HashMap::new(),
                signal_tx: Some(signal_tx),
                final_status: None,
            }),
            signal_rx: Mutex::new(Some(signal_rx)),
        });

        {
            let mut state = waiting_pod.state.lock();
            for (plugin, timeout) in plugin_timeouts {
                let timeout = timeout.min(self.max_timeout);
                let timer = spawn_timer(Arc::downgrade(&waiting_pod), plugin.clone(), timeout);
                state.pending.insert(plugin, timer);
            }
        }

        debug!(
            "Pod {} waiting on plugins {:?}",
            waiting_pod.pod.name(),
            waiting_pod.pending_plugins()
        );

        if let Some(previous) = self.pods.write().insert(key, waiting_pod.clone()) {
            warn!("Replacing waiting record for pod {}", previous.pod.name());
            previous.finish(Status::error("superseded by a newer scheduling attempt"));
        }
        self.registered.notify_waiters();

        waiting_pod
    }

    /// Look up a waiting pod by UID
    pub fn get(&self, uid: &str) -> Option<Arc<WaitingPod>> {
        self.pods.read().get(uid).cloned()
    }

    /// Drop the record for `uid`, stopping its timers
    pub fn remove(&self, uid: &str) -> Option<Arc<WaitingPod>> {
        let removed = self.pods.write().remove(uid);
        if let Some(waiting_pod) = &removed {
            waiting_pod.stop_timers();
        }
        removed
    }

    /// Drop the record for `uid` only if it is still `waiting_pod`.
    ///
    /// A newer record registered under the same UID is left in place.
    pub fn remove_if_same(&self, uid: &str, waiting_pod: &Arc<WaitingPod>) -> bool {
        {
            let mut pods = self.pods.write();
            let same = pods
                .get(uid)
                .is_some_and(|current| Arc::ptr_eq(current, waiting_pod));
            if !same {
                return false;
            }
            pods.remove(uid);
        }
        waiting_pod.stop_timers();
        true
    }

    /// Look up a waiting pod by UID, waiting up to `timeout` for it to be
    /// registered
    pub async fn wait_for(&self, uid: &str, timeout: Duration) -> Option<Arc<WaitingPod>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.registered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(waiting_pod) = self.get(uid) {
                return Some(waiting_pod);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Visit every waiting pod
    pub fn iterate(&self, mut f: impl FnMut(&Arc<WaitingPod>)) {
        for waiting_pod in self.pods.read().values() {
            f(waiting_pod);
        }
    }

    pub fn len(&self) -> usize {
        self.pods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.read().is_empty()
    }

    /// Stop every outstanding timer
    pub fn stop_all(&self) {
        for waiting_pod in self.pods.read().values() {
            waiting_pod.stop_timers();
        }
    }
}

fn spawn_timer(waiting_pod: Weak<WaitingPod>, plugin: String, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if let Some(waiting_pod) = waiting_pod.upgrade() {
            debug!(
                "Permit plugin {} timed out for pod {} after {:?}",
                plugin,
                waiting_pod.pod.name(),
                timeout
            );
            waiting_pod.finish(Status::timed_out(plugin, timeout));
        }
    })
}

struct WaitingPodState {
    pending: HashMap<String, JoinHandle<()>>,
    signal_tx: Option<oneshot::Sender<Status>>,
    final_status: Option<Status>,
}

/// A pod parked in the waiting registry.
///
/// Exactly one final status is delivered: success once every pending plugin
/// allowed, or the first rejection or timeout.
pub struct WaitingPod {
    pod: Pod,
    state: Mutex<WaitingPodState>,
    signal_rx: Mutex<Option<oneshot::Receiver<Status>>>,
}

impl WaitingPod {
    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    /// Plugins that have not allowed the pod yet, sorted
    pub fn pending_plugins(&self) -> Vec<String> {
        let mut plugins: Vec<String> = self.state.lock().pending.keys().cloned().collect();
        plugins.sort();
        plugins
    }

    /// Approve on behalf of `plugin`; delivers success once nothing is pending
    pub fn allow(&self, plugin: &str) {
        let mut state = self.state.lock();
        if let Some(timer) = state.pending.remove(plugin) {
            timer.abort();
        }
        if !state.pending.is_empty() {
            return;
        }
        Self::deliver(&mut state, Status::success());
    }

    /// Reject on behalf of `plugin`, regardless of other pending plugins
    pub fn reject(&self, plugin: &str, message: &str) {
        self.finish(Status::unschedulable(message).with_failed_plugin(plugin));
    }

    /// The status delivered so far, if any
    pub fn final_status(&self) -> Option<Status> {
        self.state.lock().final_status.clone()
    }

    /// Wait for the final status.
    ///
    /// Only the first caller receives it; later calls return an error status.
    pub async fn get_signal(&self) -> Status {
        let receiver = self.signal_rx.lock().take();
        match receiver {
            Some(receiver) => receiver
                .await
                .unwrap_or_else(|_| Status::error("waiting pod signal dropped")),
            None => Status::error("waiting pod signal already consumed"),
        }
    }

    fn finish(&self, status: Status) {
        let mut state = self.state.lock();
        for (_, timer) in state.pending.drain() {
            timer.abort();
        }
        Self::deliver(&mut state, status);
    }

    fn stop_timers(&self) {
        let state = self.state.lock();
        for timer in state.pending.values() {
            timer.abort();
        }
    }

    fn deliver(state: &mut WaitingPodState, status: Status) {
        if let Some(signal_tx) = state.signal_tx.take() {
            state.final_status = Some(status.clone());
            let _ = signal_tx.send(status);
        }
    }
}
