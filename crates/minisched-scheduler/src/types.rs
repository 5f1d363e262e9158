use minisched_core::{Pod, Resource, ResourceKey};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome code of a plugin call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    /// The plugin ran and the pod may proceed
    Success,
    /// The plugin itself failed
    Error,
    /// The pod cannot be scheduled here
    Unschedulable,
    /// Permit only: hold the binding until approved
    Wait,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::Success => "Success",
            Code::Error => "Error",
            Code::Unschedulable => "Unschedulable",
            Code::Wait => "Wait",
        };
        f.write_str(s)
    }
}

/// Result of running a plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: Code,
    reasons: Vec<String>,
    failed_plugin: Option<String>,
    timed_out: Option<Duration>,
}

impl Default for Status {
    fn default() -> Self {
        Self::success()
    }
}

impl Status {
    /// Create a status with a code and a reason
    pub fn new(code: Code, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            code,
            reasons: if reason.is_empty() { vec![] } else { vec![reason] },
            failed_plugin: None,
            timed_out: None,
        }
    }

    pub fn success() -> Self {
        Self {
            code: Code::Success,
            reasons: vec![],
            failed_plugin: None,
            timed_out: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::new(Code::Error, reason)
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self::new(Code::Unschedulable, reason)
    }

    pub fn wait(reason: impl Into<String>) -> Self {
        Self::new(Code::Wait, reason)
    }

    /// Rejection issued because `plugin` did not approve within `waited`
    pub fn timed_out(plugin: impl Into<String>, waited: Duration) -> Self {
        let plugin = plugin.into();
        Self {
            code: Code::Unschedulable,
            reasons: vec![format!(
                "rejected due to timeout after waiting {:?} at plugin {}",
                waited, plugin
            )],
            failed_plugin: Some(plugin),
            timed_out: Some(waited),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }

    pub fn is_unschedulable(&self) -> bool {
        self.code == Code::Unschedulable
    }

    pub fn is_wait(&self) -> bool {
        self.code == Code::Wait
    }

    /// All reasons joined into one message
    pub fn message(&self) -> String {
        self.reasons.join(", ")
    }

    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// Plugin this status is attributed to, if any
    pub fn failed_plugin(&self) -> Option<&str> {
        self.failed_plugin.as_deref()
    }

    pub fn set_failed_plugin(&mut self, plugin: impl Into<String>) {
        self.failed_plugin = Some(plugin.into());
    }

    pub fn with_failed_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.set_failed_plugin(plugin);
        self
    }

    /// How long the pod waited when this is a timeout rejection
    pub fn timeout(&self) -> Option<Duration> {
        self.timed_out
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.failed_plugin, self.reasons.is_empty()) {
            (Some(plugin), false) => write!(f, "{} ({}): {}", self.code, plugin, self.message()),
            (Some(plugin), true) => write!(f, "{} ({})", self.code, plugin),
            (None, false) => write!(f, "{}: {}", self.code, self.message()),
            (None, true) => write!(f, "{}", self.code),
        }
    }
}

/// Score given to one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    /// Node name
    pub name: String,
    /// Score; the range is up to the plugin
    pub score: i64,
}

impl NodeScore {
    /// Create a new node score
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Scores in candidate-node order
pub type NodeScoreList = Vec<NodeScore>;

/// Per-plugin score lists, each in candidate-node order
pub type PluginToNodeScores = BTreeMap<String, NodeScoreList>;

/// A pod waiting in the scheduling queue, with its scheduling history
#[derive(Debug, Clone)]
pub struct QueuedPodInfo {
    /// The pod itself
    pub pod: Pod,
    /// When the pod last entered a queue tier
    pub timestamp: Instant,
    /// When the pod was first popped for scheduling
    pub initial_attempt_timestamp: Option<Instant>,
    /// Number of scheduling attempts so far
    pub attempts: u32,
    /// Plugins that rejected the pod in its latest attempt
    pub unschedulable_plugins: BTreeSet<String>,
}

impl QueuedPodInfo {
    /// Wrap a freshly submitted pod
    pub fn new(pod: Pod) -> Self {
        Self {
            pod,
            timestamp: Instant::now(),
            initial_attempt_timestamp: None,
            attempts: 0,
            unschedulable_plugins: BTreeSet::new(),
        }
    }

    /// Queue key of the pod
    pub fn key(&self) -> ResourceKey {
        self.pod.resource_key()
    }

    pub fn pod_name(&self) -> &str {
        self.pod.name()
    }

    pub fn uid(&self) -> Option<&str> {
        self.pod.uid()
    }
}
