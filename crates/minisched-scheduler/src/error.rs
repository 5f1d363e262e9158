// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use minisched_core::MiniSchedError;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// No node survived filtering
    #[error("0/{num_nodes} nodes are available for pod {pod_name}: {reasons}")]
    #[diagnostic(
        code(scheduler::fit_error),
        help("The pod is retried when a change relevant to the rejecting plugins happens")
    )]
    FitError {
        pod_name: String,
        num_nodes: usize,
        unschedulable_plugins: BTreeSet<String>,
        reasons: String,
    },

    /// A plugin returned a non-success status
    #[error("Plugin {plugin} failed: {message}")]
    #[diagnostic(
        code(scheduler::plugin_failure),
        help("Check the plugin's inputs; the whole scheduling attempt was aborted")
    )]
    PluginFailure { plugin: String, message: String },

    /// A permit plugin rejected the pod
    #[error("Pod rejected by permit plugin {plugin}: {message}")]
    #[diagnostic(code(scheduler::permit_rejected))]
    PermitRejected { plugin: String, message: String },

    /// A permit plugin did not approve the pod in time
    #[error("Pod rejected due to timeout after waiting {waited:?} at plugin {plugin}")]
    #[diagnostic(
        code(scheduler::permit_timeout),
        help("The approving plugin never allowed the pod; it will be retried")
    )]
    PermitTimeout { plugin: String, waited: Duration },

    /// Listing nodes failed
    #[error("Failed to list nodes: {source}")]
    #[diagnostic(
        code(scheduler::node_listing),
        help("Check connectivity to the cluster state store")
    )]
    NodeListing {
        #[source]
        source: MiniSchedError,
    },

    /// Binding the pod failed
    #[error("Failed to bind pod {pod_name} to node {node_name}: {source}")]
    #[diagnostic(
        code(scheduler::bind_failed),
        help("The pod is returned to the queue and retried on the next cluster event")
    )]
    BindFailed {
        pod_name: String,
        node_name: String,
        #[source]
        source: MiniSchedError,
    },

    /// Cycle state has no entry for the key
    #[error("Cycle state has no entry for key {key}")]
    #[diagnostic(
        code(scheduler::state_not_found),
        help("A Score plugin read data that its PreScore stage did not write")
    )]
    StateNotFound { key: String },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(code(scheduler::core_error), help("This is an internal error"))]
    CoreError(#[from] MiniSchedError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a PluginFailure error
    pub fn plugin_failure(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginFailure {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a PermitRejected error
    pub fn permit_rejected(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PermitRejected {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// Create a StateNotFound error
    pub fn state_not_found(key: impl Into<String>) -> Self {
        Self::StateNotFound { key: key.into() }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Plugins blamed for this failure.
    ///
    /// Empty when the failure has no plugin attribution (infrastructure and
    /// internal errors); the queue retries such pods on any cluster event.
    pub fn unschedulable_plugins(&self) -> BTreeSet<String> {
        match self {
            Self::FitError {
                unschedulable_plugins,
                ..
            } => unschedulable_plugins.clone(),
            Self::PluginFailure { plugin, .. }
            | Self::PermitRejected { plugin, .. }
            | Self::PermitTimeout { plugin, .. } => BTreeSet::from([plugin.clone()]),
            _ => BTreeSet::new(),
        }
    }

    /// Whether the pod simply did not fit, as opposed to something breaking
    pub fn is_unschedulable(&self) -> bool {
        matches!(
            self,
            Self::FitError { .. } | Self::PermitRejected { .. } | Self::PermitTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_error_attribution() {
        let err = SchedulerError::FitError {
            pod_name: "pod1".to_string(),
            num_nodes: 3,
            unschedulable_plugins: BTreeSet::from(["NodeUnschedulable".to_string()]),
            reasons: "3 node(s) were unschedulable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "0/3 nodes are available for pod pod1: 3 node(s) were unschedulable"
        );
        assert!(err.is_unschedulable());
        assert!(err.unschedulable_plugins().contains("NodeUnschedulable"));
    }

    #[test]
    fn test_plugin_errors_attribute_plugin() {
        let err = SchedulerError::plugin_failure("NodeNumber", "boom");
        assert_eq!(
            err.unschedulable_plugins(),
            BTreeSet::from(["NodeNumber".to_string()])
        );
        assert!(!err.is_unschedulable());

        let err = SchedulerError::PermitTimeout {
            plugin: "NodeNumber".to_string(),
            waited: Duration::from_secs(10),
        };
        assert!(err.is_unschedulable());
        assert_eq!(err.unschedulable_plugins().len(), 1);
    }

    #[test]
    fn test_infrastructure_errors_have_no_attribution() {
        let err = SchedulerError::BindFailed {
            pod_name: "pod1".to_string(),
            node_name: "node1".to_string(),
            source: MiniSchedError::internal_error("storage offline"),
        };
        assert!(err.unschedulable_plugins().is_empty());

        let err = SchedulerError::NodeListing {
            source: MiniSchedError::internal_error("timeout"),
        };
        assert!(err.unschedulable_plugins().is_empty());
    }
}
