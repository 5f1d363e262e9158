use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cluster resource the scheduler watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    Node,
    PersistentVolume,
    PersistentVolumeClaim,
    Service,
    StorageClass,
    /// Matches every resource kind
    #[serde(rename = "*")]
    Wildcard,
}

impl ResourceKind {
    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(&self) -> bool {
        matches!(
            self,
            ResourceKind::Pod | ResourceKind::PersistentVolumeClaim | ResourceKind::Service
        )
    }

    /// Kind name as used in event labels (e.g. "Node" in "NodeAdd")
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Node => "Node",
            ResourceKind::PersistentVolume => "PersistentVolume",
            ResourceKind::PersistentVolumeClaim => "PersistentVolumeClaim",
            ResourceKind::Service => "Service",
            ResourceKind::StorageClass => "StorageClass",
            ResourceKind::Wildcard => "*",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Kind of the resource
    pub kind: ResourceKind,
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a cluster-scoped ResourceKey
    pub fn cluster_scoped(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// Key of a pod
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Pod, namespace, name)
    }

    /// Key of a node
    pub fn node(name: impl Into<String>) -> Self {
        Self::cluster_scoped(ResourceKind::Node, name)
    }

    /// Check if this is a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.kind, self.name)
        }
    }
}
