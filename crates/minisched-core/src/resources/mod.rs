pub mod quantities;

pub use quantities::ResourceQuantities;

use crate::error::MiniSchedError;
use crate::types::{ResourceKey, ResourceKind};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Namespace assumed for namespaced objects that don't name one
pub const DEFAULT_NAMESPACE: &str = "default";

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    let name = metadata
        .name
        .as_ref()
        .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

    if !is_valid_name(name) {
        return Err(ResourceError::InvalidName(name.clone()));
    }

    if let Some(namespace) = &metadata.namespace {
        if !is_valid_name(namespace) {
            return Err(ResourceError::InvalidNamespace(namespace.clone()));
        }
    }

    Ok(())
}

/// Trait for the cluster objects the scheduler handles
pub trait Resource: Serialize + for<'de> Deserialize<'de> + Clone + Send + Sync {
    /// Kind of this resource
    fn kind(&self) -> ResourceKind;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Name of the resource, empty when unset
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace of the resource, empty for cluster-scoped kinds
    fn namespace(&self) -> &str {
        if self.kind().is_namespaced() {
            self.metadata()
                .namespace
                .as_deref()
                .unwrap_or(DEFAULT_NAMESPACE)
        } else {
            ""
        }
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.namespace(), self.name())
    }

    /// Get the UID
    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }

    /// Set the UID
    fn set_uid(&mut self, uid: String) {
        self.metadata_mut().uid = Some(uid);
    }

    /// Set the resource version
    fn set_resource_version(&mut self, version: String) {
        self.metadata_mut().resource_version = Some(version);
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Resource-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid resource name: {0}")]
    InvalidName(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ResourceError> for MiniSchedError {
    fn from(err: ResourceError) -> Self {
        MiniSchedError::invalid_resource(
            err.to_string(),
            "Names must be lowercase DNS-1123 subdomains and pods need at least one container",
        )
    }
}

/// Validate a Kubernetes resource name (DNS-1123 subdomain)
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    // Must contain only lowercase alphanumeric, '-', or '.'
    // Must start and end with alphanumeric
    let chars: Vec<char> = name.chars().collect();

    if !chars[0].is_ascii_lowercase() && !chars[0].is_ascii_digit() {
        return false;
    }

    if !chars[chars.len() - 1].is_ascii_lowercase() && !chars[chars.len() - 1].is_ascii_digit() {
        return false;
    }

    chars
        .iter()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '.')
}

/// A pod is assigned once its spec names a node
pub fn is_assigned(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| !n.is_empty())
}

impl Resource for Pod {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Pod
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(&self.metadata)?;

        match &self.spec {
            Some(spec) if spec.containers.is_empty() => Err(ResourceError::ValidationFailed(
                "Pod must have at least one container".to_string(),
            )),
            Some(_) => Ok(()),
            None => Err(ResourceError::MissingField("spec".to_string())),
        }
    }
}

impl Resource for Node {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Node
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("nginx"));
        assert!(is_valid_name("my-app"));
        assert!(is_valid_name("node0"));
        assert!(is_valid_name("my.app"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name("MyApp")); // uppercase
        assert!(!is_valid_name("-myapp")); // starts with dash
        assert!(!is_valid_name("myapp-")); // ends with dash
        assert!(!is_valid_name("my_app")); // underscore
    }

    #[test]
    fn test_pod_resource_key_defaults_namespace() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());

        let key = pod.resource_key();
        assert_eq!(key.name, "nginx");
        assert_eq!(key.namespace, "default");
        assert_eq!(key.kind, ResourceKind::Pod);
    }

    #[test]
    fn test_node_resource_key_is_cluster_scoped() {
        let mut node = Node::default();
        node.metadata.name = Some("node1".to_string());
        node.metadata.namespace = Some("ignored".to_string());

        let key = node.resource_key();
        assert_eq!(key.to_string(), "Node/node1");
    }

    #[test]
    fn test_pod_validation() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        assert!(matches!(
            pod.validate(),
            Err(ResourceError::MissingField(_))
        ));

        pod.spec = Some(Default::default());
        assert!(matches!(
            pod.validate(),
            Err(ResourceError::ValidationFailed(_))
        ));

        pod.spec.as_mut().unwrap().containers = vec![Default::default()];
        assert!(pod.validate().is_ok());
    }

    #[test]
    fn test_is_assigned() {
        let mut pod = Pod::default();
        assert!(!is_assigned(&pod));

        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some(String::new());
        assert!(!is_assigned(&pod));

        pod.spec.as_mut().unwrap().node_name = Some("node1".to_string());
        assert!(is_assigned(&pod));
    }
}
