//! Minisched Core - Shared types for the minisched workload scheduler
//!
//! This crate provides:
//! - Pod and Node resource abstractions (k8s-openapi)
//! - Cluster change events and action bitmasks
//! - Error types with miette diagnostics
//! - The node-listing and binding collaborator traits

pub mod client;
pub mod error;
pub mod events;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use client::{Binder, NodeLister};
pub use error::{MiniSchedError, Result};
pub use events::{ActionType, ClusterEvent, ResourceEvent, WatchEventType};
pub use resources::{is_assigned, is_valid_name, Resource, ResourceQuantities};
pub use types::{ResourceKey, ResourceKind};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::{Node, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Convert a resource into the JSON object carried by watch events
pub fn to_object<T: serde::Serialize>(resource: &T) -> Result<serde_json::Value> {
    serde_json::to_value(resource).map_err(|e| {
        MiniSchedError::serialization_error(
            format!("Failed to serialize resource: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Decode a resource from the JSON object carried by a watch event
pub fn from_object<T: for<'de> serde::Deserialize<'de>>(object: serde_json::Value) -> Result<T> {
    serde_json::from_value(object).map_err(|e| {
        MiniSchedError::serialization_error(
            format!("Failed to deserialize resource: {}", e),
            Some(Box::new(e)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_roundtrip_keeps_assignment() {
        let mut pod = Pod::default();
        pod.metadata.name = Some("nginx".to_string());
        pod.spec = Some(Default::default());
        pod.spec.as_mut().unwrap().node_name = Some("node3".to_string());

        let object = to_object(&pod).unwrap();
        assert_eq!(object["spec"]["nodeName"], "node3");

        let decoded: Pod = from_object(object).unwrap();
        assert_eq!(decoded.metadata.name, Some("nginx".to_string()));
        assert!(is_assigned(&decoded));
    }

    #[test]
    fn test_from_object_rejects_garbage() {
        let result: Result<Pod> = from_object(serde_json::json!({"spec": 42}));
        assert!(matches!(
            result,
            Err(MiniSchedError::SerializationError { .. })
        ));
    }
}
