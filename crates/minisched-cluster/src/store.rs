use crate::event_bus::{EventBusConfig, ResourceEvent};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use minisched_core::{
    is_assigned, to_object, Binder, MiniSchedError, Node, NodeLister, Pod, Resource, ResourceKey,
    Result,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

type EventCtor = fn(ResourceKey, serde_json::Value, String) -> ResourceEvent;

/// In-memory cluster state: pods, nodes and a watch bus.
///
/// Every successful mutation is published on the broadcast channel after the
/// write lock has been released.
pub struct ClusterStore {
    pods: RwLock<BTreeMap<ResourceKey, Pod>>,
    nodes: RwLock<BTreeMap<ResourceKey, Node>>,
    revision: AtomicU64,
    event_tx: broadcast::Sender<ResourceEvent>,
}

impl Default for ClusterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStore {
    /// Create a new store with default event bus config
    pub fn new() -> Self {
        Self::with_event_bus_config(EventBusConfig::default())
    }

    /// Create a new store with custom event bus config
    pub fn with_event_bus_config(config: EventBusConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.capacity);
        Self {
            pods: RwLock::new(BTreeMap::new()),
            nodes: RwLock::new(BTreeMap::new()),
            revision: AtomicU64::new(0),
            event_tx,
        }
    }

    /// Subscribe to resource events
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.event_tx.subscribe()
    }

    /// Create a pod; assigns a UID and creation timestamp
    pub fn create_pod(&self, pod: Pod) -> Result<Pod> {
        self.create(&self.pods, pod)
    }

    /// Create a node
    pub fn create_node(&self, node: Node) -> Result<Node> {
        self.create(&self.nodes, node)
    }

    /// Replace an existing node
    pub fn update_node(&self, node: Node) -> Result<Node> {
        self.update(&self.nodes, node)
    }

    /// Replace an existing pod
    pub fn update_pod(&self, pod: Pod) -> Result<Pod> {
        self.update(&self.pods, pod)
    }

    /// Delete a pod by key
    pub fn delete_pod(&self, key: &ResourceKey) -> Result<Pod> {
        self.delete(&self.pods, key)
    }

    /// Delete a node by name
    pub fn delete_node(&self, name: &str) -> Result<Node> {
        self.delete(&self.nodes, &ResourceKey::node(name))
    }

    /// Get a pod by key
    pub fn get_pod(&self, key: &ResourceKey) -> Result<Pod> {
        self.pods
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MiniSchedError::resource_not_found(key.to_string()))
    }

    /// Get a node by name
    pub fn get_node(&self, name: &str) -> Result<Node> {
        let key = ResourceKey::node(name);
        self.nodes
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| MiniSchedError::resource_not_found(key.to_string()))
    }

    /// All pods, ordered by key
    pub fn list_pods(&self) -> Vec<Pod> {
        self.pods.read().values().cloned().collect()
    }

    /// All nodes, ordered by name
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Publish a mutation (best-effort: no subscribers is not an error)
    fn publish<T: Resource>(&self, make: EventCtor, resource: &T) {
        let Some(version) = resource.metadata().resource_version.clone() else {
            return;
        };
        if let Ok(object) = to_object(resource) {
            let _ = self.event_tx.send(make(resource.resource_key(), object, version));
        }
    }

    fn create<T: Resource>(
        &self,
        map: &RwLock<BTreeMap<ResourceKey, T>>,
        mut resource: T,
    ) -> Result<T> {
        resource.validate()?;
        let key = resource.resource_key();

        {
            let mut guard = map.write();
            if guard.contains_key(&key) {
                return Err(MiniSchedError::resource_already_exists(key.to_string()));
            }

            if resource.kind().is_namespaced() && resource.metadata().namespace.is_none() {
                resource.metadata_mut().namespace = Some(key.namespace.clone());
            }
            resource.set_uid(Uuid::new_v4().to_string());
            resource.metadata_mut().creation_timestamp = Some(Time(Utc::now()));
            resource.set_resource_version(self.next_revision());
            guard.insert(key.clone(), resource.clone());
        }

        info!("Created resource: {}", key);
        self.publish(ResourceEvent::added, &resource);

        Ok(resource)
    }

    fn update<T: Resource>(
        &self,
        map: &RwLock<BTreeMap<ResourceKey, T>>,
        mut resource: T,
    ) -> Result<T> {
        resource.validate()?;
        let key = resource.resource_key();

        {
            let mut guard = map.write();
            let existing = guard
                .get(&key)
                .ok_or_else(|| MiniSchedError::resource_not_found(key.to_string()))?;

            // Identity survives updates
            let uid = existing.uid().map(str::to_string);
            let created = existing.metadata().creation_timestamp.clone();
            if let Some(uid) = uid {
                resource.set_uid(uid);
            }
            resource.metadata_mut().creation_timestamp = created;
            resource.set_resource_version(self.next_revision());
            guard.insert(key.clone(), resource.clone());
        }

        debug!("Updated resource: {}", key);
        self.publish(ResourceEvent::modified, &resource);

        Ok(resource)
    }

    fn delete<T: Resource>(
        &self,
        map: &RwLock<BTreeMap<ResourceKey, T>>,
        key: &ResourceKey,
    ) -> Result<T> {
        let mut removed = map
            .write()
            .remove(key)
            .ok_or_else(|| MiniSchedError::resource_not_found(key.to_string()))?;

        removed.set_resource_version(self.next_revision());
        info!("Deleted resource: {}", key);
        self.publish(ResourceEvent::deleted, &removed);

        Ok(removed)
    }
}

#[async_trait]
impl NodeLister for ClusterStore {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes())
    }
}

#[async_trait]
impl Binder for ClusterStore {
    async fn bind(&self, pod: &Pod, node_name: &str) -> Result<()> {
        let key = pod.resource_key();

        let bound = {
            let mut pods = self.pods.write();
            let stored = pods
                .get_mut(&key)
                .ok_or_else(|| MiniSchedError::resource_not_found(key.to_string()))?;

            // A pod recreated under the same name is a different pod
            if pod.uid().is_some() && stored.uid() != pod.uid() {
                return Err(MiniSchedError::resource_not_found(format!(
                    "{} (uid {})",
                    key,
                    pod.uid().unwrap_or_default()
                )));
            }

            if is_assigned(stored) {
                return Err(MiniSchedError::invalid_resource(
                    format!("pod {} is already bound", key),
                    "Bindings are only accepted for unassigned pods",
                ));
            }

            if !self.nodes.read().contains_key(&ResourceKey::node(node_name)) {
                return Err(MiniSchedError::resource_not_found(
                    ResourceKey::node(node_name).to_string(),
                ));
            }

            stored.spec.get_or_insert_with(Default::default).node_name =
                Some(node_name.to_string());
            stored.set_resource_version(self.next_revision());
            stored.clone()
        };

        info!("Bound pod {} to node {}", key, node_name);
        self.publish(ResourceEvent::modified, &bound);

        Ok(())
    }
}
