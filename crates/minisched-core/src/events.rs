use crate::types::{ResourceKey, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitmask over the kinds of change a resource can go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(u8);

impl ActionType {
    pub const NONE: ActionType = ActionType(0);
    pub const ADD: ActionType = ActionType(1);
    pub const UPDATE: ActionType = ActionType(1 << 1);
    pub const DELETE: ActionType = ActionType(1 << 2);
    pub const ALL: ActionType = ActionType(0b111);

    /// Raw bit representation
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in `self`
    pub fn contains(&self, other: ActionType) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when `self` and `other` share at least one bit
    pub fn intersects(&self, other: ActionType) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ActionType {
    type Output = ActionType;

    fn bitor(self, rhs: ActionType) -> ActionType {
        ActionType(self.0 | rhs.0)
    }
}

impl BitOrAssign for ActionType {
    fn bitor_assign(&mut self, rhs: ActionType) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ActionType {
    type Output = ActionType;

    fn bitand(self, rhs: ActionType) -> ActionType {
        ActionType(self.0 & rhs.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == ActionType::ALL {
            return f.write_str("All");
        }
        let names: Vec<&str> = [
            (ActionType::ADD, "Add"),
            (ActionType::UPDATE, "Update"),
            (ActionType::DELETE, "Delete"),
        ]
        .iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, name)| *name)
        .collect();

        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// A (resource kind, action) pair describing a change in the cluster.
///
/// Policies register the events that may make a previously rejected pod
/// schedulable; the queue matches incoming events against those registrations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub resource: ResourceKind,
    pub action_type: ActionType,
    /// Human-readable label, e.g. "NodeAdd"
    pub label: String,
}

impl ClusterEvent {
    /// Create an event labelled after its kind and action
    pub fn new(resource: ResourceKind, action_type: ActionType) -> Self {
        Self {
            resource,
            action_type,
            label: format!("{}{}", resource, action_type),
        }
    }

    /// The event matching any resource and any action
    pub fn wildcard() -> Self {
        Self {
            resource: ResourceKind::Wildcard,
            action_type: ActionType::ALL,
            label: "WildCardEvent".to_string(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.resource == ResourceKind::Wildcard && self.action_type == ActionType::ALL
    }

    /// Whether `incoming` is covered by this (registered) event.
    ///
    /// Kinds match when equal or when either side is the wildcard kind;
    /// actions match when the bitmasks intersect.
    pub fn matches(&self, incoming: &ClusterEvent) -> bool {
        if self.is_wildcard() || incoming.is_wildcard() {
            return true;
        }
        let resource_matches = self.resource == ResourceKind::Wildcard
            || incoming.resource == ResourceKind::Wildcard
            || self.resource == incoming.resource;
        resource_matches && self.action_type.intersects(incoming.action_type)
    }
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

impl WatchEventType {
    /// The action bit this watch event corresponds to
    pub fn action_type(&self) -> ActionType {
        match self {
            WatchEventType::Added => ActionType::ADD,
            WatchEventType::Modified => ActionType::UPDATE,
            WatchEventType::Deleted => ActionType::DELETE,
        }
    }
}

/// A resource event emitted by the cluster store on mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// Full resource key (kind + namespace + name)
    pub key: ResourceKey,
    /// The serialized resource object
    pub object: serde_json::Value,
    /// Resource version at the time of the event
    pub resource_version: String,
}

impl ResourceEvent {
    /// Create an ADDED event
    pub fn added(key: ResourceKey, object: serde_json::Value, resource_version: String) -> Self {
        Self {
            event_type: WatchEventType::Added,
            key,
            object,
            resource_version,
        }
    }

    /// Create a MODIFIED event
    pub fn modified(key: ResourceKey, object: serde_json::Value, resource_version: String) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            key,
            object,
            resource_version,
        }
    }

    /// Create a DELETED event
    pub fn deleted(key: ResourceKey, object: serde_json::Value, resource_version: String) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            key,
            object,
            resource_version,
        }
    }

    /// The cluster change this watch event represents
    pub fn cluster_event(&self) -> ClusterEvent {
        ClusterEvent::new(self.key.kind, self.event_type.action_type())
    }
}
