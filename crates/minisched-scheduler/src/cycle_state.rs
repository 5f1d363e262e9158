use crate::{Result, SchedulerError};
use std::any::Any;
use std::collections::HashMap;

/// Scratch data shared between the stages of one scheduling attempt.
///
/// A fresh `CycleState` is built for every attempt and dropped when the
/// attempt ends, so nothing written here is visible to a later attempt.
#[derive(Default)]
pub struct CycleState {
    storage: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl CycleState {
    /// Create an empty cycle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn write<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.storage.insert(key.into(), Box::new(value));
    }

    /// Read the value under `key`.
    ///
    /// A missing key, or a value of another type, is a `StateNotFound` error.
    pub fn read<T: Any + Send + Sync>(&self, key: &str) -> Result<&T> {
        self.storage
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .ok_or_else(|| SchedulerError::state_not_found(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.storage.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl std::fmt::Debug for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.storage.keys().collect();
        keys.sort();
        f.debug_struct("CycleState").field("keys", &keys).finish()
    }
}
