//! Run-scoped key/value store for passing results between jobs.
//!
//! Jobs in one run communicate through [`JobOutputs`] rather than shared
//! mutable references. Values are stored as JSON, so any serde type can be
//! put by one job and read back by a later one. The store is cleared at the
//! start of every run.

use crate::error::JobResult;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared outputs of the jobs of a run.
#[derive(Debug, Clone, Default)]
pub struct JobOutputs {
    values: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl JobOutputs {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put<T: Serialize>(&self, key: impl Into<String>, value: &T) -> JobResult<()> {
        let json = serde_json::to_value(value)?;
        self.values.write().insert(key.into(), json);
        Ok(())
    }

    /// Reads the value under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> JobResult<Option<T>> {
        let values = self.values.read();
        match values.get(key) {
            Some(json) => Ok(Some(T::deserialize(json)?)),
            None => Ok(None),
        }
    }

    /// Removes and returns the value under `key`.
    pub fn take<T: DeserializeOwned>(&self, key: &str) -> JobResult<Option<T>> {
        let removed = self.values.write().remove(key);
        match removed {
            Some(json) => Ok(Some(serde_json::from_value(json)?)),
            None => Ok(None),
        }
    }

    /// Returns true if a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    /// Returns all keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub(crate) fn clear(&self) {
        self.values.write().clear();
    }
}
