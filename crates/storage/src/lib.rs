//! Pluggable persistence for the coordinator core.
//!
//! The coordinator does not depend on any single persistence engine: every
//! durable entity goes through a [`RecordStore`] keyed by its primary id.
//! Embedded SQL engines, files, or remote stores implement the same trait;
//! [`MemoryStore`] is the in-process default and the test double.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A durable key-indexed repository for one entity type.
///
/// Implementations must be safe for concurrent use; the coordinator calls
/// them from many request tasks at once.
pub trait RecordStore<T: Clone + Send + Sync>: Send + Sync {
    fn put(&self, id: &str, value: T);
    fn get(&self, id: &str) -> Option<T>;
    fn delete(&self, id: &str) -> bool;
    /// All records in ascending id order.
    fn list(&self) -> Vec<T>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`RecordStore`] backed by an ordered map.
pub struct MemoryStore<T> {
    records: RwLock<BTreeMap<String, T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> RecordStore<T> for MemoryStore<T> {
    fn put(&self, id: &str, value: T) {
        self.records.write().insert(id.to_string(), value);
    }

    fn get(&self, id: &str) -> Option<T> {
        self.records.read().get(id).cloned()
    }

    fn delete(&self, id: &str) -> bool {
        self.records.write().remove(id).is_some()
    }

    fn list(&self) -> Vec<T> {
        self.records.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }
}
