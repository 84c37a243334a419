//! Lazily prepared per-template resources, keyed by template reference key.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::CoreResult;

/// Cache of values built once per template reference key.
///
/// Lookups take a read lock; only the first preparation for a key takes
/// the write lock.
#[derive(Debug)]
pub struct ResourceCache<V> {
    entries: RwLock<HashMap<u32, V>>,
}

impl<V> Default for ResourceCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ResourceCache<V> {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`, if prepared.
    #[must_use]
    pub fn get(&self, key: u32) -> Option<V> {
        self.entries.read().get(&key).cloned()
    }

    /// Returns the value for `key`, preparing it with `init` on first use.
    ///
    /// A failed preparation caches nothing, so the next call tries again.
    pub fn get_or_try_init<F>(&self, key: u32, init: F) -> CoreResult<V>
    where
        F: FnOnce() -> CoreResult<V>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let mut entries = self.entries.write();
        if let Some(value) = entries.get(&key) {
            return Ok(value.clone());
        }
        let value = init()?;
        entries.insert(key, value.clone());
        Ok(value)
    }

    /// Number of prepared entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops every prepared value.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
