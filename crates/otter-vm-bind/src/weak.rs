//! Weak slots and the self-healing weak cache
//!
//! The cache never keeps a value alive: some other owner holds the strong
//! reference, and every lookup re-checks liveness, dropping entries whose
//! value has died.

use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// A non-owning, nullable reference to a value
pub struct WeakSlot<V> {
    target: Weak<V>,
}

impl<V> WeakSlot<V> {
    /// Create a slot pointing at `value` without keeping it alive
    pub fn new(value: &Arc<V>) -> Self {
        Self {
            target: Arc::downgrade(value),
        }
    }

    /// Create a slot that points at nothing
    pub fn empty() -> Self {
        Self {
            target: Weak::new(),
        }
    }

    /// Get the target, if still alive
    pub fn get(&self) -> Option<Arc<V>> {
        self.target.upgrade()
    }

    /// Check if the target is still alive
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Point the slot at nothing
    pub fn clear(&mut self) {
        self.target = Weak::new();
    }
}

impl<V> Clone for WeakSlot<V> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<V> Default for WeakSlot<V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<V> fmt::Debug for WeakSlot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakSlot")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Keyed cache of weak references.
///
/// `size` may overcount: dead entries are only purged by `put`, by a `get`
/// that finds them, or by an explicit [`purge`](Self::purge).
pub struct WeakCache<K, V> {
    entries: Mutex<FxHashMap<K, WeakSlot<V>>>,
}

impl<K: Eq + Hash, V> WeakCache<K, V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
        }
    }

    /// Insert or overwrite `key`, first dropping every dead entry
    pub fn put(&self, key: K, value: &Arc<V>) {
        let mut entries = self.entries.lock();
        Self::retain_live(&mut entries);
        entries.insert(key, WeakSlot::new(value));
    }

    /// Get the live value for `key`, removing the entry if it has died
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        let value = entries.get(key)?.get();
        if value.is_none() {
            entries.remove(key);
        }
        value
    }

    /// Check if `key` maps to a live value
    pub fn contains_live(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`, returning its value if it was still alive
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().remove(key).and_then(|slot| slot.get())
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of entries, including dead ones not yet purged
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if the cache has no entries
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every dead entry, returning how many were removed
    pub fn purge(&self) -> usize {
        Self::retain_live(&mut self.entries.lock())
    }

    fn retain_live(entries: &mut FxHashMap<K, WeakSlot<V>>) -> usize {
        let before = entries.len();
        entries.retain(|_, slot| slot.is_alive());
        before - entries.len()
    }
}

impl<K: Eq + Hash, V> Default for WeakCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for WeakCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakCache")
            .field("entry_count", &self.entries.lock().len())
            .finish()
    }
}
