//! Process-scoped TTL cache
//!
//! Explicit, injected state: the cache is owned by application state and
//! passed where it is needed, never accessed as an ambient singleton. Used
//! for short-TTL user projections during actor resolution and for the
//! fixed-window rate-limit counters.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A small in-memory cache with per-entry expiry.
///
/// Expired entries are dropped on read and opportunistically swept on
/// insert; there is no background eviction task.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Get a live entry, dropping it if expired
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((deadline, value)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert with a fresh TTL, sweeping expired entries as we go
    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.retain(|_, (deadline, _)| *deadline > now);
        entries.insert(key, (now + self.ttl, value));
    }

    /// Update an entry in place, keeping the existing deadline.
    ///
    /// Missing or expired entries are treated as absent and get a fresh
    /// TTL. Returns the stored value. This is what the fixed-window rate
    /// limiter builds on: the window boundary is the entry deadline.
    pub fn update<F: FnOnce(Option<&V>) -> V>(&self, key: K, f: F) -> V {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let current = match entries.get(&key) {
            Some((deadline, value)) if *deadline > now => Some((*deadline, value.clone())),
            _ => None,
        };
        match current {
            Some((deadline, value)) => {
                let next = f(Some(&value));
                entries.insert(key, (deadline, next.clone()));
                next
            }
            None => {
                let next = f(None);
                entries.insert(key, (now + self.ttl, next.clone()));
                next
            }
        }
    }

    /// Drop a single entry (e.g., on logout)
    pub fn remove(&self, key: &K) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.remove(key);
    }
}
