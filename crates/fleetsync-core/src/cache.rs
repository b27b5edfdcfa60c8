//! Explicit TTL cache driven by an injected clock
//!
//! Replaces ad hoc module-level caches: entries are (key, value,
//! expires_at) triples, expiry is evaluated against a [`Clock`] so tests
//! control time, and nothing lives in module state.
//!
//! The engine uses one instance to cache the active-router listing across
//! the class passes of a single run; the listing rarely changes within a
//! run and four passes would otherwise re-query it four times.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// Injected time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside tests
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Bounded-lifetime cache of cloneable values
///
/// Interior mutability behind a std `Mutex`; no lock is held across an
/// await point.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    /// Create a cache whose entries live for `ttl_secs` seconds
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
            clock,
        }
    }

    /// Value for `key` if present and not expired.
    ///
    /// An expired entry is evicted on access.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace the value for `key`
    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .lock()
            .unwrap()
            .insert(key, Entry { value, expires_at });
    }

    /// Drop an entry before its expiry
    pub fn invalidate(&self, key: &K) {
        self.entries.lock().unwrap().remove(key);
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
