use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
}

impl<V> CachedEntry<V> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

#[derive(Debug)]
pub struct TtlCache<K: Eq + Hash, V> {
    entries: DashMap<K, CachedEntry<V>>,
    ttl: Duration,
    max_entries: usize,
    last_sweep: Mutex<Instant>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        if !self.is_enabled() {
            return None;
        }
        let fresh = self
            .entries
            .get(key)
            .and_then(|entry| (!entry.is_expired(self.ttl)).then(|| entry.value.clone()));
        if fresh.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.is_expired(self.ttl));
        }
        fresh
    }

    pub fn insert(&self, key: K, value: V) {
        if !self.is_enabled() {
            return;
        }
        self.sweep_if_due();
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict_expired();
            if self.entries.len() >= self.max_entries {
                self.evict_oldest();
            }
        }
        self.entries.insert(
            key,
            CachedEntry {
                value,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    fn evict_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // At most one full sweep per TTL period.
    fn sweep_if_due(&self) {
        let mut last_sweep = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
        if last_sweep.elapsed() < self.ttl {
            return;
        }
        *last_sweep = Instant::now();
        drop(last_sweep);
        self.evict_expired();
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().cached_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}
