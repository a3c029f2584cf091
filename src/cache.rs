//! C8 — Shared in-memory cache (spec.md §4.8).
//!
//! Same `dashmap` lineage as the rate limiter (§1.9): a short-TTL map for
//! read-heavy public endpoints (round history, single round detail).
//! Admin-authenticated requests bypass the cache by convention at the
//! (out-of-scope) router layer, not here.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone());

        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Periodic sweep, meant to run on a timer alongside the lazy
    /// expire-on-read path.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_value_until_ttl_expires() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        cache.set("k".into(), 42, Duration::from_millis(30));
        assert_eq!(cache.get(&"k".to_string()), Some(42));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&"k".to_string()), None);
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let cache: TtlCache<String, u32> = TtlCache::new();
        cache.set("k".into(), 1, Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        cache.sweep();
        assert_eq!(cache.entries.len(), 0);
    }
}
