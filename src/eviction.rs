//! L1 Store (§4.1): a bounded, concurrency-safe `L1Key -> CacheEntry` map with three pluggable
//! eviction policies, dispatched by an explicit match rather than inheritance (SPEC_FULL.md §9).
//!
//! Mirrors the teacher's `GlobalCache`: an order-tracking structure guarded by the same lock as
//! the map, so eviction runs atomically with insertion (§5).

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::entry::{now_unix_seconds, CacheEntry};
use crate::hash::L1Key;

/// Eviction policy selected at L1 construction time (§4.1, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the entry least recently accessed.
    Recency,
    /// Evict the entry with the lowest access count; ties broken by recency.
    Frequency,
    /// Entries older than `ttl_seconds` are evicted lazily on access and eagerly on scan.
    Age,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct L1Stats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

struct Inner {
    map: HashMap<L1Key, CacheEntry>,
    /// Insertion/access order, used by Recency (move-to-back on access) and as an insertion
    /// order fallback for Age. Frequency does not need this but keeps it in sync for `clear`.
    order: VecDeque<L1Key>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn move_to_back(&mut self, key: &L1Key) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(*key);
        }
    }

    fn remove_key(&mut self, key: &L1Key) -> Option<CacheEntry> {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.map.remove(key)
    }

    fn evict_one(&mut self, policy: EvictionPolicy, ttl_seconds: u64) {
        let victim = match policy {
            EvictionPolicy::Recency => self.order.front().copied(),
            EvictionPolicy::Frequency => self
                .map
                .iter()
                .min_by_key(|(_, e)| (e.access_count, e.last_access_at))
                .map(|(k, _)| *k),
            EvictionPolicy::Age => {
                let now = now_unix_seconds();
                self.map
                    .iter()
                    .max_by_key(|(_, e)| e.age_seconds(now))
                    .filter(|(_, e)| e.age_seconds(now) >= ttl_seconds)
                    .map(|(k, _)| *k)
                    .or_else(|| self.order.front().copied())
            }
        };
        if let Some(key) = victim {
            self.remove_key(&key);
            self.evictions += 1;
        }
    }

    fn evict_expired_for_age_policy(&mut self, ttl_seconds: u64) {
        let now = now_unix_seconds();
        let expired: Vec<L1Key> = self
            .map
            .iter()
            .filter(|(_, e)| e.age_seconds(now) > ttl_seconds)
            .map(|(k, _)| *k)
            .collect();
        for key in expired {
            self.remove_key(&key);
            self.evictions += 1;
        }
    }
}

/// Bounded in-process cache. All operations acquire a single `RwLock`-guarded inner state so
/// eviction stays atomic with insertion (§5 "L1 Store").
pub struct L1Store {
    inner: RwLock<Inner>,
    max_size: usize,
    ttl_seconds: u64,
    policy: EvictionPolicy,
}

impl L1Store {
    pub fn new(max_size: usize, ttl_seconds: u64, policy: EvictionPolicy) -> Self {
        Self {
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            max_size,
            ttl_seconds,
            policy,
        }
    }

    /// Looks up `key`, bumping access bookkeeping on hit and lazily evicting on Age-policy
    /// expiry (§4.1).
    pub fn get(&self, key: &L1Key) -> Option<CacheEntry> {
        let mut inner = self.inner.write();
        if self.policy == EvictionPolicy::Age {
            if let Some(entry) = inner.map.get(key) {
                let now = now_unix_seconds();
                if entry.age_seconds(now) > self.ttl_seconds {
                    inner.remove_key(key);
                    inner.evictions += 1;
                    inner.misses += 1;
                    return None;
                }
            }
        }
        if inner.map.contains_key(key) {
            let now = now_unix_seconds();
            if let Some(entry) = inner.map.get_mut(key) {
                entry.mark_accessed(now);
            }
            if self.policy == EvictionPolicy::Recency {
                inner.move_to_back(key);
            }
            inner.hits += 1;
            inner.map.get(key).cloned()
        } else {
            inner.misses += 1;
            None
        }
    }

    /// Inserts or overwrites `key`, evicting exactly one entry per the configured policy if the
    /// store is at capacity and `key` is new (§4.1).
    pub fn put(&self, key: L1Key, entry: CacheEntry) {
        let mut inner = self.inner.write();
        let is_new = !inner.map.contains_key(&key);
        if is_new && inner.map.len() >= self.max_size && self.max_size > 0 {
            inner.evict_one(self.policy, self.ttl_seconds);
        }
        if is_new {
            inner.order.push_back(key);
        } else if self.policy == EvictionPolicy::Recency {
            inner.move_to_back(&key);
        }
        inner.map.insert(key, entry);
        if self.policy == EvictionPolicy::Age {
            inner.evict_expired_for_age_policy(self.ttl_seconds);
        }
    }

    pub fn delete(&self, key: &L1Key) -> bool {
        let mut inner = self.inner.write();
        inner.remove_key(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> L1Stats {
        let inner = self.inner.read();
        L1Stats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            len: inner.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> CacheEntry {
        CacheEntry::new(
            id.to_string(),
            "prompt".to_string(),
            "response".to_string(),
            None,
            None,
            vec![],
            serde_json::Value::Null,
            3600,
            "v1".to_string(),
        )
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = L1Store::new(10, 300, EvictionPolicy::Recency);
        let key = L1Key(1);
        store.put(key, entry("a"));
        let got = store.get(&key).unwrap();
        assert_eq!(got.entry_id, "a");
    }

    #[test]
    fn missing_key_is_a_miss() {
        let store = L1Store::new(10, 300, EvictionPolicy::Recency);
        assert!(store.get(&L1Key(42)).is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn recency_evicts_least_recently_accessed() {
        let store = L1Store::new(2, 300, EvictionPolicy::Recency);
        let (a, b, c) = (L1Key(1), L1Key(2), L1Key(3));
        store.put(a, entry("a"));
        store.put(b, entry("b"));
        // access `a` so `b` becomes the least-recently-used entry
        store.get(&a);
        store.put(c, entry("c"));
        assert!(store.get(&b).is_none(), "b should have been evicted");
        assert!(store.get(&a).is_some());
        assert!(store.get(&c).is_some());
    }

    #[test]
    fn recency_eviction_scenario_from_spec_table() {
        // Scenario #3: max_size=2, recency; store A, B, C in order; check(A) misses.
        let store = L1Store::new(2, 300, EvictionPolicy::Recency);
        let (a, b, c) = (L1Key(1), L1Key(2), L1Key(3));
        store.put(a, entry("a"));
        store.put(b, entry("b"));
        store.put(c, entry("c"));
        assert!(store.get(&a).is_none());
    }

    #[test]
    fn frequency_evicts_lowest_access_count() {
        let store = L1Store::new(2, 300, EvictionPolicy::Frequency);
        let (a, b, c) = (L1Key(1), L1Key(2), L1Key(3));
        store.put(a, entry("a"));
        store.put(b, entry("b"));
        // access `a` twice, `b` zero times
        store.get(&a);
        store.get(&a);
        store.put(c, entry("c"));
        assert!(store.get(&b).is_none(), "b has fewest accesses, should be evicted");
        assert!(store.get(&a).is_some());
    }

    #[test]
    fn age_policy_lazily_evicts_on_access() {
        let store = L1Store::new(10, 0, EvictionPolicy::Age);
        let key = L1Key(1);
        store.put(key, entry("a"));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn clear_empties_the_store() {
        let store = L1Store::new(10, 300, EvictionPolicy::Recency);
        store.put(L1Key(1), entry("a"));
        store.clear();
        assert_eq!(store.stats().len, 0);
    }

    #[test]
    fn delete_removes_entry() {
        let store = L1Store::new(10, 300, EvictionPolicy::Recency);
        let key = L1Key(1);
        store.put(key, entry("a"));
        assert!(store.delete(&key));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn concurrent_access_is_safe() {
        use std::sync::Arc;
        let store = Arc::new(L1Store::new(1000, 300, EvictionPolicy::Recency));
        let mut handles = vec![];
        for i in 0..10u128 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for j in 0..50u128 {
                    let key = L1Key(i * 1000 + j);
                    store.put(key, entry("x"));
                    store.get(&key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.stats().len, 500);
    }
}
