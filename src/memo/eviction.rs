use std::collections::BTreeMap;
use std::hash::Hash;

use ahash::AHashMap;

/// Eviction policy for a memo store.
///
/// The policy only ever sees keys whose value has been stored; in-flight
/// computations are invisible to it.
pub trait EvictionPolicy<K>: Send {
    /// Decide which key to drop so one more entry fits, if any must go.
    fn evict(&mut self) -> Option<K>;

    /// Called when a stored value is served again.
    fn on_access(&mut self, key: &K);

    /// Called when a value is stored under `key`.
    fn on_add(&mut self, key: &K);

    /// Called when a stored key is removed for any reason other than `evict`.
    fn on_remove(&mut self, key: &K);

    /// Forget every tracked key.
    fn reset(&mut self);

    /// Whether a freshly computed value may be stored at all.
    fn admits(&self) -> bool {
        true
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}

/// Never evicts; the store grows without bound.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl<K> EvictionPolicy<K> for Unbounded {
    fn evict(&mut self) -> Option<K> {
        None
    }

    fn on_access(&mut self, _key: &K) {}

    fn on_add(&mut self, _key: &K) {}

    fn on_remove(&mut self, _key: &K) {}

    fn reset(&mut self) {}
}

/// LRU (Least Recently Used) eviction policy with a fixed entry capacity.
///
/// Recency is a monotonically increasing tick; `order` maps ticks back to
/// keys so the oldest entry is always the first one in the tree.
#[derive(Debug)]
pub struct LruEvictionPolicy<K> {
    capacity: usize,
    tick: u64,
    recency: AHashMap<K, u64>,
    order: BTreeMap<u64, K>,
}

impl<K: Hash + Eq + Clone> LruEvictionPolicy<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            recency: AHashMap::new(),
            order: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recency.is_empty()
    }

    fn touch(&mut self, key: &K) {
        self.tick += 1;
        if let Some(previous) = self.recency.insert(key.clone(), self.tick) {
            self.order.remove(&previous);
        }
        self.order.insert(self.tick, key.clone());
    }
}

impl<K: Hash + Eq + Clone + Send> EvictionPolicy<K> for LruEvictionPolicy<K> {
    fn evict(&mut self) -> Option<K> {
        if self.capacity == 0 || self.recency.len() < self.capacity {
            return None;
        }
        let (_, key) = self.order.pop_first()?;
        self.recency.remove(&key);
        Some(key)
    }

    fn on_access(&mut self, key: &K) {
        if self.recency.contains_key(key) {
            self.touch(key);
        }
    }

    fn on_add(&mut self, key: &K) {
        self.touch(key);
    }

    fn on_remove(&mut self, key: &K) {
        if let Some(tick) = self.recency.remove(key) {
            self.order.remove(&tick);
        }
    }

    fn reset(&mut self) {
        self.recency.clear();
        self.order.clear();
    }

    fn admits(&self) -> bool {
        self.capacity > 0
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_nothing_below_capacity() {
        let mut policy = LruEvictionPolicy::new(2);
        policy.on_add(&"a");
        assert_eq!(policy.evict(), None);
    }

    #[test]
    fn access_refreshes_recency() {
        let mut policy = LruEvictionPolicy::new(2);
        policy.on_add(&"a");
        policy.on_add(&"b");
        policy.on_access(&"a");
        assert_eq!(policy.evict(), Some("b"));
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn removed_keys_are_not_evicted() {
        let mut policy = LruEvictionPolicy::new(2);
        policy.on_add(&"a");
        policy.on_add(&"b");
        policy.on_remove(&"a");
        assert_eq!(policy.evict(), None);
        policy.on_add(&"c");
        assert_eq!(policy.evict(), Some("b"));
    }

    #[test]
    fn zero_capacity_refuses_admission() {
        let policy = LruEvictionPolicy::<u32>::new(0);
        assert!(!policy.admits());
        assert!(EvictionPolicy::<u32>::admits(&Unbounded));
    }
}
