use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;
use tracing::debug;

use super::eviction::{EvictionPolicy, LruEvictionPolicy, Unbounded};

/// A write-once cell holding one key's value.
///
/// Sync and async memoizers use different cells; the store only needs to
/// create empty ones and peek at filled ones.
pub(crate) trait Slot<R>: Send + Sync {
    fn empty() -> Self;

    fn value(&self) -> Option<&Arc<R>>;
}

impl<R: Send + Sync> Slot<R> for once_cell::sync::OnceCell<Arc<R>> {
    fn empty() -> Self {
        Self::new()
    }

    fn value(&self) -> Option<&Arc<R>> {
        self.get()
    }
}

impl<R: Send + Sync> Slot<R> for tokio::sync::OnceCell<Arc<R>> {
    fn empty() -> Self {
        Self::new()
    }

    fn value(&self) -> Option<&Arc<R>> {
        self.get()
    }
}

pub(crate) enum Lookup<C, R> {
    Hit(Arc<R>),
    /// No value yet; the caller must fill (or wait on) this slot.
    Pending(Arc<C>),
}

/// Outcome of storing a freshly computed value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Admission {
    pub stored: bool,
    pub evicted: usize,
}

/// Key to slot map shared by the sync and async memoizers.
///
/// Empty slots stand for in-flight computations and are never counted or
/// offered to the eviction policy. A slot only counts once `admit` has
/// recorded it in `admitted`, which maps each stored key to its last use.
pub(crate) struct Store<K, C> {
    slots: AHashMap<K, Arc<C>>,
    admitted: AHashMap<K, u64>,
    tick: u64,
    policy: Box<dyn EvictionPolicy<K>>,
}

impl<K, C> Store<K, C>
where
    K: Hash + Eq + Clone + Send + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: AHashMap::new(),
            admitted: AHashMap::new(),
            tick: 0,
            policy: Box::new(Unbounded),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.admitted.len()
    }

    pub(crate) fn capacity(&self) -> Option<usize> {
        self.policy.capacity()
    }

    pub(crate) fn lookup<R>(&mut self, key: &K) -> Lookup<C, R>
    where
        C: Slot<R>,
    {
        if let Some(slot) = self.slots.get(key) {
            if let Some(value) = slot.value() {
                let value = Arc::clone(value);
                self.tick += 1;
                if let Some(used) = self.admitted.get_mut(key) {
                    *used = self.tick;
                }
                self.policy.on_access(key);
                return Lookup::Hit(value);
            }
            return Lookup::Pending(Arc::clone(slot));
        }

        let slot = Arc::new(C::empty());
        self.slots.insert(key.clone(), Arc::clone(&slot));
        Lookup::Pending(slot)
    }

    pub(crate) fn contains<R>(&self, key: &K) -> bool
    where
        C: Slot<R>,
    {
        self.slots
            .get(key)
            .is_some_and(|slot| slot.value().is_some())
    }

    /// Record that `slot` now holds a value.
    ///
    /// Nothing is stored when the slot was invalidated or cleared while its
    /// value was being computed.
    pub(crate) fn admit(&mut self, key: &K, slot: &Arc<C>) -> Admission {
        let current = self
            .slots
            .get(key)
            .is_some_and(|existing| Arc::ptr_eq(existing, slot));
        if !current {
            return Admission::default();
        }

        if !self.policy.admits() {
            self.slots.remove(key);
            return Admission::default();
        }

        let mut evicted = 0;
        while let Some(victim) = self.policy.evict() {
            self.slots.remove(&victim);
            if self.admitted.remove(&victim).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            debug!(evicted, "memo store evicted least recently used entries");
        }

        self.policy.on_add(key);
        self.tick += 1;
        self.admitted.insert(key.clone(), self.tick);
        Admission {
            stored: true,
            evicted,
        }
    }

    /// Drop an empty slot after its computation failed, unless another caller
    /// is still waiting on it and will retry.
    pub(crate) fn abandon(&mut self, key: &K, slot: &Arc<C>) {
        let unshared = self
            .slots
            .get(key)
            .is_some_and(|existing| Arc::ptr_eq(existing, slot) && Arc::strong_count(slot) == 2);
        if unshared {
            self.slots.remove(key);
        }
    }

    /// Remove `key`, returning whether a stored value was dropped.
    pub(crate) fn remove<R>(&mut self, key: &K) -> bool
    where
        C: Slot<R>,
    {
        let had_value = self
            .slots
            .remove(key)
            .is_some_and(|slot| slot.value().is_some());
        if self.admitted.remove(key).is_some() {
            self.policy.on_remove(key);
        }
        had_value
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.admitted.clear();
        self.policy.reset();
    }

    /// Switch to an LRU bound of `capacity` entries, evicting overflow.
    ///
    /// Entries already stored are seeded in the order they were last used,
    /// so the least recently used ones go first.
    pub(crate) fn bound(&mut self, capacity: usize) -> usize {
        let mut policy = LruEvictionPolicy::new(capacity);
        let mut victims = Vec::new();
        if capacity == 0 {
            victims.extend(self.admitted.keys().cloned());
        } else {
            let mut by_use: Vec<(&K, u64)> = self
                .admitted
                .iter()
                .map(|(key, &used)| (key, used))
                .collect();
            by_use.sort_unstable_by_key(|&(_, used)| used);
            for (key, _) in by_use {
                policy.on_add(key);
            }
            while policy.len() > capacity {
                let Some(victim) = policy.evict() else { break };
                victims.push(victim);
            }
        }

        for victim in &victims {
            self.slots.remove(victim);
            self.admitted.remove(victim);
        }

        self.policy = Box::new(policy);
        victims.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::OnceCell;

    type SyncStore = Store<u32, OnceCell<Arc<String>>>;

    fn fill(store: &mut SyncStore, key: u32) -> Admission {
        match store.lookup::<String>(&key) {
            Lookup::Pending(slot) => {
                slot.set(Arc::new(key.to_string())).unwrap();
                store.admit(&key, &slot)
            }
            Lookup::Hit(_) => panic!("expected an empty slot for {key}"),
        }
    }

    #[test]
    fn lookup_after_fill_hits() {
        let mut store = SyncStore::new();
        assert!(fill(&mut store, 1).stored);
        match store.lookup::<String>(&1) {
            Lookup::Hit(value) => assert_eq!(value.as_str(), "1"),
            Lookup::Pending(_) => panic!("expected a hit"),
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn removed_slot_is_not_admitted() {
        let mut store = SyncStore::new();
        let Lookup::Pending(slot) = store.lookup::<String>(&7) else {
            panic!("expected an empty slot");
        };
        assert!(!store.remove::<String>(&7));
        slot.set(Arc::new("late".into())).unwrap();
        assert!(!store.admit(&7, &slot).stored);
        assert!(!store.contains::<String>(&7));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn abandon_keeps_slots_other_callers_hold() {
        let mut store = SyncStore::new();
        let Lookup::Pending(first) = store.lookup::<String>(&3) else {
            panic!("expected an empty slot");
        };
        let Lookup::Pending(second) = store.lookup::<String>(&3) else {
            panic!("expected the same empty slot");
        };
        assert!(Arc::ptr_eq(&first, &second));

        store.abandon(&3, &first);
        drop(second);
        assert!(matches!(
            store.lookup::<String>(&3),
            Lookup::Pending(slot) if Arc::ptr_eq(&slot, &first)
        ));
    }

    #[test]
    fn bound_keeps_most_recently_used_entries() {
        let mut store = SyncStore::new();
        for key in 0..4 {
            fill(&mut store, key);
        }
        assert!(matches!(store.lookup::<String>(&0), Lookup::Hit(_)));

        assert_eq!(store.bound(2), 2);
        assert!(store.contains::<String>(&0));
        assert!(store.contains::<String>(&3));
        assert!(!store.contains::<String>(&1));
        assert!(!store.contains::<String>(&2));
    }

    #[test]
    fn bound_trims_to_capacity() {
        let mut store = SyncStore::new();
        for key in 0..4 {
            fill(&mut store, key);
        }
        assert_eq!(store.bound(2), 2);
        assert_eq!(store.len(), 2);
        assert_eq!(store.capacity(), Some(2));

        assert_eq!(fill(&mut store, 9).evicted, 1);
        assert_eq!(store.len(), 2);
    }
}
