use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The outcome of inserting into a `BoundedTable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// The key was not present and has been added.
    Added,
    /// The key was present and its value has been overwritten.
    Replaced,
    /// The key was not present and the table is full. Nothing was stored.
    Dropped,
}

/// A concurrent hash table with a fixed upper bound on the number of entries.
///
/// Storage is sized for the full capacity up front, which avoids most resizes
/// on the hot path. The capacity is split across shards, so a shard that
/// receives more than its share of keys can still grow. The entry bound is
/// enforced on the whole table. When the table is full, inserts of new keys
/// are rejected while updates to existing keys still succeed. There is no
/// blocking beyond the short shard-level critical sections of the underlying
/// map, and no operation ever waits for capacity to become available.
pub struct BoundedTable<K, V> {
    inner: DashMap<K, V>,
    len: AtomicUsize,
    capacity: usize,
}

impl<K, V> BoundedTable<K, V>
where
    K: Eq + Hash,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: DashMap::with_capacity(capacity),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Insert or overwrite the value for `key`.
    pub fn insert(&self, key: K, value: V) -> Insert {
        match self.inner.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(value);
                Insert::Replaced
            }
            Entry::Vacant(entry) => {
                if !self.reserve() {
                    return Insert::Dropped;
                }
                entry.insert(value);
                Insert::Added
            }
        }
    }

    /// Runs `f` against the value for `key`, creating the value with `init`
    /// first if the key is absent. Returns `None` if the key was absent and
    /// the table is full.
    pub fn upsert_with<R>(
        &self,
        key: K,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&V) -> R,
    ) -> Option<R> {
        // fast path, shared lock on the shard
        if let Some(value) = self.inner.get(&key) {
            return Some(f(value.value()));
        }

        match self.inner.entry(key) {
            Entry::Occupied(entry) => Some(f(entry.get())),
            Entry::Vacant(entry) => {
                if !self.reserve() {
                    return None;
                }
                let value = entry.insert(init());
                Some(f(value.value()))
            }
        }
    }

    /// Removes and returns the value for `key`, if any.
    pub fn remove(&self, key: &K) -> Option<V> {
        let (_, value) = self.inner.remove(key)?;
        self.len.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Visits every entry. Concurrent writers to other shards are not blocked.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for entry in self.inner.iter() {
            f(entry.key(), entry.value());
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // claims one slot, must be called while holding the shard lock for a
    // vacant entry so that the count and the map agree once it is released
    fn reserve(&self) -> bool {
        if self.len.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
impl<K, V> BoundedTable<K, V>
where
    K: Eq + Hash,
    V: Copy,
{
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|v| *v.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicU64;

    #[test]
    fn insert_replace_remove() {
        let table = BoundedTable::new(4);

        assert_eq!(table.insert(1, 10), Insert::Added);
        assert_eq!(table.insert(1, 11), Insert::Replaced);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&1), Some(11));

        assert_eq!(table.remove(&1), Some(11));
        assert_eq!(table.remove(&1), None);
        assert!(table.is_empty());
    }

    #[test]
    fn full_table_drops_newest() {
        let table = BoundedTable::new(2);

        assert_eq!(table.insert(1, 'a'), Insert::Added);
        assert_eq!(table.insert(2, 'b'), Insert::Added);
        assert_eq!(table.insert(3, 'c'), Insert::Dropped);

        // existing keys can still be overwritten while full
        assert_eq!(table.insert(2, 'z'), Insert::Replaced);

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&1), Some('a'));
        assert_eq!(table.get(&2), Some('z'));
        assert_eq!(table.get(&3), None);

        // freeing a slot makes room again
        table.remove(&1);
        assert_eq!(table.insert(3, 'c'), Insert::Added);
    }

    #[test]
    fn upsert_respects_capacity() {
        let table: BoundedTable<u32, AtomicU64> = BoundedTable::new(1);

        let bump = |v: &AtomicU64| v.fetch_add(1, Ordering::Relaxed);

        assert_eq!(table.upsert_with(7, AtomicU64::default, bump), Some(0));
        assert_eq!(table.upsert_with(7, AtomicU64::default, bump), Some(1));
        assert_eq!(table.upsert_with(8, AtomicU64::default, bump), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn concurrent_inserts_never_exceed_capacity() {
        let table = BoundedTable::new(64);

        std::thread::scope(|s| {
            for t in 0..8u32 {
                let table = &table;
                s.spawn(move || {
                    for i in 0..100u32 {
                        table.insert(t * 1000 + i, i);
                    }
                });
            }
        });

        assert_eq!(table.len(), 64);

        let mut seen = 0;
        table.for_each(|_, _| seen += 1);
        assert_eq!(seen, 64);
    }
}
