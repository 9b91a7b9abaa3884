use parking_lot::RwLock;
use std::hash::{Hash, Hasher};

const DEFAULT_SHARDS: usize = 64;

/// A single independently-locked segment of the map.
///
/// Padded to a cache line so that two threads hammering adjacent shards
/// never false-share the lock word.
#[repr(align(64))]
struct Shard<K, V> {
    map: RwLock<fxhash::FxHashMap<K, V>>,
}

impl<K, V> Shard<K, V> {
    fn new() -> Self {
        Shard {
            map: RwLock::new(fxhash::FxHashMap::default()),
        }
    }
}

/// A concurrent key/value map built from `N` independently locked shards
/// instead of one global lock.
///
/// Reads and writes to different shards never contend. Reads within a
/// shard can proceed concurrently with each other; writes are exclusive
/// within their shard only. `N` must be a power of two so the shard index
/// is a cheap bitmask instead of a division.
///
/// Iteration methods (`for_each`, `snapshot`, `snapshot_pairs`) walk the
/// shards one at a time under that shard's lock; they are not a global
/// atomic snapshot. A writer racing an iterator may be observed mid-walk
/// in one shard and missed in another.
pub struct StripedMap<K, V> {
    shards: Vec<Shard<K, V>>,
    mask: usize,
}

impl<K, V> Default for StripedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl<K, V> StripedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Builds a map with the default shard count (64).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map with `num_shards` independent shards.
    ///
    /// # Panics
    ///
    /// Panics if `num_shards` is zero or not a power of two.
    pub fn with_shards(num_shards: usize) -> Self {
        assert!(num_shards > 0, "num_shards must be nonzero");
        assert!(
            num_shards.is_power_of_two(),
            "num_shards must be a power of two, got {}",
            num_shards
        );
        let mut shards = Vec::with_capacity(num_shards);
        for _ in 0..num_shards {
            shards.push(Shard::new());
        }
        StripedMap {
            shards,
            mask: num_shards - 1,
        }
    }

    fn shard_index(&self, key: &K) -> usize {
        let mut hasher = fxhash::FxHasher::default();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & self.mask
    }

    /// Inserts `value` under `key` if it is not already present.
    ///
    /// Returns `true` if the key was newly inserted.
    pub fn insert(&self, key: K, value: V) -> bool {
        let shard = &self.shards[self.shard_index(&key)];
        let mut map = shard.map.write();
        if map.contains_key(&key) {
            false
        } else {
            map.insert(key, value);
            true
        }
    }

    /// Inserts or overwrites the value for `key`.
    ///
    /// Returns `true` if this created a new entry, `false` if an existing
    /// entry was overwritten.
    pub fn insert_or_assign(&self, key: K, value: V) -> bool {
        let shard = &self.shards[self.shard_index(&key)];
        let mut map = shard.map.write();
        map.insert(key, value).is_none()
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let shard = &self.shards[self.shard_index(key)];
        shard.map.write().remove(key).is_some()
    }

    /// Returns a clone of the value stored under `key`, if any.
    pub fn find(&self, key: &K) -> Option<V> {
        let shard = &self.shards[self.shard_index(key)];
        shard.map.read().get(key).cloned()
    }

    /// Returns whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        let shard = &self.shards[self.shard_index(key)];
        shard.map.read().contains_key(key)
    }

    /// Applies `f` to the value stored under `key`, if present.
    ///
    /// Returns `true` if the key existed and was updated.
    pub fn update<F>(&self, key: &K, f: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let shard = &self.shards[self.shard_index(key)];
        let mut map = shard.map.write();
        match map.get_mut(key) {
            Some(v) => {
                f(v);
                true
            }
            None => false,
        }
    }

    /// Returns the value stored under `key`, inserting `default` first if
    /// absent.
    pub fn get_or_insert(&self, key: K, default: V) -> V {
        let shard = &self.shards[self.shard_index(&key)];
        let mut map = shard.map.write();
        map.entry(key).or_insert(default).clone()
    }

    /// Total number of entries across all shards.
    ///
    /// Summed under per-shard read locks, so this is not atomic with
    /// respect to concurrent writers touching multiple shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    /// Returns whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.map.read().is_empty())
    }

    /// Removes every entry from every shard.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.map.write().clear();
        }
    }

    /// Invokes `f` for every `(key, value)` pair, shard by shard, under a
    /// read lock per shard.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for shard in &self.shards {
            let map = shard.map.read();
            for (k, v) in map.iter() {
                f(k, v);
            }
        }
    }

    /// Returns a point-in-time copy of every value.
    pub fn snapshot(&self) -> Vec<V> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|_, v| out.push(v.clone()));
        out
    }

    /// Returns a point-in-time copy of every `(key, value)` pair.
    pub fn snapshot_pairs(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|k, v| out.push((k.clone(), v.clone())));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn insert_find_remove_roundtrip() {
        let map: StripedMap<u64, u64> = StripedMap::new();
        assert!(map.insert(1, 100));
        assert!(!map.insert(1, 200));
        assert_eq!(map.find(&1), Some(100));
        assert!(map.remove(&1));
        assert_eq!(map.find(&1), None);
    }

    #[test]
    fn update_mutates_in_place() {
        let map: StripedMap<u64, u64> = StripedMap::new();
        map.insert(7, 1);
        assert!(map.update(&7, |v| *v += 41));
        assert_eq!(map.find(&7), Some(42));
        assert!(!map.update(&999, |_| {}));
    }

    #[test]
    fn concurrent_inserts_from_many_threads_all_land() {
        let map = Arc::new(StripedMap::<u64, u64>::with_shards(8));
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let map = map.clone();
            handles.push(thread::spawn(move || {
                for i in 0..10_000u64 {
                    map.insert(t * 10_000 + i, i);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 80_000);
        for t in 0..8u64 {
            for i in (0..10_000u64).step_by(997) {
                assert_eq!(map.find(&(t * 10_000 + i)), Some(i));
            }
        }
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_shard_count_panics() {
        let _map: StripedMap<u64, u64> = StripedMap::with_shards(5);
    }
}
