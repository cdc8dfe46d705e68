// Copyright 2015-2023 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The four caches of the recursor, all built on a sharded concurrent map

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;

pub mod dnskey;
pub mod nameserver;
pub mod rrset;
pub mod zone;

pub use dnskey::{DnskeyCache, DnskeyCacheEntry};
pub use nameserver::{AuthServer, NameServerCache, ServerSource};
pub use rrset::{CachedRRset, Context, RRsetCache};
pub use zone::{ZoneCache, ZoneEntry};

const SHARD_COUNT: usize = 16;

/// A hash map sharded over per-shard read/write locks.
///
/// Writes to a single key are serialised by the shard lock; snapshot
/// iteration copies buckets so writers are never blocked by readers.
/// No operation suspends.
pub(crate) struct ShardedMap<K, V> {
    shards: Vec<RwLock<HashMap<K, V>>>,
}

impl<K, V> ShardedMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, key: &K) -> &RwLock<HashMap<K, V>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.shard(key).read().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: K, value: V) -> Option<V> {
        self.shard(&key).write().insert(key, value)
    }

    pub(crate) fn remove(&self, key: &K) -> Option<V> {
        self.shard(key).write().remove(key)
    }

    /// Read one key, atomically evicting it when the predicate says so;
    /// returns the surviving value and whether an eviction happened
    pub(crate) fn get_or_evict(
        &self,
        key: &K,
        evict: impl FnOnce(&V) -> bool,
    ) -> (Option<V>, bool) {
        let mut shard = self.shard(key).write();
        match shard.get(key) {
            Some(value) if evict(value) => {
                shard.remove(key);
                (None, true)
            }
            Some(value) => (Some(value.clone()), false),
            None => (None, false),
        }
    }

    /// Insert under the shard lock when `admit` approves the overwrite;
    /// a vacant slot is always filled. Returns whether the value landed.
    pub(crate) fn insert_if(
        &self,
        key: K,
        value: V,
        admit: impl FnOnce(&V, &V) -> bool,
    ) -> bool {
        let mut shard = self.shard(&key).write();
        match shard.get(&key) {
            Some(stored) if !admit(stored, &value) => false,
            _ => {
                shard.insert(key, value);
                true
            }
        }
    }

    /// Insert-or-update under a single lock acquisition
    pub(crate) fn upsert(&self, key: K, default: impl FnOnce() -> V, f: impl FnOnce(&mut V)) {
        let mut shard = self.shard(&key).write();
        let value = shard.entry(key).or_insert_with(default);
        f(value);
    }

    /// Snapshot of all entries, copied shard by shard
    pub(crate) fn snapshot(&self) -> Vec<(K, V)> {
        let mut entries = Vec::new();
        for shard in &self.shards {
            let shard = shard.read();
            entries.extend(shard.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        entries
    }

    /// Snapshot of all keys
    pub(crate) fn keys(&self) -> Vec<K> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.read().keys().cloned());
        }
        keys
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let map: ShardedMap<String, u32> = ShardedMap::new();
        assert!(map.insert("a".to_string(), 1).is_none());
        assert_eq!(map.get(&"a".to_string()), Some(1));
        assert_eq!(map.remove(&"a".to_string()), Some(1));
        assert_eq!(map.get(&"a".to_string()), None);
    }

    #[test]
    fn test_snapshot_copies() {
        let map: ShardedMap<u32, u32> = ShardedMap::new();
        for i in 0..100 {
            map.insert(i, i * 2);
        }
        let snapshot = map.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(map.len(), 100);
    }

    #[test]
    fn test_upsert_updates_in_place() {
        let map: ShardedMap<&'static str, Vec<u32>> = ShardedMap::new();
        map.upsert("k", Vec::new, |v| v.push(1));
        map.upsert("k", Vec::new, |v| v.push(2));
        assert_eq!(map.get(&"k"), Some(vec![1, 2]));
    }
}
