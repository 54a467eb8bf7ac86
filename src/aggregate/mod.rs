//! Cross-pass aggregators shared by every worker of a stage.

pub mod counts;
pub mod mandatory;
pub mod owner;

use std::hash::{BuildHasher, BuildHasherDefault, Hash};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHasher};

pub use counts::{CountsAccumulator, CountsKey, CountsMismatch, CountsReconciliation, WILDCARD};
pub use mandatory::{MandatoryProperties, MandatoryTracker};
pub use owner::{Claimant, Conflict, OwnerDomain, OwnerTracker, Owners};

const SHARDS: usize = 16;

/// Hash map split into independently locked shards.
pub(crate) struct Sharded<K, V> {
    shards: Box<[Mutex<FxHashMap<K, V>>]>,
}

impl<K: Hash + Eq, V> Sharded<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(FxHashMap::default())).collect(),
        }
    }

    fn shard_of(&self, key: &K) -> &Mutex<FxHashMap<K, V>> {
        let hash = BuildHasherDefault::<FxHasher>::default().hash_one(key);
        &self.shards[(hash as usize) % SHARDS]
    }

    /// Runs `f` with the shard holding `key` locked.
    pub(crate) fn with<T>(&self, key: &K, f: impl FnOnce(&mut FxHashMap<K, V>) -> T) -> T {
        let mut shard = self.shard_of(key).lock();
        f(&mut shard)
    }

    /// Empties every shard into one map.
    pub(crate) fn drain(&self) -> FxHashMap<K, V> {
        let mut all = FxHashMap::default();
        for shard in self.shards.iter() {
            all.extend(shard.lock().drain());
        }
        all
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}
