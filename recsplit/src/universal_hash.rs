//! Seed-indexed families of hash functions.

use std::hash::Hash;
#[allow(deprecated)]
use std::hash::SipHasher;

pub use seedable_hash::{BuildSeededHasher, Seedable, BuildDefaultSeededHasher};
#[cfg(feature = "wyhash")] pub use seedable_hash::BuildWyHash;

/// [`BuildSeededHasher`] that uses SipHash-2-4 keyed with the seed.
#[derive(Default, Copy, Clone)]
pub struct BuildSip;

#[allow(deprecated)]
impl BuildSeededHasher for BuildSip {
    type Hasher = SipHasher;

    #[inline] fn build_hasher(&self, seed: u64) -> Self::Hasher {
        Self::Hasher::new_with_keys(seed, seed)
    }
}

/// Family of hash functions of keys of type `K`, indexed by 64-bit seeds.
///
/// The same key and seed always give the same value,
/// and different seeds should behave like independent functions.
pub trait UniversalHash<K: ?Sized> {
    fn universal_hash(&self, key: &K, seed: u64) -> u64;
}

impl<K: Hash + ?Sized, S: BuildSeededHasher> UniversalHash<K> for S {
    #[inline] fn universal_hash(&self, key: &K, seed: u64) -> u64 {
        self.hash_one(key, seed)
    }
}
