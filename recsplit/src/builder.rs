use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::bit_buffer::{BitBuffer, fold};
use crate::error::{Error, Result};
use crate::evaluator::{ENTRY_WIDTH_SHIFT, ROOT_SEED, RecSplitEvaluator, bucket_index, expected_prefix};
use crate::settings::{MAX_FANOUT, Settings, Split, supplemental_hash, universal_hash_index};
use crate::stats::BuildStatsCollector;
use crate::universal_hash::{BuildDefaultSeededHasher, UniversalHash};
use crate::utils::bit_width;

/// Checks whether a seed with given `index` splits the keys with given `hashes` as `split` requires.
fn is_valid_split(hashes: &[u64], index: u64, split: Split) -> bool {
    let size = hashes.len();
    match split {
        Split::Leaf => {
            let mut used = 0u64;
            for h in hashes {
                let bit = 1u64 << supplemental_hash(*h, index, size as u64);
                if used & bit != 0 { return false; }
                used |= bit;
            }
            true
        }
        Split::Equal(parts) => {
            let part_size = size / parts;
            let mut counts = [0usize; MAX_FANOUT];
            for h in hashes {
                let count = &mut counts[supplemental_hash(*h, index, parts as u64) as usize];
                if *count == part_size { return false; }
                *count += 1;
            }
            true
        }
        Split::Unequal(first) =>
            hashes.iter().filter(|h| supplemental_hash(**h, index, size as u64) < first as u64).count() == first,
    }
}

/// Builds RecSplit minimal perfect hash functions.
///
/// Construction is deterministic: given keys, hash family and settings,
/// the same bits are produced regardless of the number of threads used.
#[derive(Clone)]
pub struct RecSplitBuilder<S = BuildDefaultSeededHasher> {
    settings: Arc<Settings>,
    hash: S,
    multi_threaded: bool,
}

impl Default for RecSplitBuilder {
    fn default() -> Self { Self::new() }
}

impl RecSplitBuilder {
    /// Returns builder with default settings and hash family.
    pub fn new() -> Self { Self::with_settings(Settings::default()) }

    /// Returns builder with given `settings` and the default hash family.
    pub fn with_settings(settings: impl Into<Arc<Settings>>) -> Self {
        Self::with_hash(settings, Default::default())
    }

    /// Returns builder with settings for given `leaf_size` and `load_factor`, and the default hash family.
    pub fn with_params(leaf_size: usize, load_factor: usize) -> Result<Self> {
        Ok(Self::with_settings(Settings::new(leaf_size, load_factor)?))
    }
}

impl<S> RecSplitBuilder<S> {
    /// Returns builder with given `settings` and `hash` family.
    pub fn with_hash(settings: impl Into<Arc<Settings>>, hash: S) -> Self {
        Self { settings: settings.into(), hash, multi_threaded: true }
    }

    /// Sets whether buckets are built in parallel, using the default [rayon] thread pool. (default: `true`)
    pub fn multi_threaded(mut self, multi_threaded: bool) -> Self {
        self.multi_threaded = multi_threaded;
        self
    }

    #[inline] pub fn settings(&self) -> &Arc<Settings> { &self.settings }

    #[inline] pub fn hash(&self) -> &S { &self.hash }

    /// Returns the evaluator of the `artifact` built by `self`.
    pub fn build_evaluator(&self, artifact: BitBuffer) -> Result<RecSplitEvaluator<S>> where S: Clone {
        RecSplitEvaluator::new(artifact, self.hash.clone(), Arc::clone(&self.settings))
    }

    /// Returns the bucket of `key`, its hash used by the bucket root, and `key`.
    #[inline] fn hashed<'k, K>(&self, key: &'k K, bucket_count: usize) -> (usize, u64, &'k K) where S: UniversalHash<K> {
        (bucket_index(&self.hash, key, bucket_count), self.hash.universal_hash(key, ROOT_SEED), key)
    }

    /// Finds the first seed that splits `keys` as required for their number.
    /// Returns the seed offset and index, and updates hashes of the keys if the index starts a new epoch.
    fn find_seed<K>(&self, bucket: usize, keys: &mut [(u64, &K)], split: Split, start: u64) -> Result<(u64, u64)>
        where S: UniversalHash<K>
    {
        let size = keys.len();
        let trials = self.settings.max_seed_trials(size);
        let start_epoch = universal_hash_index(start);
        let mut epoch = start_epoch;
        let mut hashes: Vec<u64> = keys.iter().map(|(h, _)| *h).collect();
        for offset in 0..trials {
            let index = start + offset + 1;
            let x = universal_hash_index(index);
            if x != epoch {
                epoch = x;
                for (h, (_, key)) in hashes.iter_mut().zip(keys.iter()) {
                    *h = self.hash.universal_hash(*key, x + 1);
                }
            }
            if is_valid_split(&hashes, index, split) {
                if epoch != start_epoch {
                    for ((h, _), new_h) in keys.iter_mut().zip(hashes) { *h = new_h; }
                }
                return Ok((offset, index));
            }
        }
        warn!(bucket, size, trials, "seed search exhausted");
        Err(Error::SeedSearchExhausted { bucket, size, trials })
    }

    /// Appends to `out` the seeds of the subtree of `keys`, in pre-order.
    fn encode_node<K>(&self, out: &mut BitBuffer, bucket: usize, keys: &mut [(u64, &K)], start: u64) -> Result<()>
        where S: UniversalHash<K>
    {
        let size = keys.len();
        if size < 2 { return Ok(()); }
        let split = self.settings.split(size);
        let (offset, index) = self.find_seed(bucket, keys, split, start)?;
        out.write_golomb_rice(offset, self.settings.golomb_rice_shift(size))?;
        match split {
            Split::Leaf => {}
            Split::Equal(parts) => {
                keys.sort_unstable_by_key(|(h, _)| supplemental_hash(*h, index, parts as u64));
                for part in keys.chunks_mut(size / parts) {
                    self.encode_node(out, bucket, part, index)?;
                }
            }
            Split::Unequal(first) => {
                keys.sort_unstable_by_key(|(h, _)| supplemental_hash(*h, index, size as u64) >= first as u64);
                let (first_part, second_part) = keys.split_at_mut(first);
                self.encode_node(out, bucket, first_part, index)?;
                self.encode_node(out, bucket, second_part, index)?;
            }
        }
        Ok(())
    }

    fn encode_bucket<K>(&self, bucket: usize, keys: &mut [(u64, &K)]) -> Result<BitBuffer>
        where S: UniversalHash<K>
    {
        let mut out = BitBuffer::new();
        self.encode_node(&mut out, bucket, keys, 0)?;
        trace!(bucket, size = keys.len(), bits = out.len(), "bucket encoded");
        Ok(out)
    }

    /// Writes the key count and, for more than one bucket, the table of bucket positions.
    fn write_header(&self, out: &mut BitBuffer, bucket_begin: &[usize], encoded: &[BitBuffer], data_bits: usize) -> Result<()> {
        let bucket_count = encoded.len();
        let key_count = bucket_begin[bucket_count];
        out.write_elias_delta(key_count as u64 + 1)?;
        if bucket_count == 1 { return Ok(()); }
        let estimated_bits = self.settings.estimated_bits(key_count);
        out.write_elias_delta(fold(data_bits as i64 - estimated_bits as i64) + 1)?;
        let mut deviations = Vec::with_capacity(2 * (bucket_count - 1));
        let mut start = 0;
        for bucket in 1..bucket_count {
            start += encoded[bucket - 1].len();
            deviations.push(fold(bucket_begin[bucket] as i64 - expected_prefix(key_count, bucket, bucket_count) as i64));
            deviations.push(fold(start as i64 - expected_prefix(data_bits, bucket, bucket_count) as i64));
        }
        let entry_width = deviations.iter().copied().max().map_or(0, bit_width);
        out.write_golomb_rice(entry_width as u64, ENTRY_WIDTH_SHIFT)?;
        for deviation in deviations {
            out.write_number(deviation, entry_width)?;
        }
        Ok(())
    }
}

impl<S: Sync> RecSplitBuilder<S> {
    /// Builds minimal perfect hash function of given distinct `keys` and returns its bits.
    ///
    /// Returns [`Error::SeedSearchExhausted`] if some seed cannot be found, which practically happens only
    /// if `keys` contain duplicates.
    pub fn generate<K: Sync>(&self, keys: &[K]) -> Result<BitBuffer> where S: UniversalHash<K> {
        self.generate_stats(keys, &mut ())
    }

    /// Builds minimal perfect hash function of given distinct `keys`, reports statistics to `stats`, and returns its bits.
    pub fn generate_stats<K: Sync, BS>(&self, keys: &[K], stats: &mut BS) -> Result<BitBuffer>
        where S: UniversalHash<K>, BS: BuildStatsCollector
    {
        let key_count = keys.len();
        let bucket_count = self.settings.bucket_count(key_count);
        let multi_threaded = self.multi_threaded && rayon::current_num_threads() > 1;
        debug!(key_count, bucket_count, multi_threaded, "building RecSplit");

        let mut entries: Vec<(usize, u64, &K)> = if multi_threaded {
            keys.par_iter().map(|key| self.hashed(key, bucket_count)).collect()
        } else {
            keys.iter().map(|key| self.hashed(key, bucket_count)).collect()
        };
        let mut bucket_begin = vec![0; bucket_count + 1];
        for (bucket, _, _) in &entries { bucket_begin[bucket + 1] += 1; }
        for bucket in 1..=bucket_count { bucket_begin[bucket] += bucket_begin[bucket - 1]; }
        entries.sort_unstable_by_key(|(bucket, _, _)| *bucket);
        let mut entries: Vec<(u64, &K)> = entries.into_iter().map(|(_, h, key)| (h, key)).collect();

        let mut buckets = Vec::with_capacity(bucket_count);
        let mut rest = &mut entries[..];
        for bucket in 0..bucket_count {
            let (bucket_keys, tail) = std::mem::take(&mut rest).split_at_mut(bucket_begin[bucket + 1] - bucket_begin[bucket]);
            buckets.push(bucket_keys);
            rest = tail;
        }
        let encoded: Vec<BitBuffer> = if multi_threaded {
            buckets.into_par_iter().enumerate().map(|(bucket, keys)| self.encode_bucket(bucket, keys)).collect::<Result<_>>()?
        } else {
            buckets.into_iter().enumerate().map(|(bucket, keys)| self.encode_bucket(bucket, keys)).collect::<Result<_>>()?
        };

        let data_bits: usize = encoded.iter().map(BitBuffer::len).sum();
        let mut result = BitBuffer::with_capacity(data_bits + 64 * bucket_count + 128);
        self.write_header(&mut result, &bucket_begin, &encoded, data_bits)?;
        for (bucket, bits) in encoded.iter().enumerate() {
            stats.bucket(bucket, bucket_begin[bucket + 1] - bucket_begin[bucket], bits.len());
            result.append(bits);
        }
        stats.end(result.len());
        debug!(key_count, bucket_count, bits = result.len(), bits_per_key = result.len() as f64 / key_count.max(1) as f64, "RecSplit built");
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::stats::BuildTotals;
    use crate::utils::mix64;
    use bitm::{BitAccess, BitVec};
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use std::fmt::Debug;

    pub fn test_mphf<K: Debug, G: Fn(&K) -> usize>(keys: &[K], mphf: G) {
        let mut seen = Box::<[u64]>::with_zeroed_bits(keys.len());
        for key in keys {
            let index = mphf(key);
            assert!(index < keys.len(), "MPHF assigns too large value for the key {:?}: {}>={}.", key, index, keys.len());
            assert!(!seen.get_bit(index), "MPHF assigns {} to {:?} and some other key included in the input", index, key);
            seen.set_bit(index);
        }
    }

    fn random_keys(n: usize, seed: u64) -> Vec<u64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen()).collect()
    }

    fn test_with_input<K: std::hash::Hash + Debug + Sync>(keys: &[K], leaf_size: usize, load_factor: usize) {
        let builder = RecSplitBuilder::with_params(leaf_size, load_factor).unwrap();
        let f = builder.build_evaluator(builder.generate(keys).unwrap()).unwrap();
        assert_eq!(f.len(), keys.len());
        test_mphf(keys, |key| f.evaluate(key));
    }

    #[test]
    fn test_small() {
        for (leaf_size, load_factor) in [(1, 1), (2, 4), (5, 100), (8, 256), (8, 10)] {
            for n in [0, 1, 2, leaf_size, leaf_size + 1, 3 * leaf_size + 1, load_factor + 1] {
                let keys: Vec<u64> = (0..n as u64).map(|i| i * 7919 + 13).collect();
                test_with_input(&keys, leaf_size, load_factor);
            }
        }
        test_with_input(&['a', 'b', 'c', 'd'], 2, 2);
        test_with_input(&(-50..150).collect::<Vec<i32>>(), 4, 30);
    }

    #[test]
    fn test_medium() {
        for (leaf_size, load_factor) in [(2, 4), (5, 100), (8, 256), (10, 1000)] {
            test_with_input(&random_keys(5000, leaf_size as u64), leaf_size, load_factor);
        }
    }

    #[test]
    fn test_strings() {
        let keys: Vec<String> = (0..3000).map(|i| format!("key-{i}")).collect();
        test_with_input(&keys, 8, 100);
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        test_with_input(&refs, 8, 100);
    }

    #[test]
    fn test_four_keys() {
        let keys = [1001u64, 2002, 3003, 4004];
        let builder = RecSplitBuilder::with_params(2, 4).unwrap();
        let artifact = builder.generate(&keys).unwrap();
        assert_eq!(artifact, builder.generate(&keys).unwrap());
        let f = builder.build_evaluator(artifact).unwrap();
        let mut values: Vec<usize> = keys.iter().map(|k| f.evaluate(k)).collect();
        values.sort_unstable();
        assert_eq!(values, [0, 1, 2, 3]);
    }

    #[test]
    fn test_multi_threaded_equals_single_threaded() {
        let keys = random_keys(20_000, 11);
        let builder = RecSplitBuilder::with_params(8, 100).unwrap();
        let st = builder.clone().multi_threaded(false).generate(&keys).unwrap();
        let mt = builder.multi_threaded(true).generate(&keys).unwrap();
        assert_eq!(st, mt);
    }

    #[test]
    fn test_duplicates() {
        let builder = RecSplitBuilder::with_params(8, 256).unwrap();
        let result = builder.generate(&[1u64, 2, 3, 3]);
        assert!(matches!(result, Err(Error::SeedSearchExhausted { bucket: 0, size: 4, .. })));
        let mut keys = random_keys(1000, 12);
        keys.push(keys[500]);
        let builder = RecSplitBuilder::with_params(5, 50).unwrap();
        assert!(matches!(builder.generate(&keys), Err(Error::SeedSearchExhausted { .. })));
    }

    #[test]
    fn test_compactness() {
        let keys = random_keys(30_000, 13);
        let builder = RecSplitBuilder::with_params(8, 1024).unwrap();
        let mut totals = BuildTotals::default();
        let artifact = builder.generate_stats(&keys, &mut totals).unwrap();
        let bits_per_key = artifact.len() as f64 / keys.len() as f64;
        assert!(bits_per_key < 2.0, "{bits_per_key} bits per key");
        assert_eq!(totals.keys, keys.len());
        assert_eq!(totals.buckets, builder.settings().bucket_count(keys.len()));
        assert_eq!(totals.total_bits, artifact.len());
        assert!(totals.data_bits < artifact.len());
        let f = builder.build_evaluator(artifact).unwrap();
        test_mphf(&keys, |key| f.evaluate(key));
    }

    struct LongHash;

    impl UniversalHash<u64> for LongHash {
        fn universal_hash(&self, key: &u64, seed: u64) -> u64 {
            mix64(key ^ mix64(seed.wrapping_add(0x9E37_79B9_7F4A_7C15)))
        }
    }

    #[test]
    fn test_custom_hash() {
        let keys = random_keys(4000, 14);
        let builder = RecSplitBuilder::with_hash(Settings::new(6, 200).unwrap(), LongHash);
        let artifact = builder.generate(&keys).unwrap();
        let f = RecSplitEvaluator::new(artifact, LongHash, Arc::clone(builder.settings())).unwrap();
        test_mphf(&keys, |key| f.evaluate(key));
    }

    #[test]
    fn test_header_entry_widths() {
        let builder = RecSplitBuilder::with_params(4, 16).unwrap();
        let keys = random_keys(2000, 15);
        let artifact = builder.generate(&keys).unwrap();
        let mut reader = artifact.reader();
        assert_eq!(reader.read_elias_delta(), 2001);
        reader.read_elias_delta();
        assert!(reader.read_golomb_rice(ENTRY_WIDTH_SHIFT) < 32);
    }
}
