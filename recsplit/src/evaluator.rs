use std::io;
use std::sync::Arc;

use dyn_size_of::GetSize;
use tracing::debug;

use crate::bit_buffer::{BitBuffer, BitReader, MAX_WIDTH, unfold};
use crate::error::{Error, Result};
use crate::settings::{Settings, Split, supplemental_hash, universal_hash_index};
use crate::stats::AccessStatsCollector;
use crate::universal_hash::{BuildDefaultSeededHasher, UniversalHash};

/// Seed of the hash that assigns keys to buckets.
pub(crate) const BUCKET_SEED: u64 = 0;

/// Seed of the hash used by the root of each bucket, i.e. `universal_hash_index(0) + 1`.
pub(crate) const ROOT_SEED: u64 = 1;

/// Golomb-Rice shift of the width of bucket table entries.
pub(crate) const ENTRY_WIDTH_SHIFT: u8 = 2;

/// Returns the bucket of `key`.
#[inline(always)]
pub(crate) fn bucket_index<K: ?Sized, H: UniversalHash<K>>(hash: &H, key: &K, bucket_count: usize) -> usize {
    supplemental_hash(hash.universal_hash(key, BUCKET_SEED), 0, bucket_count as u64) as usize
}

/// Returns the predicted value of the `bucket`-th prefix of `total`, assuming it is evenly spread over `bucket_count` buckets.
#[inline(always)]
pub(crate) fn expected_prefix(total: usize, bucket: usize, bucket_count: usize) -> usize {
    (total as u128 * bucket as u128 / bucket_count as u128) as usize
}

/// Minimal perfect hash function that maps each of `n` keys to a distinct value in `[0, n)`.
///
/// It reads a bit stream produced by [`RecSplitBuilder`](crate::RecSplitBuilder).
/// The stream starts with a header:
/// - Elias-Delta code of `n + 1`;
/// - if there is more than one bucket: Elias-Delta code of the zig-zag folded difference (plus 1) between
///   the number of bits of all bucket trees and [`Settings::estimated_bits`], the width `w` of table entries
///   coded with Golomb-Rice, and for each bucket except the first, two `w`-bit zig-zag folded deviations
///   of its first value and its first bit from their predictions.
///
/// The trees of seeds of the buckets follow, each in pre-order.
pub struct RecSplitEvaluator<S = BuildDefaultSeededHasher> {
    artifact: BitBuffer,
    hash: S,
    settings: Arc<Settings>,
    key_count: usize,
    bucket_count: usize,
    data_bits: usize,
    entry_width: u8,
    table_start: usize,
    header_bits: usize,
}

impl<S> GetSize for RecSplitEvaluator<S> {
    fn size_bytes_dyn(&self) -> usize { self.artifact.size_bytes_dyn() }
    fn size_bytes_content_dyn(&self) -> usize { self.artifact.size_bytes_content_dyn() }
    const USES_DYN_MEM: bool = true;
}

impl<S> RecSplitEvaluator<S> {
    /// Parses the header of `artifact` and returns the function it describes.
    ///
    /// `hash` and `settings` must be the same as used to build the `artifact`.
    pub fn new(artifact: BitBuffer, hash: S, settings: impl Into<Arc<Settings>>) -> Result<Self> {
        let settings = settings.into();
        let available = artifact.len();
        let truncated = Error::Truncated { needed: available + 1, available };
        let mut reader = artifact.reader();
        let Some(key_count_plus_1) = reader.try_read_elias_delta() else { return Err(truncated) };
        let key_count = (key_count_plus_1 - 1) as usize;
        let bucket_count = settings.bucket_count(key_count);
        let (data_bits, entry_width, table_start, header_bits) = if bucket_count > 1 {
            let Some(correction) = reader.try_read_elias_delta() else { return Err(truncated) };
            let data_bits = settings.estimated_bits(key_count) as i64 + unfold(correction - 1);
            let Some(entry_width) = reader.try_read_golomb_rice(ENTRY_WIDTH_SHIFT) else { return Err(truncated) };
            if data_bits < 0 || entry_width > MAX_WIDTH as u64 { return Err(truncated); }
            let table_start = reader.position();
            let header_bits = (2 * entry_width as usize).checked_mul(bucket_count - 1)
                .and_then(|table_bits| table_bits.checked_add(table_start));
            let Some(header_bits) = header_bits else { return Err(truncated) };
            (data_bits as usize, entry_width as u8, table_start, header_bits)
        } else {
            let header_bits = reader.position();
            (available - header_bits, 0, header_bits, header_bits)
        };
        match header_bits.checked_add(data_bits) {
            Some(needed) if needed <= available => {},
            needed => return Err(Error::Truncated { needed: needed.unwrap_or(usize::MAX), available }),
        }
        let result = Self { artifact, hash, settings, key_count, bucket_count, data_bits, entry_width, table_start, header_bits };
        result.validate_table()?;
        debug!(key_count, bucket_count, entry_width, bits = available, "RecSplit evaluator created");
        Ok(result)
    }

    /// Checks whether the first values of buckets do not decrease and their first bits lie within the data.
    fn validate_table(&self) -> Result<()> {
        let mut reader = self.artifact.reader();
        let mut previous_add = 0;
        for bucket in 1..self.bucket_count {
            let (add, start) = self.bucket_entry(&mut reader, bucket);
            if add < previous_add || add > self.key_count as i64 || start < 0 || start > self.data_bits as i64 {
                return Err(Error::Truncated { needed: self.header_bits + start.max(0) as usize, available: self.artifact.len() });
            }
            previous_add = add;
        }
        Ok(())
    }

    /// Returns the first value and the first bit (relative to the end of the header) of given `bucket`.
    #[inline] fn bucket_entry(&self, reader: &mut BitReader<'_>, bucket: usize) -> (i64, i64) {
        if bucket == 0 { return (0, 0); }
        reader.seek(self.table_start + 2 * self.entry_width as usize * (bucket - 1));
        let add = expected_prefix(self.key_count, bucket, self.bucket_count) as i64 + unfold(reader.read_number(self.entry_width));
        let start = expected_prefix(self.data_bits, bucket, self.bucket_count) as i64 + unfold(reader.read_number(self.entry_width));
        (add, start)
    }

    /// Returns the first value, the size and the first bit of given `bucket`.
    #[inline] fn bucket_range(&self, reader: &mut BitReader<'_>, bucket: usize) -> (usize, usize, usize) {
        let (add, start) = self.bucket_entry(reader, bucket);
        let end = if bucket + 1 < self.bucket_count {
            if bucket == 0 { reader.seek(self.table_start); }
            expected_prefix(self.key_count, bucket + 1, self.bucket_count) as i64 + unfold(reader.read_number(self.entry_width))
        } else {
            self.key_count as i64
        };
        (add as usize, (end - add) as usize, start as usize)
    }

    /// Skips the seeds of the subtree of given `size`.
    fn skip<A: AccessStatsCollector>(&self, reader: &mut BitReader<'_>, size: usize, access_stats: &mut A) {
        if size < 2 { return; }
        access_stats.node(size);
        reader.read_golomb_rice(self.settings.golomb_rice_shift(size));
        for part in self.settings.split(size).part_sizes(size) {
            self.skip(reader, part, access_stats);
        }
    }

    /// Returns the value assigned to `key` and reports every decoded node to `access_stats`.
    ///
    /// The result is in `[0, n)` (`0` for an empty function) for every key,
    /// and distinct for distinct keys used to build the function.
    pub fn evaluate_stats<K: ?Sized, A: AccessStatsCollector>(&self, key: &K, access_stats: &mut A) -> usize
        where S: UniversalHash<K>
    {
        if self.key_count == 0 { return 0; }
        let mut reader = self.artifact.reader();
        let (mut add, mut size, start) = self.bucket_range(&mut reader, bucket_index(&self.hash, key, self.bucket_count));
        if size == 0 { return add.min(self.key_count - 1); }
        reader.seek(self.header_bits + start);
        let mut hash = self.hash.universal_hash(key, ROOT_SEED);
        let mut start_index = 0;
        while size > 1 {
            access_stats.node(size);
            let index = start_index + reader.read_golomb_rice(self.settings.golomb_rice_shift(size)) + 1;
            let epoch = universal_hash_index(index);
            if epoch != universal_hash_index(start_index) {
                hash = self.hash.universal_hash(key, epoch + 1);
            }
            match self.settings.split(size) {
                Split::Leaf => return add + supplemental_hash(hash, index, size as u64) as usize,
                Split::Equal(parts) => {
                    let part_size = size / parts;
                    let part = supplemental_hash(hash, index, parts as u64) as usize;
                    for _ in 0..part { self.skip(&mut reader, part_size, access_stats); }
                    add += part * part_size;
                    size = part_size;
                }
                Split::Unequal(first) => {
                    if supplemental_hash(hash, index, size as u64) < first as u64 {
                        size = first;
                    } else {
                        self.skip(&mut reader, first, access_stats);
                        add += first;
                        size -= first;
                    }
                }
            }
            start_index = index;
        }
        add
    }

    /// Returns the value assigned to `key`; see [`Self::evaluate_stats`].
    #[inline] pub fn evaluate<K: ?Sized>(&self, key: &K) -> usize where S: UniversalHash<K> {
        self.evaluate_stats(key, &mut ())
    }

    /// Returns the number of keys.
    #[inline] pub fn len(&self) -> usize { self.key_count }

    /// Returns `true` if the function was built for an empty set.
    #[inline] pub fn is_empty(&self) -> bool { self.key_count == 0 }

    /// Returns the number of buckets.
    #[inline] pub fn bucket_count(&self) -> usize { self.bucket_count }

    /// Returns the number of bits of the header.
    #[inline] pub fn header_bits(&self) -> usize { self.header_bits }

    /// Returns the number of bits of the whole artifact.
    #[inline] pub fn bits(&self) -> usize { self.artifact.len() }

    /// Returns the number of bits per key.
    pub fn bits_per_key(&self) -> f64 {
        self.artifact.len() as f64 / self.key_count.max(1) as f64
    }

    #[inline] pub fn settings(&self) -> &Arc<Settings> { &self.settings }

    #[inline] pub fn artifact(&self) -> &BitBuffer { &self.artifact }

    #[inline] pub fn into_artifact(self) -> BitBuffer { self.artifact }

    /// Returns number of bytes which `write` will write.
    pub fn write_bytes(&self) -> usize { self.artifact.write_bytes() }

    /// Writes `self` to the `output`. Settings and hash family are not written.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        self.artifact.write(output)
    }

    /// Reads `Self` from the `input`. `hash` and `settings` must be the same as used to build the function.
    pub fn read_with_hasher(input: &mut dyn io::Read, hash: S, settings: impl Into<Arc<Settings>>) -> Result<Self> {
        Self::new(BitBuffer::read(input)?, hash, settings)
    }
}

impl RecSplitEvaluator {
    /// Reads `Self` that uses the default hash family from the `input`.
    pub fn read(input: &mut dyn io::Read, settings: impl Into<Arc<Settings>>) -> Result<Self> {
        Self::read_with_hasher(input, Default::default(), settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bit_buffer::elias_delta_len;
    use crate::builder::RecSplitBuilder;
    use crate::builder::tests::test_mphf;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_keys(n: usize, seed: u64) -> Vec<u64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen()).collect()
    }

    fn build(keys: &[u64], leaf_size: usize, load_factor: usize) -> RecSplitEvaluator {
        let builder = RecSplitBuilder::with_params(leaf_size, load_factor).unwrap();
        builder.build_evaluator(builder.generate(keys).unwrap()).unwrap()
    }

    #[test]
    fn single_bucket() {
        let keys: Vec<u64> = (0..100).collect();
        let f = build(&keys, 8, 256);
        assert_eq!(f.bucket_count(), 1);
        assert_eq!(f.header_bits(), elias_delta_len(101));
        assert_eq!(f.len(), 100);
        test_mphf(&keys, |key| f.evaluate(key));
    }

    #[test]
    fn empty() {
        let f = build(&[], 8, 256);
        assert!(f.is_empty());
        assert_eq!(f.bits(), 1);
        assert_eq!(f.evaluate(&5u64), 0);
        assert_eq!(f.evaluate(&77u64), 0);
    }

    #[test]
    fn non_members_in_range() {
        let keys = random_keys(1000, 1);
        let f = build(&keys, 8, 64);
        for key in random_keys(10_000, 2) {
            assert!(f.evaluate(&key) < keys.len());
        }
        let f = build(&keys[..3], 2, 1);
        for key in 0..1000u64 {
            assert!(f.evaluate(&key) < 3);
        }
    }

    #[test]
    fn concurrent() {
        let keys = random_keys(5000, 3);
        let f = build(&keys, 6, 100);
        let expected: Vec<usize> = keys.iter().map(|k| f.evaluate(k)).collect();
        std::thread::scope(|scope| {
            for chunk in 0..4 {
                let (f, keys, expected) = (&f, &keys, &expected);
                scope.spawn(move || {
                    for i in (chunk..keys.len()).step_by(4) {
                        assert_eq!(f.evaluate(&keys[i]), expected[i]);
                    }
                });
            }
        });
    }

    #[test]
    fn access_stats() {
        let keys = random_keys(2000, 4);
        let f = build(&keys, 8, 256);
        let mut total = 0u64;
        for key in &keys {
            let mut nodes = 0u64;
            let value = f.evaluate_stats(key, &mut nodes);
            assert_eq!(value, f.evaluate(key));
            assert!(nodes >= 1);
            total += nodes;
        }
        assert!(total >= keys.len() as u64);
    }

    #[test]
    fn read_write() {
        let keys = random_keys(3000, 5);
        let f = build(&keys, 8, 128);
        let mut buff = Vec::new();
        f.write(&mut buff).unwrap();
        assert_eq!(buff.len(), f.write_bytes());
        let read = RecSplitEvaluator::read(&mut &buff[..], Settings::new(8, 128).unwrap()).unwrap();
        assert_eq!(read.len(), f.len());
        assert_eq!(read.bits(), f.bits());
        for key in &keys {
            assert_eq!(read.evaluate(key), f.evaluate(key));
        }
    }

    #[test]
    fn from_bytes() {
        let keys = random_keys(3000, 6);
        let f = build(&keys, 8, 256);
        let bytes = f.artifact().to_bytes();
        assert!(bytes.len() * 8 >= f.bits());
        let g = RecSplitEvaluator::new(BitBuffer::from_bytes(&bytes), BuildDefaultSeededHasher::default(), Settings::new(8, 256).unwrap()).unwrap();
        test_mphf(&keys, |key| g.evaluate(key));
        for key in &keys {
            assert_eq!(g.evaluate(key), f.evaluate(key));
        }
    }

    #[test]
    fn truncated() {
        let keys = random_keys(5000, 7);
        let f = build(&keys, 8, 256);
        let settings = Arc::clone(f.settings());
        let bytes = f.artifact().to_bytes();
        let cut = BitBuffer::from_bytes(&bytes[..100]);
        assert!(matches!(RecSplitEvaluator::new(cut, BuildDefaultSeededHasher::default(), Arc::clone(&settings)),
            Err(Error::Truncated { .. })));
        assert!(matches!(RecSplitEvaluator::new(BitBuffer::new(), BuildDefaultSeededHasher::default(), settings),
            Err(Error::Truncated { needed: 1, available: 0 })));
    }

    /// Returns the largest seed index stored in the subtree of given `size`.
    fn max_index(f: &RecSplitEvaluator, reader: &mut BitReader<'_>, size: usize, start: u64) -> u64 {
        if size < 2 { return 0; }
        let index = start + reader.read_golomb_rice(f.settings.golomb_rice_shift(size)) + 1;
        f.settings.split(size).part_sizes(size).map(|part| max_index(f, reader, part, index)).fold(index, u64::max)
    }

    #[test]
    fn indices_beyond_first_epoch() {
        // leaves of 16 keys need about 880 thousand seeds each, so some cross 2^18
        let keys = random_keys(128, 9);
        let builder = RecSplitBuilder::with_params(16, 128).unwrap().multi_threaded(false);
        let f = builder.build_evaluator(builder.generate(&keys).unwrap()).unwrap();
        assert_eq!(f.bucket_count(), 1);
        let mut reader = f.artifact().reader_at(f.header_bits());
        let max = max_index(&f, &mut reader, keys.len(), 0);
        assert_eq!(reader.position(), f.bits());
        assert!(universal_hash_index(max) > 0, "largest seed index {max} is in the first epoch");
        test_mphf(&keys, |key| f.evaluate(key));
    }

    #[test]
    fn size() {
        let keys = random_keys(1000, 8);
        let f = build(&keys, 8, 256);
        assert!(f.size_bytes() >= f.bits() / 8);
        assert!(f.bits_per_key() > 1.0 && f.bits_per_key() < 3.0);
    }
}
