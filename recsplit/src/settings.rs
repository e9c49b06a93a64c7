//! Configuration of RecSplit: split rule, Golomb-Rice parameters and size estimates.
//!
//! All tables are pure functions of `(leaf_size, load_factor)`, so a builder and an evaluator
//! that use equal [`Settings`] always agree on the encoding.
//! Probabilities are computed with addition, subtraction, multiplication, division and square root only,
//! which IEEE 754 rounds identically on every platform.

use crate::error::{Error, Result};
use crate::utils::{map64_to_64, mix64};

/// The largest supported leaf size. Leaves are checked for bijectivity with a 64-bit mask.
pub const MAX_LEAF_SIZE: usize = 24;

/// The largest supported number of parts of an equal split.
pub const MAX_FANOUT: usize = 16;

/// [`universal_hash_index`] changes every `2^SUPPLEMENTAL_HASH_SHIFT` indices.
pub const SUPPLEMENTAL_HASH_SHIFT: u32 = 18;

/// Tables never cover more sizes than this; larger nodes are computed on demand.
const MAX_TABLE_SIZE: usize = 1 << 16;

/// Up to this node size, success probabilities are exact products.
const EXACT_PROBABILITY_LIMIT: usize = 128;

/// The largest Golomb-Rice shift ever selected.
const MAX_SHIFT: u8 = 40;

/// Golden ratio scaled to 64 bits.
const PHI64: u64 = 0x9E37_79B9_7F4A_7C15;

/// Maps `hash` of a key and node `index` to `[0, range)`.
#[inline(always)]
pub fn supplemental_hash(hash: u64, index: u64, range: u64) -> u64 {
    map64_to_64(mix64(hash.wrapping_add(index.wrapping_mul(PHI64))), range)
}

/// Returns the epoch of given node `index`; the hash of a key is recomputed with seed `epoch + 1`
/// whenever the epoch changes along the path from a bucket root.
#[inline(always)]
pub const fn universal_hash_index(index: u64) -> u64 { index >> SUPPLEMENTAL_HASH_SHIFT }

/// How a node is divided between its children.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Split {
    /// The node has no children; its keys are mapped to distinct positions directly.
    Leaf,
    /// The node is divided into given number of parts of equal sizes.
    Equal(usize),
    /// The node is divided into two parts, the first of given size.
    Unequal(usize),
}

impl Split {
    /// Returns the signed form of the split: `k` for [`Split::Equal`], `-m` for [`Split::Unequal`] and `0` for [`Split::Leaf`].
    pub fn code(self) -> i64 {
        match self {
            Split::Leaf => 0,
            Split::Equal(k) => k as i64,
            Split::Unequal(m) => -(m as i64),
        }
    }

    /// Returns the number of children.
    #[inline] pub fn parts(self) -> usize {
        match self {
            Split::Leaf => 0,
            Split::Equal(k) => k,
            Split::Unequal(_) => 2,
        }
    }

    /// Returns sizes of the children of a node of given `size`, in encoding order.
    pub fn part_sizes(self, size: usize) -> impl Iterator<Item = usize> {
        (0..self.parts()).map(move |part| match self {
            Split::Leaf => 0,
            Split::Equal(k) => size / k,
            Split::Unequal(m) => if part == 0 { m } else { size - m },
        })
    }
}

/// Parameters of RecSplit and the tables derived from them.
#[derive(Clone, PartialEq, Debug)]
pub struct Settings {
    leaf_size: usize,
    load_factor: usize,
    /// Fanout of the nodes just above leaves.
    lower_fanout: usize,
    /// Fanout of the higher nodes.
    upper_fanout: usize,
    /// Sizes of complete subtrees: `leaf_size`, `leaf_size*lower_fanout`, then multiplied by `upper_fanout`.
    perfect_sizes: Box<[usize]>,
    splits: Box<[Split]>,
    shifts: Box<[u8]>,
    max_trials: Box<[u64]>,
    expected_bits: Box<[f64]>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::build(Self::DEFAULT_LEAF_SIZE, Self::DEFAULT_LOAD_FACTOR)
    }
}

impl Settings {
    pub const DEFAULT_LEAF_SIZE: usize = 8;
    pub const DEFAULT_LOAD_FACTOR: usize = 256;

    /// Returns settings for given `leaf_size` (in `1..=MAX_LEAF_SIZE`) and `load_factor` (positive).
    ///
    /// Smaller leaves make construction faster and the function larger;
    /// `load_factor` is the target number of keys in a bucket.
    pub fn new(leaf_size: usize, load_factor: usize) -> Result<Self> {
        if leaf_size == 0 || leaf_size > MAX_LEAF_SIZE {
            return Err(Error::InvalidSettings("leaf size must be in range 1..=24"));
        }
        if load_factor == 0 {
            return Err(Error::InvalidSettings("load factor must be positive"));
        }
        Ok(Self::build(leaf_size, load_factor))
    }

    fn build(leaf_size: usize, load_factor: usize) -> Self {
        let lower_fanout = ((35 * leaf_size + 50 + 99) / 100).max(2);
        let upper_fanout = ((21 * leaf_size + 90 + 99) / 100).max(2);
        let mut perfect_sizes = vec![leaf_size];
        let mut next = leaf_size.checked_mul(lower_fanout);
        while let Some(size) = next {
            perfect_sizes.push(size);
            next = size.checked_mul(upper_fanout);
        }
        let mut result = Self {
            leaf_size, load_factor, lower_fanout, upper_fanout,
            perfect_sizes: perfect_sizes.into_boxed_slice(),
            splits: Box::default(), shifts: Box::default(), max_trials: Box::default(), expected_bits: Box::default(),
        };
        let table_len = load_factor.saturating_mul(2).saturating_add(64).min(MAX_TABLE_SIZE) + 1;
        result.splits = (0..table_len).map(|size| result.compute_split(size)).collect();
        let probabilities: Vec<f64> = (0..table_len).map(|size| result.compute_probability(size)).collect();
        result.shifts = probabilities.iter().map(|p| Self::optimal_shift(*p).0).collect();
        result.max_trials = probabilities.iter().map(|p| Self::trials_bound(*p)).collect();
        let mut expected_bits: Vec<f64> = Vec::with_capacity(table_len);
        for size in 0..table_len {
            let bits = if size < 2 { 0.0 } else {
                Self::optimal_shift(probabilities[size]).1 +
                result.splits[size].part_sizes(size).map(|part| expected_bits[part]).sum::<f64>()
            };
            expected_bits.push(bits);
        }
        result.expected_bits = expected_bits.into_boxed_slice();
        result
    }

    /// Returns the maximum size of a leaf.
    #[inline] pub fn leaf_size(&self) -> usize { self.leaf_size }

    /// Returns the target average number of keys in a bucket.
    #[inline] pub fn load_factor(&self) -> usize { self.load_factor }

    /// Returns the number of buckets for given number of keys.
    #[inline] pub fn bucket_count(&self, key_count: usize) -> usize {
        key_count.div_ceil(self.load_factor).max(1)
    }

    /// Returns how a node of given `size` is divided.
    #[inline] pub fn split(&self, size: usize) -> Split {
        match self.splits.get(size) {
            Some(split) => *split,
            None => self.compute_split(size),
        }
    }

    /// Returns the Golomb-Rice parameter for seed offsets of nodes of given `size`.
    #[inline] pub fn golomb_rice_shift(&self, size: usize) -> u8 {
        match self.shifts.get(size) {
            Some(shift) => *shift,
            None => Self::optimal_shift(self.compute_probability(size)).0,
        }
    }

    /// Returns the number of seeds tried for a node of given `size` before construction gives up.
    #[inline] pub fn max_seed_trials(&self, size: usize) -> u64 {
        match self.max_trials.get(size) {
            Some(trials) => *trials,
            None => Self::trials_bound(self.compute_probability(size)),
        }
    }

    /// Returns the probability that a single seed correctly splits a node of given `size`.
    pub fn success_probability(&self, size: usize) -> f64 {
        self.compute_probability(size)
    }

    /// Returns the expected number of bits of the seeds of a node of given `size` and all its descendants.
    pub fn expected_bits(&self, size: usize) -> f64 {
        if let Some(bits) = self.expected_bits.get(size) { return *bits; }
        Self::optimal_shift(self.compute_probability(size)).1 +
            self.split(size).part_sizes(size).map(|part| self.expected_bits(part)).sum::<f64>()
    }

    /// Returns the estimated size (in bits) of the seeds of all buckets of a function of `key_count` keys.
    pub fn estimated_bits(&self, key_count: usize) -> usize {
        (key_count as f64 * self.expected_bits(self.load_factor) / self.load_factor as f64) as usize
    }

    fn compute_split(&self, size: usize) -> Split {
        if size <= self.leaf_size { return Split::Leaf; }
        let j = self.perfect_sizes.partition_point(|p| *p < size) - 1;
        let lower = self.perfect_sizes[j];
        if self.perfect_sizes.get(j + 1) == Some(&size) {
            return Split::Equal(if j == 0 { self.lower_fanout } else { self.upper_fanout });
        }
        if lower.checked_mul(2) == Some(size) { Split::Equal(2) } else { Split::Unequal(lower) }
    }

    fn compute_probability(&self, size: usize) -> f64 {
        if size < 2 { return 1.0; }
        match self.compute_split(size) {
            Split::Leaf => (1..=size).map(|i| i as f64 / size as f64).product(),
            Split::Equal(k) if size <= EXACT_PROBABILITY_LIMIT => {
                let part = size / k;
                let mut result = 1.0;
                for j in 0..k {
                    for i in 1..=part {
                        result *= (j * part + i) as f64 / (i * k) as f64;
                    }
                }
                result
            }
            Split::Equal(k) => {
                let base = k as f64 / (2.0 * std::f64::consts::PI * size as f64);
                let mut power = 1.0;
                for _ in 1..k { power *= base; }
                (k as f64 * power).sqrt()
            }
            Split::Unequal(first) => {
                let p = first as f64 / size as f64;
                let q = (size - first) as f64 / size as f64;
                if size <= EXACT_PROBABILITY_LIMIT {
                    let mut result = 1.0;
                    for i in 1..=first {
                        result *= (size - first + i) as f64 / i as f64 * p;
                    }
                    for _ in first..size { result *= q; }
                    result
                } else {
                    1.0 / (2.0 * std::f64::consts::PI * size as f64 * p * q).sqrt()
                }
            }
        }
    }

    /// Returns the shift minimizing the expected length of Golomb-Rice code of a geometric variable
    /// with success probability `p`, together with that length.
    fn optimal_shift(p: f64) -> (u8, f64) {
        let mut q = 1.0 - p;
        let mut best = (0, f64::INFINITY);
        for shift in 0..=MAX_SHIFT {
            if q < 1.0 {
                let cost = shift as f64 + 1.0 + q / (1.0 - q);
                if cost < best.1 { best = (shift, cost); }
            }
            q *= q;
        }
        best
    }

    fn trials_bound(p: f64) -> u64 {
        ((64.0 / p).ceil() as u64).saturating_add(1024)
    }
}
