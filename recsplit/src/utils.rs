//! Utility functions.

use binout::{AsIs, Serializer};
use bitm::ceiling_div;
pub use seedable_hash::map64_to_64;

/// Reads `number_of_bits` bits, rounded up to multiple of 64, from `input`.
pub fn read_bits<R: std::io::Read + ?Sized>(input: &mut R, number_of_bits: usize) -> std::io::Result<Box<[u64]>> {
    AsIs::read_n(input, ceiling_div(number_of_bits, 64))
}

/// Returns the number of bits needed to write `value`, i.e. `0` for `0` and `⌊log2 value⌋+1` otherwise.
#[inline(always)] pub const fn bit_width(value: u64) -> u8 { (u64::BITS - value.leading_zeros()) as u8 }

/// Returns `⌊log2 value⌋`. `value` must be positive.
#[inline(always)] pub const fn floor_log2(value: u64) -> u8 { (63 - value.leading_zeros()) as u8 }

/// Finalizer of *splitmix64*, a bijective mix of all 64 bits.
#[inline(always)]
pub const fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}
