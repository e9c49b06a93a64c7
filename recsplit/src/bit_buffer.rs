//! Bit-level storage with fixed-width, Golomb-Rice and Elias-Delta codes.
//!
//! Bit `i` of a stream is kept as bit `i % 64` of the 64-bit word `i / 64`.
//! [`BitBuffer`] owns the words and has a single cursor used for both writing and reading.
//! [`BitReader`] borrows the words and carries its own cursor,
//! so any number of readers can decode the same stream at once.

use std::io;

use binout::{AsIs, Serializer, VByte};
use bitm::{BitAccess, ceiling_div, n_lowest_bits};
use dyn_size_of::GetSize;

use crate::error::{Error, Result};
use crate::utils::{floor_log2, read_bits};

/// Maximum width (in bits) of a fixed-width field.
pub const MAX_WIDTH: u8 = 63;

/// Maximum quotient (length of the unary part) accepted by [`BitBuffer::write_golomb_rice`].
pub const MAX_UNARY: u64 = 1 << 24;

/// Maps signed `value` to non-negative integer (zig-zag): `0, -1, 1, -2, 2, …` to `0, 1, 2, 3, 4, …`.
#[inline(always)] pub const fn fold(value: i64) -> u64 { ((value << 1) ^ (value >> 63)) as u64 }

/// Inverse of [`fold`].
#[inline(always)] pub const fn unfold(value: u64) -> i64 { ((value >> 1) as i64) ^ -((value & 1) as i64) }

/// Returns the number of bits occupied by Elias-Delta code of `value`, which must be positive.
#[inline] pub const fn elias_delta_len(value: u64) -> usize {
    let n = floor_log2(value);
    let l = floor_log2(n as u64 + 1);
    2 * l as usize + 1 + n as usize
}

/// Returns the number of bits occupied by Golomb-Rice code of `value` with given `shift`.
#[inline] pub const fn golomb_rice_len(value: u64, shift: u8) -> usize {
    (value >> shift) as usize + 1 + shift as usize
}

/// Growable sequence of bits with a cursor.
///
/// Writes put bits at the cursor and move it forward; the length of the buffer
/// is the largest position ever written. Reads past the length panic.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct BitBuffer {
    words: Vec<u64>,
    len: usize,
    position: usize,
}

impl GetSize for BitBuffer {
    fn size_bytes_dyn(&self) -> usize { self.words.size_bytes_dyn() }
    fn size_bytes_content_dyn(&self) -> usize { self.words.size_bytes_content_dyn() }
    const USES_DYN_MEM: bool = true;
}

impl BitBuffer {
    /// Returns an empty buffer.
    pub fn new() -> Self { Self::default() }

    /// Returns an empty buffer with space reserved for `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        Self { words: Vec::with_capacity(ceiling_div(bits, 64)), len: 0, position: 0 }
    }

    /// Returns a buffer of `len` bits stored in `words`.
    ///
    /// Panics if `words` are too short to hold `len` bits.
    pub fn from_words(words: Vec<u64>, len: usize) -> Self {
        assert!(len <= words.len() * 64, "{} words cannot hold {} bits", words.len(), len);
        Self { words, len, position: 0 }
    }

    /// Returns a buffer with the content of `bytes`. Its length is `8 * bytes.len()`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let words = bytes.chunks(8).map(|chunk| {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            u64::from_le_bytes(word)
        }).collect();
        Self { words, len: bytes.len() * 8, position: 0 }
    }

    /// Returns the content as `ceil(len/8)` bytes. Padding bits of the last byte are zeros.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        result.truncate(ceiling_div(self.len, 8));
        result
    }

    /// Returns the words that store the content.
    #[inline] pub fn words(&self) -> &[u64] { &self.words }

    /// Returns the number of bits in the buffer.
    #[inline] pub fn len(&self) -> usize { self.len }

    /// Returns `true` if no bit has been written.
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Returns the cursor position (in bits).
    #[inline] pub fn position(&self) -> usize { self.position }

    /// Moves the cursor to the bit with index `position`.
    #[inline] pub fn seek(&mut self, position: usize) { self.position = position; }

    /// Returns a reader of the whole buffer, positioned at its first bit.
    #[inline] pub fn reader(&self) -> BitReader<'_> { self.reader_at(0) }

    /// Returns a reader of the whole buffer, positioned at `position`.
    #[inline] pub fn reader_at(&self, position: usize) -> BitReader<'_> {
        BitReader { words: &self.words, len: self.len, position }
    }

    #[inline] fn reserve_to(&mut self, end: usize) {
        let words_needed = ceiling_div(end, 64);
        if words_needed > self.words.len() { self.words.resize(words_needed, 0); }
        if end > self.len { self.len = end; }
    }

    /// Writes `width` (at most 63) lowest bits of `value` at the cursor, without validation.
    #[inline] fn put(&mut self, value: u64, width: u8) {
        if width == 0 { return; }
        let end = self.position + width as usize;
        self.reserve_to(end);
        self.words.set_bits(self.position, value, width);
        self.position = end;
    }

    fn put_ones(&mut self, mut count: u64) {
        while count > 0 {
            let chunk = count.min(MAX_WIDTH as u64) as u8;
            self.put(n_lowest_bits(chunk), chunk);
            count -= chunk as u64;
        }
    }

    /// Writes `value` on `width` bits.
    pub fn write_number(&mut self, value: u64, width: u8) -> Result<()> {
        if width > MAX_WIDTH {
            return Err(Error::InvalidCodeInput("fixed-width field cannot be wider than 63 bits"));
        }
        if value > n_lowest_bits(width) {
            return Err(Error::InvalidCodeInput("value does not fit in the given number of bits"));
        }
        self.put(value, width);
        Ok(())
    }

    /// Writes Golomb-Rice code of `value`: `value >> shift` ones, a zero, and `shift` lowest bits of `value`.
    pub fn write_golomb_rice(&mut self, value: u64, shift: u8) -> Result<()> {
        if shift > MAX_WIDTH {
            return Err(Error::InvalidCodeInput("Golomb-Rice shift cannot exceed 63"));
        }
        let quotient = value >> shift;
        if quotient > MAX_UNARY {
            return Err(Error::InvalidCodeInput("Golomb-Rice quotient is too large for the shift"));
        }
        self.put_ones(quotient);
        self.put(0, 1);
        self.put(value & n_lowest_bits(shift), shift);
        Ok(())
    }

    /// Writes Elias-Delta code of positive `value`.
    pub fn write_elias_delta(&mut self, value: u64) -> Result<()> {
        if value == 0 {
            return Err(Error::InvalidCodeInput("Elias-Delta code requires a positive value"));
        }
        let n = floor_log2(value);
        let n_plus_1 = n as u64 + 1;
        let l = floor_log2(n_plus_1);
        self.put(0, l);
        self.put(1, 1);
        self.put(n_plus_1 & n_lowest_bits(l), l);
        self.put(value & n_lowest_bits(n), n);
        Ok(())
    }

    /// Writes all bits of `other` at the cursor.
    pub fn append(&mut self, other: &BitBuffer) {
        let mut reader = other.reader();
        let mut remaining = other.len;
        while remaining > 0 {
            let chunk = remaining.min(MAX_WIDTH as usize) as u8;
            self.put(reader.read_number(chunk), chunk);
            remaining -= chunk as usize;
        }
    }

    #[inline] fn read_with<R>(&mut self, read: impl FnOnce(&mut BitReader<'_>) -> R) -> R {
        let (result, position) = {
            let mut reader = self.reader_at(self.position);
            (read(&mut reader), reader.position())
        };
        self.position = position;
        result
    }

    /// Reads `width`-bit number at the cursor.
    #[inline] pub fn read_number(&mut self, width: u8) -> u64 { self.read_with(|r| r.read_number(width)) }

    /// Reads Golomb-Rice code (written with given `shift`) at the cursor.
    #[inline] pub fn read_golomb_rice(&mut self, shift: u8) -> u64 { self.read_with(|r| r.read_golomb_rice(shift)) }

    /// Reads Elias-Delta code at the cursor.
    #[inline] pub fn read_elias_delta(&mut self) -> u64 { self.read_with(|r| r.read_elias_delta()) }

    /// Returns number of bytes which `write` will write.
    pub fn write_bytes(&self) -> usize {
        VByte::size(self.len) + AsIs::array_content_size(&self.words[..ceiling_div(self.len, 64)])
    }

    /// Writes `self` to the `output`.
    pub fn write(&self, output: &mut dyn io::Write) -> io::Result<()> {
        VByte::write(output, self.len)?;
        AsIs::write_all(output, self.words[..ceiling_div(self.len, 64)].iter())
    }

    /// Reads `Self` from the `input`.
    pub fn read(input: &mut dyn io::Read) -> io::Result<Self> {
        let len: usize = VByte::read(input)?;
        let words = read_bits(input, len)?;
        Ok(Self { words: words.into_vec(), len, position: 0 })
    }
}

/// Read-only view of a bit stream with its own cursor.
#[derive(Clone, Copy, Debug)]
pub struct BitReader<'a> {
    words: &'a [u64],
    len: usize,
    position: usize,
}

impl<'a> BitReader<'a> {
    /// Returns a reader of `len` bits stored in `words`, positioned at the first bit.
    pub fn new(words: &'a [u64], len: usize) -> Self {
        assert!(len <= words.len() * 64, "{} words cannot hold {} bits", words.len(), len);
        Self { words, len, position: 0 }
    }

    #[inline] pub fn position(&self) -> usize { self.position }

    #[inline] pub fn seek(&mut self, position: usize) { self.position = position; }

    #[inline] pub fn len(&self) -> usize { self.len }

    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Returns the number of bits between the cursor and the end of the stream.
    #[inline] pub fn remaining(&self) -> usize { self.len.saturating_sub(self.position) }

    #[cold]
    #[inline(never)]
    fn overrun(&self, at: usize) -> ! {
        panic!("read past the end of the bit stream (or malformed code) at position {} of {}", at, self.len)
    }

    /// Reads `width`-bit number, or returns [`None`] if fewer than `width` bits remain.
    #[inline] pub fn try_read_number(&mut self, width: u8) -> Option<u64> {
        debug_assert!(width <= MAX_WIDTH);
        if width == 0 { return Some(0); }
        if self.position + width as usize > self.len { return None; }
        let result = self.words.get_bits(self.position, width);
        self.position += width as usize;
        Some(result)
    }

    /// Counts and consumes bits equal to `bit` that precede the next opposite bit (which is consumed as well).
    fn try_read_run(&mut self, bit: bool) -> Option<u64> {
        let mut result = 0;
        loop {
            if self.position >= self.len { return None; }
            let available = self.remaining().min(MAX_WIDTH as usize) as u8;
            let chunk = self.words.get_bits(self.position, available);
            let run = if bit { chunk.trailing_ones() } else { chunk.trailing_zeros() };
            let run = (run as u8).min(available);
            if run < available {
                self.position += run as usize + 1;
                return Some(result + run as u64);
            }
            self.position += available as usize;
            result += available as u64;
        }
    }

    /// Reads Golomb-Rice code written with given `shift`, or returns [`None`] if the stream ends first.
    #[inline] pub fn try_read_golomb_rice(&mut self, shift: u8) -> Option<u64> {
        let quotient = self.try_read_run(true)?;
        Some((quotient << shift) | self.try_read_number(shift)?)
    }

    /// Reads Elias-Delta code, or returns [`None`] if the stream ends first or the code is malformed.
    pub fn try_read_elias_delta(&mut self) -> Option<u64> {
        let l = self.try_read_run(false)?;
        if l > 6 { return None; }
        let n_plus_1 = (1u64 << l) | self.try_read_number(l as u8)?;
        if n_plus_1 > 64 { return None; }
        let n = (n_plus_1 - 1) as u8;
        Some((1u64 << n) | self.try_read_number(n)?)
    }

    /// Reads `width`-bit number. `width` must not exceed 63.
    #[inline] pub fn read_number(&mut self, width: u8) -> u64 {
        let at = self.position;
        self.try_read_number(width).unwrap_or_else(|| self.overrun(at))
    }

    /// Reads Golomb-Rice code written with given `shift`.
    #[inline] pub fn read_golomb_rice(&mut self, shift: u8) -> u64 {
        let at = self.position;
        self.try_read_golomb_rice(shift).unwrap_or_else(|| self.overrun(at))
    }

    /// Reads Elias-Delta code.
    pub fn read_elias_delta(&mut self) -> u64 {
        let at = self.position;
        self.try_read_elias_delta().unwrap_or_else(|| self.overrun(at))
    }
}
