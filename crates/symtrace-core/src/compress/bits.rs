//! # Bitstream Readers
//!
//! Two cursor disciplines share one accumulator design:
//!
//! - [`ForwardBitReader`] consumes bits least-significant first, the way
//!   DEFLATE and Zstandard table descriptions are packed.
//! - [`BackwardBitReader`] starts at the last byte of a buffer and moves toward
//!   the first, the way Zstandard's FSE and Huffman streams are laid out. The
//!   final byte carries a `1` marker bit above the padding.
//!
//! Both refill in 4-byte chunks while enough input remains and fall back to
//! single bytes at the tail. Neither allocates.

use super::{Codec, DecompressError, DecompressResult};

#[inline]
fn low_bits(value: u64, count: u32) -> u64
{
    if count >= 64 {
        value
    } else {
        value & ((1u64 << count) - 1)
    }
}

#[inline]
fn le32(bytes: &[u8]) -> u32
{
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Least-significant-bit-first reader over a byte slice.
#[derive(Debug, Clone)]
pub struct ForwardBitReader<'a>
{
    data: &'a [u8],
    pos: usize,
    value: u64,
    bits: u32,
    codec: Codec,
}

impl<'a> ForwardBitReader<'a>
{
    /// Start reading at the first byte of `data`.
    pub fn new(data: &'a [u8], codec: Codec) -> Self
    {
        Self {
            data,
            pos: 0,
            value: 0,
            bits: 0,
            codec,
        }
    }

    /// Make sure at least `min_bits` (at most 32) bits are buffered.
    ///
    /// ## Errors
    ///
    /// Returns [`DecompressError::Truncated`] if the input runs out first.
    pub fn fetch(&mut self, min_bits: u32) -> DecompressResult<()>
    {
        debug_assert!(min_bits <= 32);
        while self.bits < min_bits {
            if !self.load() {
                return Err(DecompressError::truncated(self.codec));
            }
        }
        Ok(())
    }

    /// Buffer as many bits as convenient without failing at end of input.
    pub fn refill(&mut self)
    {
        while self.bits <= 32 && self.load() {}
    }

    fn load(&mut self) -> bool
    {
        if self.bits <= 32 && self.pos + 4 <= self.data.len() {
            self.value |= u64::from(le32(&self.data[self.pos..])) << self.bits;
            self.pos += 4;
            self.bits += 32;
            true
        } else if self.bits <= 56 && self.pos < self.data.len() {
            self.value |= u64::from(self.data[self.pos]) << self.bits;
            self.pos += 1;
            self.bits += 8;
            true
        } else {
            false
        }
    }

    /// Look at the next `count` bits without consuming them.
    ///
    /// Bits past the end of the input read as zero.
    #[inline]
    pub fn peek(&self, count: u32) -> u32
    {
        low_bits(self.value, count) as u32
    }

    /// Drop `count` buffered bits.
    ///
    /// ## Errors
    ///
    /// Fails if fewer than `count` bits are buffered.
    #[inline]
    pub fn consume(&mut self, count: u32) -> DecompressResult<()>
    {
        if count > self.bits {
            return Err(DecompressError::truncated(self.codec));
        }
        self.value >>= count;
        self.bits -= count;
        Ok(())
    }

    /// Read `count` bits (at most 32) as an integer.
    pub fn read(&mut self, count: u32) -> DecompressResult<u32>
    {
        if count == 0 {
            return Ok(0);
        }
        self.fetch(count)?;
        let value = self.peek(count);
        self.consume(count)?;
        Ok(value)
    }

    /// Number of buffered bits.
    pub fn available(&self) -> u32
    {
        self.bits
    }

    /// Total bits consumed since the start of the input.
    pub fn bits_consumed(&self) -> usize
    {
        self.pos * 8 - self.bits as usize
    }

    /// Discard bits up to the next byte boundary and hand buffered whole
    /// bytes back to the input.
    ///
    /// Returns the byte offset of the next unread byte.
    pub fn byte_align(&mut self) -> usize
    {
        let partial = self.bits % 8;
        self.value >>= partial;
        self.bits -= partial;
        self.pos -= (self.bits / 8) as usize;
        self.value = 0;
        self.bits = 0;
        self.pos
    }

    /// Take `count` whole bytes after a [`byte_align`](Self::byte_align).
    pub fn take_bytes(&mut self, count: usize) -> DecompressResult<&'a [u8]>
    {
        debug_assert_eq!(self.bits, 0);
        let end = self.pos.checked_add(count).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(DecompressError::truncated(self.codec));
        };
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    /// Whether every input byte has been loaded and consumed.
    pub fn is_at_end(&self) -> bool
    {
        self.bits == 0 && self.pos == self.data.len()
    }
}

/// Reader that consumes a buffer from its last byte toward its first.
///
/// The most significant bit of the final byte that is set marks where the
/// stream begins; everything above it is padding.
#[derive(Debug, Clone)]
pub struct BackwardBitReader<'a>
{
    data: &'a [u8],
    pos: usize,
    value: u64,
    bits: u32,
    overrun: u32,
    codec: Codec,
}

impl<'a> BackwardBitReader<'a>
{
    /// Position the reader on the end marker of `data`.
    ///
    /// ## Errors
    ///
    /// An empty buffer is truncated; a final byte of zero has no end marker
    /// and is malformed.
    pub fn new(data: &'a [u8], codec: Codec) -> DecompressResult<Self>
    {
        let Some(&last) = data.last() else {
            return Err(DecompressError::truncated(codec));
        };
        if last == 0 {
            return Err(DecompressError::malformed(codec, "bitstream has no end marker"));
        }

        let mut reader = Self {
            data,
            pos: data.len(),
            value: 0,
            bits: 0,
            overrun: 0,
            codec,
        };
        reader.refill();
        reader.bits -= last.leading_zeros() + 1;
        Ok(reader)
    }

    fn refill(&mut self)
    {
        if self.bits <= 32 && self.pos >= 4 {
            self.pos -= 4;
            self.value = (self.value << 32) | u64::from(le32(&self.data[self.pos..]));
            self.bits += 32;
        }
        while self.bits <= 56 && self.pos > 0 {
            self.pos -= 1;
            self.value = (self.value << 8) | u64::from(self.data[self.pos]);
            self.bits += 8;
        }
    }

    /// Read `count` bits (at most 32).
    ///
    /// ## Errors
    ///
    /// Fails if the stream holds fewer than `count` bits.
    pub fn read(&mut self, count: u32) -> DecompressResult<u32>
    {
        if count == 0 {
            return Ok(0);
        }
        if self.bits < count {
            self.refill();
            if self.bits < count {
                return Err(DecompressError::truncated(self.codec));
            }
        }
        let value = low_bits(self.value >> (self.bits - count), count);
        self.bits -= count;
        Ok(value as u32)
    }

    /// Read `count` bits, supplying zeros once the start of the buffer is
    /// passed.
    ///
    /// Missing bits are recorded; see [`overflowed`](Self::overflowed).
    pub fn read_padded(&mut self, count: u32) -> u32
    {
        if count == 0 {
            return 0;
        }
        if self.bits < count {
            self.refill();
        }
        if self.bits >= count {
            let value = low_bits(self.value >> (self.bits - count), count);
            self.bits -= count;
            return value as u32;
        }
        let missing = count - self.bits;
        let value = low_bits(self.value, self.bits) << missing;
        self.overrun += missing;
        self.bits = 0;
        value as u32
    }

    /// Look at the next `count` bits (at most 32), zero-padded past the start.
    #[inline]
    pub fn peek(&mut self, count: u32) -> u32
    {
        if self.bits < count {
            self.refill();
        }
        if self.bits >= count {
            low_bits(self.value >> (self.bits - count), count) as u32
        } else {
            (low_bits(self.value, self.bits) << (count - self.bits)) as u32
        }
    }

    /// Drop `count` bits previously seen with [`peek`](Self::peek).
    ///
    /// ## Errors
    ///
    /// Fails if fewer than `count` bits remain.
    #[inline]
    pub fn consume(&mut self, count: u32) -> DecompressResult<()>
    {
        if count > self.bits {
            self.refill();
            if count > self.bits {
                return Err(DecompressError::truncated(self.codec));
            }
        }
        self.bits -= count;
        Ok(())
    }

    /// Whether more bits were requested than the stream holds.
    pub fn overflowed(&self) -> bool
    {
        self.overrun > 0
    }

    /// Whether every bit of the stream has been consumed.
    pub fn is_finished(&self) -> bool
    {
        self.pos == 0 && self.bits == 0
    }
}
