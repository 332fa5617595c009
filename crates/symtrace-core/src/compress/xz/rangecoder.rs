//! LZMA range decoder.

use crate::compress::{Codec, DecompressError, DecompressResult};

const CODEC: Codec = Codec::Lzma2;

const TOP: u32 = 1 << 24;
const MODEL_BITS: u32 = 11;
const MOVE_BITS: u32 = 5;

/// Initial value of every adaptive probability.
pub(crate) const PROB_INIT: u16 = 1 << (MODEL_BITS - 1);

/// Range decoder over one LZMA2 chunk's compressed bytes.
#[derive(Debug)]
pub(crate) struct RangeDecoder<'a>
{
    data: &'a [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'a> RangeDecoder<'a>
{
    /// Consume the five initialization bytes.
    pub(crate) fn new(data: &'a [u8]) -> DecompressResult<Self>
    {
        if data.len() < 5 {
            return Err(DecompressError::truncated(CODEC));
        }
        if data[0] != 0 {
            return Err(DecompressError::malformed(CODEC, "range coder must start with a zero byte"));
        }
        let code = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        if code == u32::MAX {
            return Err(DecompressError::malformed(CODEC, "range coder initial code out of range"));
        }
        Ok(Self {
            data,
            pos: 5,
            range: u32::MAX,
            code,
        })
    }

    #[inline]
    fn normalize(&mut self) -> DecompressResult<()>
    {
        if self.range < TOP {
            // The packed size comes from the chunk header.
            let &byte = self
                .data
                .get(self.pos)
                .ok_or(DecompressError::malformed(CODEC, "LZMA chunk data ends before its unpacked size"))?;
            self.pos += 1;
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(byte);
        }
        Ok(())
    }

    /// Decode one bit with adaptive probability `prob`.
    #[inline]
    pub(crate) fn bit(&mut self, prob: &mut u16) -> DecompressResult<u32>
    {
        let bound = (self.range >> MODEL_BITS) * u32::from(*prob);
        let bit = if self.code < bound {
            self.range = bound;
            *prob += ((1 << MODEL_BITS) - *prob) >> MOVE_BITS;
            0
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            1
        };
        self.normalize()?;
        Ok(bit)
    }

    /// Decode `count` bits MSB first through a binary tree of probabilities.
    pub(crate) fn tree(&mut self, probs: &mut [u16], count: u32) -> DecompressResult<u32>
    {
        let mut symbol = 1usize;
        for _ in 0..count {
            symbol = (symbol << 1) | self.bit(&mut probs[symbol])? as usize;
        }
        Ok((symbol - (1 << count)) as u32)
    }

    /// Decode `count` bits LSB first through a binary tree of probabilities.
    pub(crate) fn reverse_tree(&mut self, probs: &mut [u16], count: u32) -> DecompressResult<u32>
    {
        let mut index = 1usize;
        let mut symbol = 0u32;
        for i in 0..count {
            let bit = self.bit(&mut probs[index])?;
            index = (index << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }

    /// Decode `count` bits with fixed probability one half.
    pub(crate) fn direct(&mut self, count: u32) -> DecompressResult<u32>
    {
        let mut value = 0u32;
        for _ in 0..count {
            self.range >>= 1;
            let bit = if self.code >= self.range {
                self.code -= self.range;
                1
            } else {
                0
            };
            value = (value << 1) | bit;
            self.normalize()?;
        }
        Ok(value)
    }

    /// Check that the chunk ended cleanly: every byte used and the code drained.
    pub(crate) fn finish(&self) -> DecompressResult<()>
    {
        if self.pos != self.data.len() {
            return Err(DecompressError::malformed(CODEC, "LZMA chunk has unused compressed bytes"));
        }
        if self.code != 0 {
            return Err(DecompressError::malformed(CODEC, "LZMA chunk ended with a nonzero range code"));
        }
        Ok(())
    }
}
