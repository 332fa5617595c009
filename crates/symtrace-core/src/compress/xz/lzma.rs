//! LZMA decoding of one LZMA2 chunk.
//!
//! The decoder state (probabilities, the 12-state machine and the four
//! repeat distances) survives between chunks unless a chunk asks for a
//! reset. The dictionary is the tail of the output buffer from the last
//! dictionary reset onward.

use super::rangecoder::{RangeDecoder, PROB_INIT};
use crate::compress::{copy_match, Codec, DecompressError, DecompressResult};

const CODEC: Codec = Codec::Lzma2;

const STATES: usize = 12;
const POS_STATES_MAX: usize = 1 << 4;
const LEN_TO_POS_STATES: usize = 4;
const DIST_SLOTS: usize = 64;
const DIST_MODEL_START: u32 = 4;
const DIST_MODEL_END: u32 = 14;
const FULL_DISTANCES: usize = 1 << (DIST_MODEL_END / 2);
const ALIGN_BITS: u32 = 4;
const LITERAL_CODER_SIZE: usize = 0x300;
const MATCH_LEN_MIN: usize = 2;

/// Literal and position context widths from an LZMA properties byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Properties
{
    pub lc: u32,
    pub lp: u32,
    pub pb: u32,
}

impl Properties
{
    /// Decode `(pb * 5 + lp) * 9 + lc`; LZMA2 also requires `lc + lp <= 4`.
    pub(crate) fn from_byte(byte: u8) -> DecompressResult<Self>
    {
        let value = u32::from(byte);
        if value >= 9 * 5 * 5 {
            return Err(DecompressError::malformed(CODEC, "LZMA properties byte out of range"));
        }
        let props = Self {
            lc: value % 9,
            lp: (value / 9) % 5,
            pb: value / 45,
        };
        if props.lc + props.lp > 4 {
            return Err(DecompressError::malformed(CODEC, "LZMA2 requires lc + lp <= 4"));
        }
        Ok(props)
    }
}

#[derive(Debug, Clone)]
struct LengthDecoder
{
    choice: u16,
    choice2: u16,
    low: [[u16; 8]; POS_STATES_MAX],
    mid: [[u16; 8]; POS_STATES_MAX],
    high: [u16; 256],
}

impl Default for LengthDecoder
{
    fn default() -> Self
    {
        Self {
            choice: PROB_INIT,
            choice2: PROB_INIT,
            low: [[PROB_INIT; 8]; POS_STATES_MAX],
            mid: [[PROB_INIT; 8]; POS_STATES_MAX],
            high: [PROB_INIT; 256],
        }
    }
}

impl LengthDecoder
{
    /// Match length minus [`MATCH_LEN_MIN`].
    fn decode(&mut self, rc: &mut RangeDecoder<'_>, pos_state: usize) -> DecompressResult<usize>
    {
        if rc.bit(&mut self.choice)? == 0 {
            return Ok(rc.tree(&mut self.low[pos_state], 3)? as usize);
        }
        if rc.bit(&mut self.choice2)? == 0 {
            return Ok(8 + rc.tree(&mut self.mid[pos_state], 3)? as usize);
        }
        Ok(16 + rc.tree(&mut self.high, 8)? as usize)
    }
}

/// Adaptive model and history carried across LZMA2 chunks.
#[derive(Debug, Clone)]
pub(crate) struct LzmaDecoder
{
    props: Properties,
    state: usize,
    reps: [usize; 4],
    literals: Vec<u16>,
    is_match: [[u16; POS_STATES_MAX]; STATES],
    is_rep: [u16; STATES],
    is_rep_g0: [u16; STATES],
    is_rep_g1: [u16; STATES],
    is_rep_g2: [u16; STATES],
    is_rep0_long: [[u16; POS_STATES_MAX]; STATES],
    dist_slot: [[u16; DIST_SLOTS]; LEN_TO_POS_STATES],
    dist_special: [u16; 1 + FULL_DISTANCES - DIST_MODEL_END as usize],
    align: [u16; 1 << ALIGN_BITS],
    match_len: LengthDecoder,
    rep_len: LengthDecoder,
}

impl LzmaDecoder
{
    pub(crate) fn new(props: Properties) -> Self
    {
        Self {
            props,
            state: 0,
            reps: [0; 4],
            literals: vec![PROB_INIT; LITERAL_CODER_SIZE << (props.lc + props.lp)],
            is_match: [[PROB_INIT; POS_STATES_MAX]; STATES],
            is_rep: [PROB_INIT; STATES],
            is_rep_g0: [PROB_INIT; STATES],
            is_rep_g1: [PROB_INIT; STATES],
            is_rep_g2: [PROB_INIT; STATES],
            is_rep0_long: [[PROB_INIT; POS_STATES_MAX]; STATES],
            dist_slot: [[PROB_INIT; DIST_SLOTS]; LEN_TO_POS_STATES],
            dist_special: [PROB_INIT; 1 + FULL_DISTANCES - DIST_MODEL_END as usize],
            align: [PROB_INIT; 1 << ALIGN_BITS],
            match_len: LengthDecoder::default(),
            rep_len: LengthDecoder::default(),
        }
    }

    /// Reset probabilities, state and distances, keeping the properties.
    pub(crate) fn reset(&mut self)
    {
        *self = Self::new(self.props);
    }

    fn decode_literal(&mut self, rc: &mut RangeDecoder<'_>, out: &[u8], dict_pos: usize) -> DecompressResult<u8>
    {
        let Properties { lc, lp, .. } = self.props;
        let prev = if dict_pos > 0 { out[out.len() - 1] } else { 0 };
        let context = ((dict_pos & ((1 << lp) - 1)) << lc) + (usize::from(prev) >> (8 - lc));
        let probs = &mut self.literals[context * LITERAL_CODER_SIZE..(context + 1) * LITERAL_CODER_SIZE];

        let mut symbol = 1usize;
        if self.state >= 7 {
            let rep0 = self.reps[0];
            let mut match_byte = if dict_pos > rep0 {
                usize::from(out[out.len() - rep0 - 1])
            } else {
                0
            };
            while symbol < 0x100 {
                let match_bit = (match_byte >> 7) & 1;
                match_byte <<= 1;
                let bit = rc.bit(&mut probs[((1 + match_bit) << 8) + symbol])? as usize;
                symbol = (symbol << 1) | bit;
                if match_bit != bit {
                    break;
                }
            }
        }
        while symbol < 0x100 {
            symbol = (symbol << 1) | rc.bit(&mut probs[symbol])? as usize;
        }
        Ok((symbol - 0x100) as u8)
    }

    /// Zero-based match distance for a match of length `len` (minus the minimum).
    fn decode_distance(&mut self, rc: &mut RangeDecoder<'_>, len: usize) -> DecompressResult<usize>
    {
        let len_state = len.min(LEN_TO_POS_STATES - 1);
        let slot = rc.tree(&mut self.dist_slot[len_state], 6)?;
        if slot < DIST_MODEL_START {
            return Ok(slot as usize);
        }

        let direct_bits = (slot >> 1) - 1;
        let mut distance = (2 | (slot & 1)) << direct_bits;
        if slot < DIST_MODEL_END {
            let base = (distance - slot) as usize;
            distance += rc.reverse_tree(&mut self.dist_special[base..], direct_bits)?;
        } else {
            distance += rc.direct(direct_bits - ALIGN_BITS)? << ALIGN_BITS;
            distance += rc.reverse_tree(&mut self.align, ALIGN_BITS)?;
        }
        Ok(distance as usize)
    }

    /// Decode one chunk of `size` bytes, appending to `out`.
    ///
    /// `dict_start` is the output offset of the last dictionary reset;
    /// matches may not reach before it.
    pub(crate) fn decode_chunk(
        &mut self,
        rc: &mut RangeDecoder<'_>,
        out: &mut Vec<u8>,
        dict_start: usize,
        size: usize,
    ) -> DecompressResult<()>
    {
        let end = out.len() + size;
        let pos_mask = (1usize << self.props.pb) - 1;

        while out.len() < end {
            let dict_pos = out.len() - dict_start;
            let pos_state = dict_pos & pos_mask;

            if rc.bit(&mut self.is_match[self.state][pos_state])? == 0 {
                let byte = self.decode_literal(rc, out, dict_pos)?;
                out.push(byte);
                self.state = match self.state {
                    0..=3 => 0,
                    4..=9 => self.state - 3,
                    _ => self.state - 6,
                };
                continue;
            }

            let len = if rc.bit(&mut self.is_rep[self.state])? == 0 {
                let len = self.match_len.decode(rc, pos_state)?;
                let distance = self.decode_distance(rc, len)?;
                if distance == u32::MAX as usize {
                    return Err(DecompressError::malformed(CODEC, "end marker inside an LZMA2 chunk"));
                }
                self.reps = [distance, self.reps[0], self.reps[1], self.reps[2]];
                self.state = if self.state < 7 { 7 } else { 10 };
                len
            } else {
                if rc.bit(&mut self.is_rep_g0[self.state])? == 0 {
                    if rc.bit(&mut self.is_rep0_long[self.state][pos_state])? == 0 {
                        if dict_pos <= self.reps[0] {
                            return Err(DecompressError::malformed(CODEC, "match distance before dictionary start"));
                        }
                        self.state = if self.state < 7 { 9 } else { 11 };
                        copy_match(out, self.reps[0] + 1, 1);
                        continue;
                    }
                } else {
                    let distance = if rc.bit(&mut self.is_rep_g1[self.state])? == 0 {
                        self.reps[1]
                    } else if rc.bit(&mut self.is_rep_g2[self.state])? == 0 {
                        let distance = self.reps[2];
                        self.reps[2] = self.reps[1];
                        distance
                    } else {
                        let distance = self.reps[3];
                        self.reps[3] = self.reps[2];
                        self.reps[2] = self.reps[1];
                        distance
                    };
                    self.reps[1] = self.reps[0];
                    self.reps[0] = distance;
                }
                self.state = if self.state < 7 { 8 } else { 11 };
                self.rep_len.decode(rc, pos_state)?
            };

            let length = len + MATCH_LEN_MIN;
            if dict_pos <= self.reps[0] {
                return Err(DecompressError::malformed(CODEC, "match distance before dictionary start"));
            }
            if length > end - out.len() {
                return Err(DecompressError::malformed(CODEC, "match runs past the chunk"));
            }
            copy_match(out, self.reps[0] + 1, length);
        }
        Ok(())
    }
}
