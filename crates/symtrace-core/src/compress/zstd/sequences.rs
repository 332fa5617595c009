//! Sequences section: decoding and execution (RFC 8878 §3.1.1.3.2, §3.1.1.4).

use once_cell::sync::Lazy;

use super::fse::{FseState, FseTable};
use super::CODEC;
use crate::compress::bits::BackwardBitReader;
use crate::compress::{copy_match, reserve, DecompressError, DecompressResult};

const LITERAL_LENGTH_MAX_ACCURACY: u8 = 9;
const MATCH_LENGTH_MAX_ACCURACY: u8 = 9;
const OFFSET_MAX_ACCURACY: u8 = 8;

const LITERAL_LENGTH_MAX_SYMBOL: usize = 35;
const MATCH_LENGTH_MAX_SYMBOL: usize = 52;
const OFFSET_MAX_SYMBOL: usize = 31;

/// `(baseline, extra bits)` for literal length codes 16 and up.
const LITERAL_LENGTH_CODES: [(u32, u8); 20] = [
    (16, 1),
    (18, 1),
    (20, 1),
    (22, 1),
    (24, 2),
    (28, 2),
    (32, 3),
    (40, 3),
    (48, 4),
    (64, 6),
    (128, 7),
    (256, 8),
    (512, 9),
    (1024, 10),
    (2048, 11),
    (4096, 12),
    (8192, 13),
    (16384, 14),
    (32768, 15),
    (65536, 16),
];

/// `(baseline, extra bits)` for match length codes 32 and up.
const MATCH_LENGTH_CODES: [(u32, u8); 21] = [
    (35, 1),
    (37, 1),
    (39, 1),
    (41, 1),
    (43, 2),
    (47, 2),
    (51, 3),
    (59, 3),
    (67, 4),
    (83, 4),
    (99, 5),
    (131, 7),
    (259, 8),
    (515, 9),
    (1027, 10),
    (2051, 11),
    (4099, 12),
    (8195, 13),
    (16387, 14),
    (32771, 15),
    (65539, 16),
];

const PREDEFINED_LITERAL_LENGTHS: [i16; 36] = [
    4, 3, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 3, 2, 1, 1, 1, 1, 1, -1, -1, -1, -1,
];

const PREDEFINED_MATCH_LENGTHS: [i16; 53] = [
    1, 4, 3, 2, 2, 2, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1,
    1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1, -1, -1,
];

const PREDEFINED_OFFSETS: [i16; 29] = [
    1, 1, 1, 1, 1, 1, 2, 2, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, -1, -1, -1, -1, -1,
];

struct PredefinedTables
{
    literal_lengths: FseTable,
    offsets: FseTable,
    match_lengths: FseTable,
}

static PREDEFINED: Lazy<DecompressResult<PredefinedTables>> = Lazy::new(|| {
    Ok(PredefinedTables {
        literal_lengths: FseTable::from_distribution(&PREDEFINED_LITERAL_LENGTHS, 6)?,
        offsets: FseTable::from_distribution(&PREDEFINED_OFFSETS, 5)?,
        match_lengths: FseTable::from_distribution(&PREDEFINED_MATCH_LENGTHS, 6)?,
    })
});

fn predefined() -> DecompressResult<&'static PredefinedTables>
{
    PREDEFINED.as_ref().map_err(Clone::clone)
}

/// One decoded sequence before offset resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sequence
{
    pub literal_length: u32,
    pub match_length: u32,
    /// Raw offset value: above 3 is a new offset plus 3, otherwise a repeat code.
    pub offset_value: u32,
}

/// Decoding tables that carry over between blocks of a frame for the
/// "repeat" compression mode.
#[derive(Debug, Default)]
pub(crate) struct SequenceTables
{
    literal_lengths: Option<FseTable>,
    offsets: Option<FseTable>,
    match_lengths: Option<FseTable>,
}

#[derive(Clone, Copy)]
enum Field
{
    LiteralLength,
    Offset,
    MatchLength,
}

impl Field
{
    fn limits(self) -> (u8, usize)
    {
        match self {
            Field::LiteralLength => (LITERAL_LENGTH_MAX_ACCURACY, LITERAL_LENGTH_MAX_SYMBOL),
            Field::Offset => (OFFSET_MAX_ACCURACY, OFFSET_MAX_SYMBOL),
            Field::MatchLength => (MATCH_LENGTH_MAX_ACCURACY, MATCH_LENGTH_MAX_SYMBOL),
        }
    }

    fn predefined(self) -> DecompressResult<&'static FseTable>
    {
        let tables = predefined()?;
        Ok(match self {
            Field::LiteralLength => &tables.literal_lengths,
            Field::Offset => &tables.offsets,
            Field::MatchLength => &tables.match_lengths,
        })
    }
}

impl SequenceTables
{
    fn slot(&mut self, field: Field) -> &mut Option<FseTable>
    {
        match field {
            Field::LiteralLength => &mut self.literal_lengths,
            Field::Offset => &mut self.offsets,
            Field::MatchLength => &mut self.match_lengths,
        }
    }

    /// Install the table selected by a 2-bit mode, reading its description
    /// from `input`. Returns the bytes consumed.
    fn select(&mut self, field: Field, mode: u8, input: &[u8]) -> DecompressResult<usize>
    {
        let (max_accuracy, max_symbol) = field.limits();
        let (table, used) = match mode {
            0 => (field.predefined()?.clone(), 0),
            1 => {
                let &symbol = input.first().ok_or(DecompressError::truncated(CODEC))?;
                if usize::from(symbol) > max_symbol {
                    return Err(DecompressError::malformed(CODEC, "RLE sequence symbol out of range"));
                }
                (FseTable::rle(symbol), 1)
            }
            2 => FseTable::read(input, max_accuracy, max_symbol)?,
            _ => {
                if self.slot(field).is_none() {
                    return Err(DecompressError::malformed(CODEC, "repeat mode without a previous table"));
                }
                return Ok(0);
            }
        };
        *self.slot(field) = Some(table);
        Ok(used)
    }
}

fn byte_at(section: &[u8], index: usize) -> DecompressResult<usize>
{
    section
        .get(index)
        .map(|&b| usize::from(b))
        .ok_or(DecompressError::truncated(CODEC))
}

/// Decode the sequences section that follows the literals of a block.
pub(crate) fn decode_sequences(section: &[u8], tables: &mut SequenceTables) -> DecompressResult<Vec<Sequence>>
{
    let first = byte_at(section, 0)?;
    let (count, mut offset) = match first {
        0 => {
            if section.len() != 1 {
                return Err(DecompressError::malformed(CODEC, "data after an empty sequences section"));
            }
            return Ok(Vec::new());
        }
        1..=127 => (first, 1),
        128..=254 => (((first - 128) << 8) + byte_at(section, 1)?, 2),
        _ => (byte_at(section, 1)? + (byte_at(section, 2)? << 8) + 0x7f00, 3),
    };

    let modes = byte_at(section, offset)? as u8;
    offset += 1;
    if modes & 3 != 0 {
        return Err(DecompressError::malformed(CODEC, "reserved bits set in sequence modes"));
    }
    for (field, shift) in [(Field::LiteralLength, 6), (Field::Offset, 4), (Field::MatchLength, 2)] {
        offset += tables.select(field, (modes >> shift) & 3, &section[offset..])?;
    }

    let (Some(literal_lengths), Some(offsets), Some(match_lengths)) =
        (&tables.literal_lengths, &tables.offsets, &tables.match_lengths)
    else {
        return Err(DecompressError::malformed(CODEC, "sequence tables missing"));
    };

    let mut reader = BackwardBitReader::new(&section[offset..], CODEC)?;
    let mut literal_length_state = FseState::new(literal_lengths, &mut reader)?;
    let mut offset_state = FseState::new(offsets, &mut reader)?;
    let mut match_length_state = FseState::new(match_lengths, &mut reader)?;

    let mut sequences = Vec::with_capacity(count);
    for index in 0..count {
        let offset_code = offset_state.symbol();
        let match_length_code = match_length_state.symbol();
        let literal_length_code = literal_length_state.symbol();

        let offset_value = if offset_code == 0 {
            1
        } else {
            (1u32 << offset_code) + reader.read(u32::from(offset_code))?
        };

        let match_length = if match_length_code < 32 {
            u32::from(match_length_code) + 3
        } else {
            let (base, bits) = MATCH_LENGTH_CODES[usize::from(match_length_code) - 32];
            base + reader.read(u32::from(bits))?
        };

        let literal_length = if literal_length_code < 16 {
            u32::from(literal_length_code)
        } else {
            let (base, bits) = LITERAL_LENGTH_CODES[usize::from(literal_length_code) - 16];
            base + reader.read(u32::from(bits))?
        };

        sequences.push(Sequence {
            literal_length,
            match_length,
            offset_value,
        });

        if index + 1 < count {
            literal_length_state.update(&mut reader)?;
            match_length_state.update(&mut reader)?;
            offset_state.update(&mut reader)?;
        }
    }

    if !reader.is_finished() {
        return Err(DecompressError::malformed(CODEC, "sequence bitstream not fully consumed"));
    }
    Ok(sequences)
}

/// Most recent match offsets, newest first. Persists across blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RepeatOffsets([usize; 3]);

impl Default for RepeatOffsets
{
    fn default() -> Self
    {
        Self([1, 4, 8])
    }
}

impl RepeatOffsets
{
    /// Turn a raw offset value into a distance, updating the history.
    fn resolve(&mut self, offset_value: u32, literal_length: u32) -> DecompressResult<usize>
    {
        let [first, second, third] = self.0;
        if offset_value > 3 {
            let offset = offset_value as usize - 3;
            self.0 = [offset, first, second];
            return Ok(offset);
        }

        let index = offset_value as usize - 1 + usize::from(literal_length == 0);
        match index {
            0 => Ok(first),
            1 => {
                self.0 = [second, first, third];
                Ok(second)
            }
            2 => {
                self.0 = [third, first, second];
                Ok(third)
            }
            _ => {
                let offset = first - 1;
                if offset == 0 {
                    return Err(DecompressError::malformed(CODEC, "repeat offset underflow"));
                }
                self.0 = [offset, first, second];
                Ok(offset)
            }
        }
    }
}

/// Replay `sequences` against `literals`, appending to `out`.
///
/// Matches may reach back to `frame_start` but not before it. Output is
/// capped at `limit` bytes in total.
pub(crate) fn execute_sequences(
    sequences: &[Sequence],
    literals: &[u8],
    repeat: &mut RepeatOffsets,
    out: &mut Vec<u8>,
    frame_start: usize,
    limit: usize,
) -> DecompressResult<()>
{
    let mut cursor = 0usize;
    for sequence in sequences {
        let literal_length = sequence.literal_length as usize;
        let match_length = sequence.match_length as usize;
        let run = literals
            .get(cursor..cursor + literal_length)
            .ok_or(DecompressError::malformed(CODEC, "sequence overruns literals"))?;
        cursor += literal_length;

        let distance = repeat.resolve(sequence.offset_value, sequence.literal_length)?;
        if literal_length + match_length > limit - out.len() {
            return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
        }
        reserve(CODEC, out, literal_length + match_length)?;
        out.extend_from_slice(run);

        if distance > out.len() - frame_start {
            return Err(DecompressError::malformed(CODEC, "match offset before frame start"));
        }
        copy_match(out, distance, match_length);
    }

    let rest = &literals[cursor..];
    if rest.len() > limit - out.len() {
        return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
    }
    reserve(CODEC, out, rest.len())?;
    out.extend_from_slice(rest);
    Ok(())
}
