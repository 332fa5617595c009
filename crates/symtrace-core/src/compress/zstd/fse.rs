//! Finite State Entropy tables (RFC 8878 §4.1).

use super::CODEC;
use crate::compress::bits::{BackwardBitReader, ForwardBitReader};
use crate::compress::{DecompressError, DecompressResult};

/// One decoding state: the symbol it emits and how to reach the next state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FseEntry
{
    pub symbol: u8,
    pub bits: u8,
    pub base: u16,
}

/// Decoding table with `1 << accuracy_log` states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FseTable
{
    accuracy_log: u8,
    entries: Vec<FseEntry>,
}

impl FseTable
{
    /// A table that always yields `symbol` and never reads bits.
    pub(crate) fn rle(symbol: u8) -> Self
    {
        Self {
            accuracy_log: 0,
            entries: vec![FseEntry {
                symbol,
                bits: 0,
                base: 0,
            }],
        }
    }

    /// Build the decoding table for a normalized distribution.
    ///
    /// `-1` marks a "less than one" probability; those symbols take one
    /// state each, allocated from the top of the table.
    pub(crate) fn from_distribution(distribution: &[i16], accuracy_log: u8) -> DecompressResult<Self>
    {
        let size = 1usize << accuracy_log;
        let total: usize = distribution.iter().map(|&p| p.unsigned_abs() as usize).sum();
        if total != size || distribution.len() > 256 {
            return Err(DecompressError::malformed(CODEC, "FSE distribution does not fill its table"));
        }

        let mut entries = vec![FseEntry::default(); size];
        let mut next_state = vec![0u16; distribution.len()];
        let mut high = size;
        for (symbol, &probability) in distribution.iter().enumerate() {
            if probability == -1 {
                high -= 1;
                entries[high].symbol = symbol as u8;
                next_state[symbol] = 1;
            } else {
                next_state[symbol] = probability.max(0) as u16;
            }
        }

        let mask = size - 1;
        let step = (size >> 1) + (size >> 3) + 3;
        let mut position = 0usize;
        for (symbol, &probability) in distribution.iter().enumerate() {
            for _ in 0..probability.max(0) {
                entries[position].symbol = symbol as u8;
                loop {
                    position = (position + step) & mask;
                    if position < high {
                        break;
                    }
                }
            }
        }
        if position != 0 {
            return Err(DecompressError::malformed(CODEC, "FSE spread did not return to zero"));
        }

        for entry in &mut entries {
            let state = &mut next_state[usize::from(entry.symbol)];
            let current = *state;
            *state += 1;
            let bits = u32::from(accuracy_log) - (15 - current.leading_zeros());
            entry.bits = bits as u8;
            entry.base = ((u32::from(current) << bits) - size as u32) as u16;
        }

        Ok(Self { accuracy_log, entries })
    }

    /// Read a table description from the front of `input`.
    ///
    /// Returns the table and the number of bytes the description used.
    pub(crate) fn read(input: &[u8], max_accuracy: u8, max_symbol: usize) -> DecompressResult<(Self, usize)>
    {
        let mut reader = ForwardBitReader::new(input, CODEC);
        let (distribution, accuracy_log) = read_distribution(&mut reader, max_accuracy, max_symbol)?;
        let used = reader.bits_consumed().div_ceil(8);
        Ok((Self::from_distribution(&distribution, accuracy_log)?, used))
    }

    pub(crate) fn accuracy_log(&self) -> u8
    {
        self.accuracy_log
    }

    #[cfg(test)]
    pub(crate) fn entries(&self) -> &[FseEntry]
    {
        &self.entries
    }
}

fn read_distribution(
    reader: &mut ForwardBitReader<'_>,
    max_accuracy: u8,
    max_symbol: usize,
) -> DecompressResult<(Vec<i16>, u8)>
{
    let accuracy_log = reader.read(4)? as u8 + 5;
    if accuracy_log > max_accuracy {
        return Err(DecompressError::malformed(CODEC, "FSE accuracy log too large"));
    }

    let mut remaining: i32 = (1 << accuracy_log) + 1;
    let mut threshold: i32 = 1 << accuracy_log;
    let mut bit_count = u32::from(accuracy_log) + 1;
    let mut distribution: Vec<i16> = Vec::with_capacity(max_symbol + 1);

    while remaining > 1 {
        if distribution.len() > max_symbol {
            return Err(DecompressError::malformed(CODEC, "FSE distribution has too many symbols"));
        }

        reader.refill();
        let max = 2 * threshold - 1 - remaining;
        let raw = reader.peek(bit_count) as i32;
        let count = if (raw & (threshold - 1)) < max {
            reader.consume(bit_count - 1)?;
            raw & (threshold - 1)
        } else {
            reader.consume(bit_count)?;
            let value = raw & (2 * threshold - 1);
            if value >= threshold {
                value - max
            } else {
                value
            }
        };

        let probability = count - 1;
        remaining -= probability.abs();
        distribution.push(probability as i16);

        if probability == 0 {
            loop {
                let repeat = reader.read(2)?;
                for _ in 0..repeat {
                    distribution.push(0);
                }
                if repeat != 3 {
                    break;
                }
            }
            if distribution.len() > max_symbol + 1 {
                return Err(DecompressError::malformed(CODEC, "FSE distribution has too many symbols"));
            }
        }

        while remaining < threshold && threshold > 1 {
            bit_count -= 1;
            threshold >>= 1;
        }
    }

    if remaining != 1 {
        return Err(DecompressError::malformed(CODEC, "FSE distribution does not add up"));
    }
    Ok((distribution, accuracy_log))
}

/// Cursor into an [`FseTable`].
#[derive(Debug)]
pub(crate) struct FseState<'t>
{
    table: &'t FseTable,
    state: usize,
}

impl<'t> FseState<'t>
{
    /// Read the initial state from the stream.
    pub(crate) fn new(table: &'t FseTable, reader: &mut BackwardBitReader<'_>) -> DecompressResult<Self>
    {
        let state = reader.read(u32::from(table.accuracy_log))? as usize;
        Ok(Self { table, state })
    }

    /// Like [`new`](Self::new) but tolerant of reading past the stream start.
    pub(crate) fn new_padded(table: &'t FseTable, reader: &mut BackwardBitReader<'_>) -> Self
    {
        let state = reader.read_padded(u32::from(table.accuracy_log)) as usize;
        Self { table, state }
    }

    pub(crate) fn symbol(&self) -> u8
    {
        self.table.entries[self.state].symbol
    }

    /// Move to the next state.
    pub(crate) fn update(&mut self, reader: &mut BackwardBitReader<'_>) -> DecompressResult<()>
    {
        let entry = self.table.entries[self.state];
        self.state = usize::from(entry.base) + reader.read(u32::from(entry.bits))? as usize;
        Ok(())
    }

    /// Move to the next state, zero-filling bits past the stream start.
    pub(crate) fn update_padded(&mut self, reader: &mut BackwardBitReader<'_>)
    {
        let entry = self.table.entries[self.state];
        self.state = usize::from(entry.base) + reader.read_padded(u32::from(entry.bits)) as usize;
    }
}
