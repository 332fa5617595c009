//! Huffman-coded literals (RFC 8878 §4.2).

use super::fse::{FseState, FseTable};
use super::CODEC;
use crate::compress::bits::BackwardBitReader;
use crate::compress::{DecompressError, DecompressResult};

const MAX_CODE_BITS: u32 = 11;
const MAX_WEIGHT: u8 = 12;
const WEIGHT_ACCURACY_MAX: u8 = 6;
const MAX_WEIGHTS: usize = 255;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct HuffmanEntry
{
    symbol: u8,
    bits: u8,
}

/// Literal decoding table indexed by the next `max_bits` bits of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HuffmanTable
{
    max_bits: u8,
    entries: Vec<HuffmanEntry>,
}

impl HuffmanTable
{
    /// Parse a tree description from the front of `input`.
    ///
    /// Returns the table and the number of bytes the description used.
    pub(crate) fn read(input: &[u8]) -> DecompressResult<(Self, usize)>
    {
        let Some(&header) = input.first() else {
            return Err(DecompressError::truncated(CODEC));
        };

        if header < 128 {
            let size = usize::from(header);
            let data = input.get(1..1 + size).ok_or(DecompressError::truncated(CODEC))?;
            let weights = decode_compressed_weights(data)?;
            Ok((Self::from_weights(weights)?, 1 + size))
        } else {
            let count = usize::from(header) - 127;
            let size = count.div_ceil(2);
            let data = input.get(1..1 + size).ok_or(DecompressError::truncated(CODEC))?;
            let weights = (0..count)
                .map(|i| {
                    let byte = data[i / 2];
                    if i % 2 == 0 {
                        byte >> 4
                    } else {
                        byte & 0x0f
                    }
                })
                .collect();
            Ok((Self::from_weights(weights)?, 1 + size))
        }
    }

    /// Build the table from explicit weights; the last symbol's weight is implied.
    fn from_weights(mut weights: Vec<u8>) -> DecompressResult<Self>
    {
        let mut total: u32 = 0;
        for &weight in &weights {
            if weight > MAX_WEIGHT {
                return Err(DecompressError::malformed(CODEC, "Huffman weight too large"));
            }
            if weight > 0 {
                total += 1 << (weight - 1);
            }
        }
        if total == 0 {
            return Err(DecompressError::malformed(CODEC, "Huffman tree has no symbols"));
        }

        let max_bits = 32 - total.leading_zeros();
        if max_bits > MAX_CODE_BITS {
            return Err(DecompressError::malformed(CODEC, "Huffman code too long"));
        }
        let left = (1u32 << max_bits) - total;
        if !left.is_power_of_two() {
            return Err(DecompressError::malformed(CODEC, "Huffman weights do not form a complete tree"));
        }
        weights.push((left.trailing_zeros() + 1) as u8);
        if weights.len() > 256 {
            return Err(DecompressError::malformed(CODEC, "too many Huffman symbols"));
        }

        let mut entries = vec![HuffmanEntry::default(); 1 << max_bits];
        let mut position = 0usize;
        for weight in 1..=max_bits as u8 {
            let span = 1usize << (weight - 1);
            let entry_bits = max_bits as u8 + 1 - weight;
            for (symbol, _) in weights.iter().enumerate().filter(|(_, &w)| w == weight) {
                entries[position..position + span].fill(HuffmanEntry {
                    symbol: symbol as u8,
                    bits: entry_bits,
                });
                position += span;
            }
        }

        Ok(Self {
            max_bits: max_bits as u8,
            entries,
        })
    }

    /// Decode exactly `count` literals from one stream, appending to `out`.
    ///
    /// ## Errors
    ///
    /// The stream must end exactly after the last literal.
    pub(crate) fn decode_stream(&self, data: &[u8], count: usize, out: &mut Vec<u8>) -> DecompressResult<()>
    {
        let mut reader = BackwardBitReader::new(data, CODEC)?;
        let bits = u32::from(self.max_bits);
        for _ in 0..count {
            let entry = self.entries[reader.peek(bits) as usize];
            reader.consume(u32::from(entry.bits))?;
            out.push(entry.symbol);
        }
        if !reader.is_finished() {
            return Err(DecompressError::malformed(CODEC, "Huffman stream not fully consumed"));
        }
        Ok(())
    }
}

/// Weights sent as an FSE-compressed stream with two interleaved states.
fn decode_compressed_weights(data: &[u8]) -> DecompressResult<Vec<u8>>
{
    let (table, used) = FseTable::read(data, WEIGHT_ACCURACY_MAX, usize::from(MAX_WEIGHT))?;
    let stream = data.get(used..).ok_or(DecompressError::truncated(CODEC))?;
    let mut reader = BackwardBitReader::new(stream, CODEC)?;

    let mut first = FseState::new(&table, &mut reader)?;
    let mut second = FseState::new(&table, &mut reader)?;
    let mut weights = Vec::with_capacity(MAX_WEIGHTS);
    loop {
        if weights.len() + 2 > MAX_WEIGHTS {
            return Err(DecompressError::malformed(CODEC, "too many Huffman weights"));
        }
        weights.push(first.symbol());
        first.update_padded(&mut reader);
        if reader.overflowed() {
            weights.push(second.symbol());
            break;
        }

        if weights.len() + 2 > MAX_WEIGHTS {
            return Err(DecompressError::malformed(CODEC, "too many Huffman weights"));
        }
        weights.push(second.symbol());
        second.update_padded(&mut reader);
        if reader.overflowed() {
            weights.push(first.symbol());
            break;
        }
    }
    Ok(weights)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_weights_example_from_rfc()
    {
        // Literals 0..=4 with weights 4, 3, 2, 0, 1; literal 5 gets the implied weight 1.
        let table = HuffmanTable::from_weights(vec![4, 3, 2, 0, 1]).unwrap();
        assert_eq!(table.max_bits, 4);
        let symbol_at = |index: usize| table.entries[index];
        assert_eq!(symbol_at(0), HuffmanEntry { symbol: 4, bits: 4 });
        assert_eq!(symbol_at(1), HuffmanEntry { symbol: 5, bits: 4 });
        assert_eq!(symbol_at(2), HuffmanEntry { symbol: 2, bits: 3 });
        assert_eq!(symbol_at(4), HuffmanEntry { symbol: 1, bits: 2 });
        assert_eq!(symbol_at(8), HuffmanEntry { symbol: 0, bits: 1 });
        assert_eq!(symbol_at(15), HuffmanEntry { symbol: 0, bits: 1 });
    }

    #[test]
    fn test_direct_weights_header()
    {
        // 128 + 5 - 1: five 4-bit weights packed high nibble first.
        let input = [132u8, 0x43, 0x20, 0x10];
        let (table, used) = HuffmanTable::read(&input).unwrap();
        assert_eq!(used, 4);
        assert_eq!(table.max_bits, 4);
    }

    #[test]
    fn test_incomplete_weights_rejected()
    {
        // Weights 3 and 1 sum to 5 and leave 3 of 8, not a power of two.
        assert!(HuffmanTable::from_weights(vec![3, 1]).is_err());
        assert!(HuffmanTable::from_weights(vec![0, 0]).is_err());
        assert!(HuffmanTable::from_weights(vec![13]).is_err());
    }

    #[test]
    fn test_decode_stream_requires_exact_consumption()
    {
        let table = HuffmanTable::from_weights(vec![1]).unwrap();
        // Two symbols, one bit each: symbol 0 has code 0, symbol 1 has code 1.
        // Stream bits (read backward): marker, then 1, 0.
        let data = [0b0000_0110u8];
        let mut out = Vec::new();
        table.decode_stream(&data, 2, &mut out).unwrap();
        assert_eq!(out, vec![1, 0]);

        let mut out = Vec::new();
        assert!(table.decode_stream(&data, 1, &mut out).is_err());
    }
}
