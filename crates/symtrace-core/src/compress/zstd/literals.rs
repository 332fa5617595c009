//! Literals section of a compressed block.

use super::huffman::HuffmanTable;
use super::CODEC;
use crate::compress::{output_buffer, DecompressError, DecompressResult};

const RAW: u8 = 0;
const RLE: u8 = 1;
const COMPRESSED: u8 = 2;
const TREELESS: u8 = 3;

fn byte_at(block: &[u8], index: usize) -> DecompressResult<u32>
{
    block
        .get(index)
        .map(|&b| u32::from(b))
        .ok_or(DecompressError::truncated(CODEC))
}

/// Decode the literals section at the front of `block`.
///
/// `huffman` holds the tree of the previous compressed-literals block in
/// this frame and is replaced when a new tree is sent.
///
/// Returns the literals and the number of block bytes the section used.
pub(crate) fn decode_literals(block: &[u8], huffman: &mut Option<HuffmanTable>) -> DecompressResult<(Vec<u8>, usize)>
{
    let header = byte_at(block, 0)?;
    let kind = (header & 3) as u8;
    let size_format = (header >> 2) & 3;

    match kind {
        RAW | RLE => {
            let (size, header_len) = match size_format {
                0 | 2 => (header >> 3, 1),
                1 => ((header >> 4) + (byte_at(block, 1)? << 4), 2),
                _ => ((header >> 4) + (byte_at(block, 1)? << 4) + (byte_at(block, 2)? << 12), 3),
            };
            let size = size as usize;
            if kind == RAW {
                let data = block
                    .get(header_len..header_len + size)
                    .ok_or(DecompressError::truncated(CODEC))?;
                let mut literals = output_buffer(CODEC, size)?;
                literals.extend_from_slice(data);
                Ok((literals, header_len + size))
            } else {
                let byte = byte_at(block, header_len)? as u8;
                let mut literals = output_buffer(CODEC, size)?;
                literals.resize(size, byte);
                Ok((literals, header_len + 1))
            }
        }
        _ => {
            let (regenerated, compressed, streams, header_len) = match size_format {
                0 | 1 => {
                    let value = header | byte_at(block, 1)? << 8 | byte_at(block, 2)? << 16;
                    let streams = if size_format == 0 { 1 } else { 4 };
                    ((value >> 4) & 0x3ff, (value >> 14) & 0x3ff, streams, 3)
                }
                2 => {
                    let value = header | byte_at(block, 1)? << 8 | byte_at(block, 2)? << 16 | byte_at(block, 3)? << 24;
                    ((value >> 4) & 0x3fff, value >> 18, 4, 4)
                }
                _ => {
                    let value = u64::from(header)
                        | u64::from(byte_at(block, 1)?) << 8
                        | u64::from(byte_at(block, 2)?) << 16
                        | u64::from(byte_at(block, 3)?) << 24
                        | u64::from(byte_at(block, 4)?) << 32;
                    (((value >> 4) & 0x3ffff) as u32, ((value >> 22) & 0x3ffff) as u32, 4, 5)
                }
            };
            let regenerated = regenerated as usize;
            let compressed = compressed as usize;
            let mut data = block
                .get(header_len..header_len + compressed)
                .ok_or(DecompressError::truncated(CODEC))?;

            if kind == COMPRESSED {
                let (table, used) = HuffmanTable::read(data)?;
                *huffman = Some(table);
                data = &data[used..];
            }
            debug_assert!(kind == COMPRESSED || kind == TREELESS);
            let table = huffman
                .as_ref()
                .ok_or(DecompressError::malformed(CODEC, "treeless literals without a previous Huffman table"))?;

            let mut literals = output_buffer(CODEC, regenerated)?;
            if streams == 1 {
                table.decode_stream(data, regenerated, &mut literals)?;
            } else {
                decode_four_streams(table, data, regenerated, &mut literals)?;
            }
            Ok((literals, header_len + compressed))
        }
    }
}

fn decode_four_streams(table: &HuffmanTable, data: &[u8], regenerated: usize, out: &mut Vec<u8>) -> DecompressResult<()>
{
    if data.len() < 6 {
        return Err(DecompressError::truncated(CODEC));
    }
    let sizes = [
        usize::from(u16::from_le_bytes([data[0], data[1]])),
        usize::from(u16::from_le_bytes([data[2], data[3]])),
        usize::from(u16::from_le_bytes([data[4], data[5]])),
    ];
    let payload = &data[6..];
    let first_three: usize = sizes.iter().sum();
    if first_three > payload.len() {
        return Err(DecompressError::malformed(CODEC, "literal jump table exceeds section"));
    }

    let segment = regenerated.div_ceil(4);
    if segment * 3 > regenerated {
        return Err(DecompressError::malformed(CODEC, "too few literals for four streams"));
    }

    let mut start = 0;
    for size in sizes {
        table.decode_stream(&payload[start..start + size], segment, out)?;
        start += size;
    }
    table.decode_stream(&payload[start..], regenerated - segment * 3, out)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_raw_literals_short_header()
    {
        // Raw, size format 0, five bytes.
        let block = [5 << 3, b'h', b'e', b'l', b'l', b'o', 0xaa];
        let mut huffman = None;
        let (literals, used) = decode_literals(&block, &mut huffman).unwrap();
        assert_eq!(literals, b"hello");
        assert_eq!(used, 6);
    }

    #[test]
    fn test_rle_literals_two_byte_header()
    {
        // RLE, size format 1, size 0x123.
        let block = [0b0011_0101, 0x12, b'z'];
        let mut huffman = None;
        let (literals, used) = decode_literals(&block, &mut huffman).unwrap();
        assert_eq!(literals.len(), 0x123);
        assert!(literals.iter().all(|&b| b == b'z'));
        assert_eq!(used, 3);
    }

    #[test]
    fn test_treeless_without_previous_table_is_rejected()
    {
        // Treeless, single stream, regenerated 4, compressed 1.
        let value: u32 = 3 | (4 << 4) | (1 << 14);
        let bytes = value.to_le_bytes();
        let block = [bytes[0], bytes[1], bytes[2], 0x80];
        let mut huffman = None;
        assert!(matches!(
            decode_literals(&block, &mut huffman),
            Err(DecompressError::Malformed { .. })
        ));
    }

    #[test]
    fn test_truncated_raw_literals()
    {
        let block = [10 << 3, 1, 2, 3];
        let mut huffman = None;
        assert!(decode_literals(&block, &mut huffman).is_err());
    }
}
