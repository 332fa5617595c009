//! # XZ
//!
//! Decoder for the `.xz` container as used by MiniDebugInfo
//! (`.gnu_debugdata`): a single stream whose blocks each carry exactly one
//! LZMA2 filter.
//!
//! The stream footer and index are read first. The index gives every
//! block's sizes, so the output is allocated once and each block is checked
//! against its record. CRC32 and CRC64 block checks are verified; SHA-256
//! and reserved check types are skipped by size.

mod lzma;
mod lzma2;
mod rangecoder;

use tracing::warn;

use super::checksum::{crc32, crc64};
use super::{output_buffer, Codec, DecompressError, DecompressResult};

const CODEC: Codec = Codec::Xz;

const HEADER_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0];
const FOOTER_MAGIC: [u8; 2] = [b'Y', b'Z'];
const HEADER_SIZE: usize = 12;
const FOOTER_SIZE: usize = 12;
const FILTER_LZMA2: u64 = 0x21;

const CHECK_NONE: u8 = 0;
const CHECK_CRC32: u8 = 1;
const CHECK_CRC64: u8 = 4;
const CHECK_SIZES: [usize; 16] = [0, 4, 4, 4, 8, 8, 8, 16, 16, 16, 32, 32, 32, 64, 64, 64];

fn le32(input: &[u8], at: usize) -> u32
{
    u32::from_le_bytes([input[at], input[at + 1], input[at + 2], input[at + 3]])
}

fn verify_crc32(data: &[u8], stored: u32) -> DecompressResult<()>
{
    let computed = crc32(data);
    if computed != stored {
        return Err(DecompressError::ChecksumMismatch {
            codec: CODEC,
            expected: u64::from(stored),
            actual: u64::from(computed),
        });
    }
    Ok(())
}

/// Read a multibyte integer (up to nine 7-bit groups, little-endian).
fn read_varint(input: &[u8], at: &mut usize) -> DecompressResult<u64>
{
    let mut value = 0u64;
    for i in 0..9 {
        let &byte = input.get(*at).ok_or(DecompressError::truncated(CODEC))?;
        *at += 1;
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            if byte == 0 && i > 0 {
                return Err(DecompressError::malformed(CODEC, "integer has a redundant zero byte"));
            }
            return Ok(value);
        }
    }
    Err(DecompressError::malformed(CODEC, "integer longer than nine bytes"))
}

fn to_usize(value: u64) -> DecompressResult<usize>
{
    usize::try_from(value).map_err(|_| DecompressError::malformed(CODEC, "size does not fit in memory"))
}

fn skip_padding(input: &[u8], at: &mut usize, from: usize) -> DecompressResult<()>
{
    while (*at - from) % 4 != 0 {
        let &byte = input.get(*at).ok_or(DecompressError::truncated(CODEC))?;
        if byte != 0 {
            return Err(DecompressError::malformed(CODEC, "nonzero padding"));
        }
        *at += 1;
    }
    Ok(())
}

/// One index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Record
{
    /// Block header, compressed data and check, without block padding.
    unpadded: u64,
    uncompressed: u64,
}

/// Parse the stream header; returns the check type.
fn parse_header(input: &[u8]) -> DecompressResult<u8>
{
    if input[..6] != HEADER_MAGIC {
        return Err(DecompressError::malformed(CODEC, "bad stream header magic"));
    }
    if input[6] != 0 || input[7] & 0xf0 != 0 {
        return Err(DecompressError::malformed(CODEC, "reserved stream flags set"));
    }
    verify_crc32(&input[6..8], le32(input, 8))?;
    Ok(input[7])
}

/// Parse the stream footer; returns the offset where the index begins.
fn parse_footer(input: &[u8], check: u8) -> DecompressResult<usize>
{
    let footer = &input[input.len() - FOOTER_SIZE..];
    if footer[10..] != FOOTER_MAGIC {
        return Err(DecompressError::malformed(CODEC, "bad stream footer magic"));
    }
    if footer[8] != 0 || footer[9] != check {
        return Err(DecompressError::malformed(CODEC, "footer flags differ from header"));
    }
    verify_crc32(&footer[4..10], le32(footer, 0))?;

    let index_size = (le32(footer, 4) as usize + 1) * 4;
    let footer_start = input.len() - FOOTER_SIZE;
    footer_start
        .checked_sub(index_size)
        .filter(|&start| start >= HEADER_SIZE)
        .ok_or(DecompressError::malformed(CODEC, "index size exceeds stream"))
}

fn parse_index(index: &[u8]) -> DecompressResult<Vec<Record>>
{
    if index.first() != Some(&0) {
        return Err(DecompressError::malformed(CODEC, "missing index indicator"));
    }
    let mut at = 1;
    let count = read_varint(index, &mut at)?;
    let mut records = Vec::new();
    for _ in 0..count {
        let unpadded = read_varint(index, &mut at)?;
        let uncompressed = read_varint(index, &mut at)?;
        if unpadded == 0 {
            return Err(DecompressError::malformed(CODEC, "index record with zero size"));
        }
        records.push(Record { unpadded, uncompressed });
    }
    skip_padding(index, &mut at, 0)?;
    if at + 4 != index.len() {
        return Err(DecompressError::malformed(CODEC, "index size does not match its records"));
    }
    verify_crc32(&index[..at], le32(index, at))?;
    Ok(records)
}

/// Decode the block at `at`, appending to `out`. Returns the offset after it.
fn decode_block(input: &[u8], at: usize, check: u8, record: Record, out: &mut Vec<u8>) -> DecompressResult<usize>
{
    let start = at;
    let &size_byte = input.get(start).ok_or(DecompressError::truncated(CODEC))?;
    if size_byte == 0 {
        return Err(DecompressError::malformed(CODEC, "more blocks than index records"));
    }
    let header_size = (usize::from(size_byte) + 1) * 4;
    let header = input
        .get(start..start + header_size)
        .ok_or(DecompressError::truncated(CODEC))?;
    verify_crc32(&header[..header_size - 4], le32(header, header_size - 4))?;

    let flags = header[1];
    if flags & 0x3c != 0 {
        return Err(DecompressError::malformed(CODEC, "reserved block flags set"));
    }
    if flags & 0x03 != 0 {
        return Err(DecompressError::Unsupported {
            codec: CODEC,
            feature: "filter chains other than a single LZMA2 filter",
        });
    }

    let body = &header[..header_size - 4];
    let mut cursor = 2;
    let declared_compressed = if flags & 0x40 != 0 { Some(read_varint(body, &mut cursor)?) } else { None };
    let declared_uncompressed = if flags & 0x80 != 0 { Some(read_varint(body, &mut cursor)?) } else { None };

    if read_varint(body, &mut cursor)? != FILTER_LZMA2 {
        return Err(DecompressError::Unsupported {
            codec: CODEC,
            feature: "filters other than LZMA2",
        });
    }
    if read_varint(body, &mut cursor)? != 1 {
        return Err(DecompressError::malformed(CODEC, "LZMA2 filter properties must be one byte"));
    }
    let &dictionary = body.get(cursor).ok_or(DecompressError::truncated(CODEC))?;
    cursor += 1;
    if dictionary > 40 {
        return Err(DecompressError::malformed(CODEC, "LZMA2 dictionary size out of range"));
    }
    if body[cursor..].iter().any(|&b| b != 0) {
        return Err(DecompressError::malformed(CODEC, "nonzero block header padding"));
    }

    let data_start = start + header_size;
    let out_start = out.len();
    let limit = out_start + to_usize(record.uncompressed)?;
    let used = lzma2::decode(&input[data_start..], out, limit)?;
    let produced = (out.len() - out_start) as u64;
    if produced != record.uncompressed || declared_uncompressed.is_some_and(|size| size != produced) {
        return Err(DecompressError::SizeMismatch {
            codec: CODEC,
            expected: record.uncompressed,
            actual: produced,
        });
    }
    if declared_compressed.is_some_and(|size| size != used as u64) {
        return Err(DecompressError::malformed(CODEC, "block compressed size differs from header"));
    }

    let check_size = CHECK_SIZES[usize::from(check)];
    let unpadded = (header_size + used + check_size) as u64;
    if unpadded != record.unpadded {
        return Err(DecompressError::malformed(CODEC, "block size differs from index record"));
    }

    let mut at = data_start + used;
    skip_padding(input, &mut at, start)?;
    let stored = input.get(at..at + check_size).ok_or(DecompressError::truncated(CODEC))?;
    let data = &out[out_start..];
    match check {
        CHECK_NONE => {}
        CHECK_CRC32 => verify_crc32(data, le32(stored, 0))?,
        CHECK_CRC64 => {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(stored);
            let stored = u64::from_le_bytes(bytes);
            let computed = crc64(data);
            if stored != computed {
                return Err(DecompressError::ChecksumMismatch {
                    codec: CODEC,
                    expected: stored,
                    actual: computed,
                });
            }
        }
        other => warn!(check = other, "skipping unverified xz block check"),
    }
    Ok(at + check_size)
}

/// Decompress a complete single-stream `.xz` buffer.
///
/// ## Errors
///
/// Bad magic or flags, CRC mismatches on the header, footer, index, block
/// headers or CRC32/CRC64 block checks, filters other than one LZMA2, and any
/// disagreement between a block and its index record.
pub fn decompress(input: &[u8]) -> DecompressResult<Vec<u8>>
{
    if input.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(DecompressError::truncated(CODEC));
    }
    let check = parse_header(input)?;
    let index_start = parse_footer(input, check)?;
    let records = parse_index(&input[index_start..input.len() - FOOTER_SIZE])?;

    let total = records
        .iter()
        .try_fold(0u64, |sum, record| sum.checked_add(record.uncompressed))
        .ok_or(DecompressError::malformed(CODEC, "total size overflows"))?;
    let mut out = output_buffer(CODEC, to_usize(total)?)?;

    let mut at = HEADER_SIZE;
    for record in records {
        at = decode_block(&input[..index_start], at, check, record, &mut out)?;
    }
    if at != index_start {
        return Err(DecompressError::malformed(CODEC, "data between last block and index"));
    }
    Ok(out)
}
