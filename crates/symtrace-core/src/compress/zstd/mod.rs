//! # Zstandard
//!
//! Frame decoder for RFC 8878, sized for `SHF_COMPRESSED` debug sections.
//!
//! The whole output is held in memory, so the window descriptor is only
//! parsed, never enforced. Dictionaries are not supported. The optional
//! content checksum is skipped; the frame content size, when present, is
//! checked against the decoded length.
//!
//! Within a frame the Huffman tree, the three sequence tables and the
//! repeat-offset history carry over from block to block.

mod fse;
mod huffman;
mod literals;
mod sequences;

use self::huffman::HuffmanTable;
use self::literals::decode_literals;
use self::sequences::{decode_sequences, execute_sequences, RepeatOffsets, SequenceTables};
use super::{output_buffer, reserve, Codec, DecompressError, DecompressResult};

pub(crate) const CODEC: Codec = Codec::Zstd;

const FRAME_MAGIC: u32 = 0xfd2f_b528;
const SKIPPABLE_MAGIC: u32 = 0x184d_2a50;
const SKIPPABLE_MASK: u32 = 0xffff_fff0;
const MAX_BLOCK_SIZE: usize = 128 * 1024;

const BLOCK_RAW: u32 = 0;
const BLOCK_RLE: u32 = 1;
const BLOCK_COMPRESSED: u32 = 2;

/// Per-frame decoder state.
#[derive(Default)]
struct FrameState
{
    huffman: Option<HuffmanTable>,
    tables: SequenceTables,
    repeat: RepeatOffsets,
}

fn read_le(input: &[u8], at: usize, width: usize) -> DecompressResult<u64>
{
    let bytes = input.get(at..at + width).ok_or(DecompressError::truncated(CODEC))?;
    Ok(bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Parsed frame header.
#[derive(Debug, PartialEq, Eq)]
struct FrameHeader
{
    content_size: Option<u64>,
    has_checksum: bool,
    /// Header length in bytes, magic excluded.
    length: usize,
}

fn parse_frame_header(input: &[u8]) -> DecompressResult<FrameHeader>
{
    let descriptor = read_le(input, 0, 1)? as u8;
    let size_flag = descriptor >> 6;
    let single_segment = descriptor & 0x20 != 0;
    if descriptor & 0x08 != 0 {
        return Err(DecompressError::malformed(CODEC, "reserved frame header bit set"));
    }
    let has_checksum = descriptor & 0x04 != 0;
    let dictionary_width = [0, 1, 2, 4][usize::from(descriptor & 3)];

    let mut at = 1;
    if !single_segment {
        // Window descriptor; the output is fully buffered.
        read_le(input, at, 1)?;
        at += 1;
    }
    if dictionary_width > 0 {
        if read_le(input, at, dictionary_width)? != 0 {
            return Err(DecompressError::Unsupported {
                codec: CODEC,
                feature: "dictionaries",
            });
        }
        at += dictionary_width;
    }

    let content_size = match (size_flag, single_segment) {
        (0, false) => None,
        (0, true) => Some(read_le(input, at, 1)?),
        (1, _) => Some(read_le(input, at, 2)? + 256),
        (2, _) => Some(read_le(input, at, 4)?),
        _ => Some(read_le(input, at, 8)?),
    };
    at += match (size_flag, single_segment) {
        (0, false) => 0,
        (0, true) => 1,
        (1, _) => 2,
        (2, _) => 4,
        _ => 8,
    };

    Ok(FrameHeader {
        content_size,
        has_checksum,
        length: at,
    })
}

/// Decode one frame from the front of `input` (magic already consumed).
///
/// Returns the number of bytes the frame used.
fn decode_frame(input: &[u8], out: &mut Vec<u8>, limit: usize) -> DecompressResult<usize>
{
    let header = parse_frame_header(input)?;
    let frame_start = out.len();
    let mut state = FrameState::default();
    let mut at = header.length;

    loop {
        let block_header = read_le(input, at, 3)? as u32;
        at += 3;
        let last = block_header & 1 != 0;
        let kind = (block_header >> 1) & 3;
        let size = (block_header >> 3) as usize;
        if size > MAX_BLOCK_SIZE {
            return Err(DecompressError::malformed(CODEC, "block larger than 128 KiB"));
        }

        match kind {
            BLOCK_RAW => {
                let data = input.get(at..at + size).ok_or(DecompressError::truncated(CODEC))?;
                if size > limit - out.len() {
                    return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
                }
                reserve(CODEC, out, size)?;
                out.extend_from_slice(data);
                at += size;
            }
            BLOCK_RLE => {
                let byte = read_le(input, at, 1)? as u8;
                if size > limit - out.len() {
                    return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
                }
                reserve(CODEC, out, size)?;
                out.resize(out.len() + size, byte);
                at += 1;
            }
            BLOCK_COMPRESSED => {
                let block = input.get(at..at + size).ok_or(DecompressError::truncated(CODEC))?;
                decode_block(block, &mut state, out, frame_start, limit)?;
                at += size;
            }
            _ => return Err(DecompressError::malformed(CODEC, "reserved block type")),
        }

        if last {
            break;
        }
    }

    if header.has_checksum {
        read_le(input, at, 4)?;
        at += 4;
    }

    if let Some(expected) = header.content_size {
        let actual = (out.len() - frame_start) as u64;
        if actual != expected {
            return Err(DecompressError::SizeMismatch {
                codec: CODEC,
                expected,
                actual,
            });
        }
    }
    Ok(at)
}

fn decode_block(
    block: &[u8],
    state: &mut FrameState,
    out: &mut Vec<u8>,
    frame_start: usize,
    limit: usize,
) -> DecompressResult<()>
{
    let (literals, used) = decode_literals(block, &mut state.huffman)?;
    let sequences = decode_sequences(&block[used..], &mut state.tables)?;
    execute_sequences(&sequences, &literals, &mut state.repeat, out, frame_start, limit)
}

/// Decode every frame in `input`, producing at most `limit` bytes.
fn decode_frames(input: &[u8], out: &mut Vec<u8>, limit: usize) -> DecompressResult<()>
{
    let mut rest = input;
    while !rest.is_empty() {
        let magic = read_le(rest, 0, 4)? as u32;
        if magic & SKIPPABLE_MASK == SKIPPABLE_MAGIC {
            let size = read_le(rest, 4, 4)? as usize;
            rest = rest.get(8 + size..).ok_or(DecompressError::truncated(CODEC))?;
            continue;
        }
        if magic != FRAME_MAGIC {
            return Err(DecompressError::malformed(CODEC, "bad frame magic"));
        }
        let used = decode_frame(&rest[4..], out, limit)?;
        rest = &rest[4 + used..];
    }
    Ok(())
}

/// Decompress Zstandard data that must produce exactly `expected_len` bytes.
///
/// Skippable frames are ignored; several data frames are concatenated.
///
/// ## Errors
///
/// Malformed or truncated input, a dictionary frame, a frame whose content
/// size disagrees with its output, or a total different from `expected_len`.
pub fn decompress(input: &[u8], expected_len: usize) -> DecompressResult<Vec<u8>>
{
    let mut out = output_buffer(CODEC, expected_len)?;
    decode_frames(input, &mut out, expected_len)?;
    if out.len() != expected_len {
        return Err(DecompressError::SizeMismatch {
            codec: CODEC,
            expected: expected_len as u64,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Decompress Zstandard data of unknown size, refusing to produce more than `limit` bytes.
pub fn decompress_bounded(input: &[u8], limit: usize) -> DecompressResult<Vec<u8>>
{
    let mut out = Vec::new();
    decode_frames(input, &mut out, limit)?;
    Ok(out)
}
