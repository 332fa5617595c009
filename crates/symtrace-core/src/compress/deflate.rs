//! # DEFLATE / zlib
//!
//! Inflater for zlib-wrapped DEFLATE streams (RFC 1950/1951).
//!
//! Two framings reach this module:
//!
//! - `SHF_COMPRESSED` sections with `ELFCOMPRESS_ZLIB`: a bare zlib stream
//!   whose decompressed size comes from the compression header
//! - legacy `.zdebug_*` sections: the 4-byte tag `ZLIB` and an 8-byte
//!   big-endian size in front of the zlib stream ([`inflate_zdebug`])
//!
//! Huffman tables use an 8-bit primary index; codes longer than eight bits
//! continue in a secondary table reached through the primary slot.

use once_cell::sync::Lazy;

use super::bits::ForwardBitReader;
use super::checksum::adler32;
use super::{copy_match, output_buffer, Codec, DecompressError, DecompressResult};

const CODEC: Codec = Codec::Zlib;

const PRIMARY_BITS: u32 = 8;
const MAX_CODE_BITS: usize = 15;

/// Order in which code-length code lengths are stored in a dynamic block header.
const CODE_LENGTH_ORDER: [usize; 19] = [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131, 163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0];

const DISTANCE_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537, 2049, 3073, 4097, 6145,
    8193, 12289, 16385, 24577,
];
const DISTANCE_EXTRA: [u8; 30] = [0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, 13];

const END_OF_BLOCK: u16 = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Slot
{
    #[default]
    Invalid,
    Symbol
    {
        symbol: u16,
        length: u8,
    },
    Subtable
    {
        offset: u16,
        bits: u8,
    },
}

/// Canonical Huffman decoding table.
#[derive(Debug, Clone)]
pub(crate) struct HuffmanTable
{
    slots: Vec<Slot>,
}

fn reverse_bits(code: u32, length: u8) -> u32
{
    code.reverse_bits() >> (32 - u32::from(length))
}

impl HuffmanTable
{
    /// Build the table for the code lengths of each symbol (0 = unused).
    ///
    /// ## Errors
    ///
    /// Lengths above 15 or an over-subscribed set of lengths are malformed.
    pub(crate) fn from_lengths(lengths: &[u8]) -> DecompressResult<Self>
    {
        let mut counts = [0u32; MAX_CODE_BITS + 1];
        for &length in lengths {
            let length = usize::from(length);
            if length > MAX_CODE_BITS {
                return Err(DecompressError::malformed(CODEC, "code length above 15"));
            }
            counts[length] += 1;
        }
        counts[0] = 0;

        let mut left: i64 = 1;
        for &count in &counts[1..] {
            left = (left << 1) - i64::from(count);
            if left < 0 {
                return Err(DecompressError::malformed(CODEC, "over-subscribed code lengths"));
            }
        }

        let mut next_code = [0u32; MAX_CODE_BITS + 1];
        let mut code = 0u32;
        for length in 1..=MAX_CODE_BITS {
            code = (code + counts[length - 1]) << 1;
            next_code[length] = code;
        }

        let mut codes = vec![0u32; lengths.len()];
        for (symbol, &length) in lengths.iter().enumerate() {
            if length > 0 {
                codes[symbol] = reverse_bits(next_code[usize::from(length)], length);
                next_code[usize::from(length)] += 1;
            }
        }

        let primary_size = 1usize << PRIMARY_BITS;
        let mut sub_bits = vec![0u8; primary_size];
        for (symbol, &length) in lengths.iter().enumerate() {
            if u32::from(length) > PRIMARY_BITS {
                let prefix = (codes[symbol] & 0xff) as usize;
                sub_bits[prefix] = sub_bits[prefix].max(length - PRIMARY_BITS as u8);
            }
        }

        let mut slots = vec![Slot::Invalid; primary_size];
        for (prefix, &bits) in sub_bits.iter().enumerate() {
            if bits > 0 {
                let offset = slots.len();
                slots[prefix] = Slot::Subtable {
                    offset: offset as u16,
                    bits,
                };
                slots.resize(offset + (1usize << bits), Slot::Invalid);
            }
        }

        for (symbol, &length) in lengths.iter().enumerate() {
            if length == 0 {
                continue;
            }
            let code = codes[symbol] as usize;
            let entry = Slot::Symbol {
                symbol: symbol as u16,
                length,
            };
            if u32::from(length) <= PRIMARY_BITS {
                let mut index = code;
                while index < primary_size {
                    slots[index] = entry;
                    index += 1 << length;
                }
            } else {
                let Slot::Subtable { offset, bits } = slots[code & 0xff] else {
                    return Err(DecompressError::malformed(CODEC, "Huffman prefix collision"));
                };
                let step = 1usize << (length - PRIMARY_BITS as u8);
                let mut index = code >> PRIMARY_BITS;
                while index < (1usize << bits) {
                    slots[usize::from(offset) + index] = entry;
                    index += step;
                }
            }
        }

        Ok(Self { slots })
    }

    /// Decode one symbol.
    pub(crate) fn decode(&self, reader: &mut ForwardBitReader<'_>) -> DecompressResult<u16>
    {
        reader.refill();
        let slot = match self.slots[reader.peek(PRIMARY_BITS) as usize] {
            Slot::Subtable { offset, bits } => {
                let index = reader.peek(PRIMARY_BITS + u32::from(bits)) >> PRIMARY_BITS;
                self.slots[usize::from(offset) + index as usize]
            }
            slot => slot,
        };
        match slot {
            Slot::Symbol { symbol, length } => {
                reader.consume(u32::from(length))?;
                Ok(symbol)
            }
            _ => Err(DecompressError::malformed(CODEC, "invalid Huffman code")),
        }
    }
}

struct FixedTables
{
    literals: HuffmanTable,
    distances: HuffmanTable,
}

static FIXED_TABLES: Lazy<DecompressResult<FixedTables>> = Lazy::new(|| {
    let mut literal_lengths = [0u8; 288];
    literal_lengths[..144].fill(8);
    literal_lengths[144..256].fill(9);
    literal_lengths[256..280].fill(7);
    literal_lengths[280..].fill(8);
    Ok(FixedTables {
        literals: HuffmanTable::from_lengths(&literal_lengths)?,
        distances: HuffmanTable::from_lengths(&[5u8; 30])?,
    })
});

fn fixed_tables() -> DecompressResult<&'static FixedTables>
{
    FIXED_TABLES.as_ref().map_err(Clone::clone)
}

fn read_dynamic_tables(reader: &mut ForwardBitReader<'_>) -> DecompressResult<(HuffmanTable, HuffmanTable)>
{
    let literal_count = reader.read(5)? as usize + 257;
    let distance_count = reader.read(5)? as usize + 1;
    let code_length_count = reader.read(4)? as usize + 4;
    if literal_count > 286 || distance_count > 30 {
        return Err(DecompressError::malformed(CODEC, "too many codes in dynamic block"));
    }

    let mut code_length_lengths = [0u8; 19];
    for &symbol in &CODE_LENGTH_ORDER[..code_length_count] {
        code_length_lengths[symbol] = reader.read(3)? as u8;
    }
    let code_length_table = HuffmanTable::from_lengths(&code_length_lengths)?;

    let total = literal_count + distance_count;
    let mut lengths = vec![0u8; total];
    let mut index = 0;
    while index < total {
        let symbol = code_length_table.decode(reader)?;
        let (value, repeat) = match symbol {
            0..=15 => (symbol as u8, 1),
            16 => {
                if index == 0 {
                    return Err(DecompressError::malformed(CODEC, "length repeat with no previous length"));
                }
                (lengths[index - 1], 3 + reader.read(2)? as usize)
            }
            17 => (0, 3 + reader.read(3)? as usize),
            18 => (0, 11 + reader.read(7)? as usize),
            _ => return Err(DecompressError::malformed(CODEC, "invalid code length symbol")),
        };
        if index + repeat > total {
            return Err(DecompressError::malformed(CODEC, "code length run past end"));
        }
        lengths[index..index + repeat].fill(value);
        index += repeat;
    }

    if lengths[usize::from(END_OF_BLOCK)] == 0 {
        return Err(DecompressError::malformed(CODEC, "missing end-of-block code"));
    }

    let literals = HuffmanTable::from_lengths(&lengths[..literal_count])?;
    let distances = HuffmanTable::from_lengths(&lengths[literal_count..])?;
    Ok((literals, distances))
}

fn inflate_block(
    reader: &mut ForwardBitReader<'_>,
    literals: &HuffmanTable,
    distances: &HuffmanTable,
    out: &mut Vec<u8>,
    stream_start: usize,
    limit: usize,
) -> DecompressResult<()>
{
    loop {
        let symbol = literals.decode(reader)?;
        match symbol {
            0..=255 => {
                if out.len() >= limit {
                    return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
                }
                out.push(symbol as u8);
            }
            END_OF_BLOCK => return Ok(()),
            257..=285 => {
                let code = usize::from(symbol - 257);
                let length = usize::from(LENGTH_BASE[code]) + reader.read(u32::from(LENGTH_EXTRA[code]))? as usize;

                let distance_code = usize::from(distances.decode(reader)?);
                if distance_code >= DISTANCE_BASE.len() {
                    return Err(DecompressError::malformed(CODEC, "invalid distance code"));
                }
                let distance = usize::from(DISTANCE_BASE[distance_code])
                    + reader.read(u32::from(DISTANCE_EXTRA[distance_code]))? as usize;

                if distance > out.len() - stream_start {
                    return Err(DecompressError::malformed(CODEC, "distance before start of output"));
                }
                if length > limit - out.len() {
                    return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
                }
                copy_match(out, distance, length);
            }
            _ => return Err(DecompressError::malformed(CODEC, "invalid literal/length code")),
        }
    }
}

fn check_zlib_header(cmf: u8, flg: u8) -> DecompressResult<()>
{
    if cmf & 0x0f != 8 {
        return Err(DecompressError::Unsupported {
            codec: CODEC,
            feature: "compression method other than deflate",
        });
    }
    if cmf >> 4 > 7 {
        return Err(DecompressError::malformed(CODEC, "window size too large"));
    }
    if flg & 0x20 != 0 {
        return Err(DecompressError::Unsupported {
            codec: CODEC,
            feature: "preset dictionary",
        });
    }
    if (u16::from(cmf) << 8 | u16::from(flg)) % 31 != 0 {
        return Err(DecompressError::malformed(CODEC, "header check failed"));
    }
    Ok(())
}

/// Inflate one zlib stream from the front of `input`, appending to `out`.
///
/// Returns the number of input bytes the stream occupied, trailer included.
fn inflate_stream(input: &[u8], out: &mut Vec<u8>, limit: usize) -> DecompressResult<usize>
{
    if input.len() < 2 {
        return Err(DecompressError::truncated(CODEC));
    }
    check_zlib_header(input[0], input[1])?;

    let stream_start = out.len();
    let mut reader = ForwardBitReader::new(&input[2..], CODEC);
    loop {
        let last = reader.read(1)? == 1;
        match reader.read(2)? {
            0 => {
                reader.byte_align();
                let header = reader.take_bytes(4)?;
                let length = u16::from_le_bytes([header[0], header[1]]);
                let inverse = u16::from_le_bytes([header[2], header[3]]);
                if length != !inverse {
                    return Err(DecompressError::malformed(CODEC, "stored block length check failed"));
                }
                let length = usize::from(length);
                if length > limit - out.len() {
                    return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
                }
                out.extend_from_slice(reader.take_bytes(length)?);
            }
            1 => {
                let fixed = fixed_tables()?;
                inflate_block(&mut reader, &fixed.literals, &fixed.distances, out, stream_start, limit)?;
            }
            2 => {
                let (literals, distances) = read_dynamic_tables(&mut reader)?;
                inflate_block(&mut reader, &literals, &distances, out, stream_start, limit)?;
            }
            _ => return Err(DecompressError::malformed(CODEC, "reserved block type")),
        }
        if last {
            break;
        }
    }

    reader.byte_align();
    let trailer = reader.take_bytes(4)?;
    let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = adler32(&out[stream_start..]);
    if stored != computed {
        return Err(DecompressError::ChecksumMismatch {
            codec: CODEC,
            expected: u64::from(stored),
            actual: u64::from(computed),
        });
    }

    Ok(2 + reader.byte_align())
}

/// Inflate zlib data that must decompress to exactly `expected_len` bytes.
///
/// Several concatenated zlib streams are accepted; decoding continues with
/// the next stream until the output is full. Each stream's Adler-32 trailer
/// is verified.
///
/// ## Errors
///
/// Any malformed or truncated stream, a checksum mismatch, or a total size
/// different from `expected_len`.
pub fn inflate_zlib(input: &[u8], expected_len: usize) -> DecompressResult<Vec<u8>>
{
    let mut out = output_buffer(CODEC, expected_len)?;
    let mut rest = input;
    loop {
        let used = inflate_stream(rest, &mut out, expected_len)?;
        rest = &rest[used..];
        if rest.is_empty() || out.len() >= expected_len {
            break;
        }
    }

    if out.len() != expected_len {
        return Err(DecompressError::SizeMismatch {
            codec: CODEC,
            expected: expected_len as u64,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Inflate a legacy `.zdebug_*` section: `ZLIB`, a big-endian u64 size, then zlib data.
///
/// ## Errors
///
/// Fails if the section is shorter than the 12-byte header, the tag is
/// wrong, or the payload fails [`inflate_zlib`].
pub fn inflate_zdebug(section: &[u8]) -> DecompressResult<Vec<u8>>
{
    if section.len() < 12 {
        return Err(DecompressError::truncated(CODEC));
    }
    if &section[..4] != b"ZLIB" {
        return Err(DecompressError::malformed(CODEC, "missing ZLIB tag"));
    }
    let mut size = [0u8; 8];
    size.copy_from_slice(&section[4..12]);
    let size = usize::try_from(u64::from_be_bytes(size)).map_err(|_| DecompressError::Allocation {
        codec: CODEC,
        requested: usize::MAX,
    })?;
    inflate_zlib(&section[12..], size)
}

#[cfg(test)]
mod tests
{
    use std::io::Write;

    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    use super::*;

    fn zlib(data: &[u8], level: Compression) -> Vec<u8>
    {
        let mut encoder = ZlibEncoder::new(Vec::new(), level);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_text() -> Vec<u8>
    {
        let mut text = Vec::new();
        for i in 0..2000 {
            writeln!(text, "frame #{i}: symtrace::locator::load_image at src/locator.rs:{}", i % 97).unwrap();
        }
        text
    }

    #[test]
    fn test_fixed_tables_decode_known_codes()
    {
        let tables = fixed_tables().unwrap();
        // Fixed literal 0 is the 8-bit code 00110000, sent MSB first.
        let reversed = reverse_bits(0b0011_0000, 8) as u8;
        let bytes = [reversed, 0];
        let mut reader = ForwardBitReader::new(&bytes, CODEC);
        assert_eq!(tables.literals.decode(&mut reader).unwrap(), 0);
    }

    #[test]
    fn test_table_rejects_oversubscribed_lengths()
    {
        assert!(HuffmanTable::from_lengths(&[1, 1, 1]).is_err());
        assert!(HuffmanTable::from_lengths(&[16]).is_err());
    }

    #[test]
    fn test_table_long_codes_use_subtables()
    {
        // Lengths 1..=15 plus a second 15: a complete code with codes up to 15 bits.
        let mut lengths: Vec<u8> = (1..=15).collect();
        lengths.push(15);
        let table = HuffmanTable::from_lengths(&lengths).unwrap();
        assert!(table.slots.len() > 256);

        // Symbol 15 has the all-ones 15-bit code.
        let mut reader = ForwardBitReader::new(&[0xff, 0xff], CODEC);
        assert_eq!(table.decode(&mut reader).unwrap(), 15);
    }

    #[test]
    fn test_round_trip_all_levels()
    {
        let text = sample_text();
        for level in [Compression::none(), Compression::fast(), Compression::best()] {
            let packed = zlib(&text, level);
            assert_eq!(inflate_zlib(&packed, text.len()).unwrap(), text);
        }
    }

    #[test]
    fn test_round_trip_binary_noise()
    {
        let mut state = 0x1234_5678u32;
        let data: Vec<u8> = (0..50_000)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                (state >> 16) as u8 & 0x3f
            })
            .collect();
        let packed = zlib(&data, Compression::default());
        assert_eq!(inflate_zlib(&packed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_concatenated_streams()
    {
        let mut packed = zlib(b"first stream|", Compression::default());
        packed.extend(zlib(b"second stream", Compression::default()));
        assert_eq!(inflate_zlib(&packed, 26).unwrap(), b"first stream|second stream");
    }

    #[test]
    fn test_corrupted_checksum_is_rejected()
    {
        let text = sample_text();
        let mut packed = zlib(&text, Compression::default());
        let last = packed.len() - 1;
        packed[last] ^= 0x01;
        assert!(matches!(
            inflate_zlib(&packed, text.len()),
            Err(DecompressError::ChecksumMismatch { codec: Codec::Zlib, .. })
        ));
    }

    #[test]
    fn test_wrong_declared_size_is_rejected()
    {
        let packed = zlib(b"hello hello hello", Compression::default());
        assert!(inflate_zlib(&packed, 5).is_err());
        assert!(matches!(inflate_zlib(&packed, 40), Err(DecompressError::SizeMismatch { .. })));
    }

    #[test]
    fn test_truncated_stream_is_rejected()
    {
        let text = sample_text();
        let packed = zlib(&text, Compression::default());
        assert!(inflate_zlib(&packed[..packed.len() / 2], text.len()).is_err());
    }

    #[test]
    fn test_header_checks()
    {
        assert!(check_zlib_header(0x78, 0x9c).is_ok());
        assert!(check_zlib_header(0x79, 0x9c).is_err());
        assert!(check_zlib_header(0x88, 0x1c).is_err());
        assert!(check_zlib_header(0x78, 0xbb).is_err());
    }

    #[test]
    fn test_zdebug_framing()
    {
        let text = b"legacy compressed debug section".repeat(20);
        let mut section = b"ZLIB".to_vec();
        section.extend_from_slice(&(text.len() as u64).to_be_bytes());
        section.extend(zlib(&text, Compression::default()));
        assert_eq!(inflate_zdebug(&section).unwrap(), text);

        assert!(inflate_zdebug(b"ZLIB\0\0\0").is_err());
        let mut bad = section.clone();
        bad[0] = b'X';
        assert!(inflate_zdebug(&bad).is_err());
    }
}
