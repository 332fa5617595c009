//! LZMA2 chunk framing.

use super::lzma::{LzmaDecoder, Properties};
use super::rangecoder::RangeDecoder;
use crate::compress::{reserve, Codec, DecompressError, DecompressResult};

const CODEC: Codec = Codec::Lzma2;

fn be16(input: &[u8], at: usize) -> DecompressResult<usize>
{
    let bytes = input.get(at..at + 2).ok_or(DecompressError::truncated(CODEC))?;
    Ok(usize::from(u16::from_be_bytes([bytes[0], bytes[1]])))
}

/// Decode LZMA2 chunks from the front of `input` until the end marker.
///
/// Output is appended to `out` and may not grow past `limit` bytes in
/// total. Returns the number of input bytes used, end marker included.
pub(crate) fn decode(input: &[u8], out: &mut Vec<u8>, limit: usize) -> DecompressResult<usize>
{
    let mut at = 0;
    let mut dict_start = out.len();
    let mut decoder: Option<LzmaDecoder> = None;
    let mut first = true;

    loop {
        let &control = input.get(at).ok_or(DecompressError::truncated(CODEC))?;
        at += 1;
        if control == 0 {
            return Ok(at);
        }

        let dict_reset = control == 1 || control >= 0xe0;
        if first && !dict_reset {
            return Err(DecompressError::malformed(CODEC, "first chunk does not reset the dictionary"));
        }
        first = false;
        if dict_reset {
            dict_start = out.len();
        }

        if control < 0x80 {
            if control > 2 {
                return Err(DecompressError::malformed(CODEC, "invalid chunk control byte"));
            }
            let size = be16(input, at)? + 1;
            at += 2;
            let data = input.get(at..at + size).ok_or(DecompressError::truncated(CODEC))?;
            if size > limit - out.len() {
                return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
            }
            reserve(CODEC, out, size)?;
            out.extend_from_slice(data);
            at += size;
            continue;
        }

        let unpacked = ((usize::from(control) & 0x1f) << 16) + be16(input, at)? + 1;
        let packed = be16(input, at + 2)? + 1;
        at += 4;

        let reset = (control >> 5) & 3;
        if reset >= 2 {
            let &byte = input.get(at).ok_or(DecompressError::truncated(CODEC))?;
            at += 1;
            decoder = Some(LzmaDecoder::new(Properties::from_byte(byte)?));
        }
        let Some(lzma) = decoder.as_mut() else {
            return Err(DecompressError::malformed(CODEC, "LZMA chunk before any properties"));
        };
        if reset == 1 {
            lzma.reset();
        }

        if unpacked > limit - out.len() {
            return Err(DecompressError::malformed(CODEC, "output exceeds declared size"));
        }
        let data = input.get(at..at + packed).ok_or(DecompressError::truncated(CODEC))?;
        let mut rc = RangeDecoder::new(data)?;
        reserve(CODEC, out, unpacked)?;
        // Produces exactly `unpacked` bytes or fails.
        lzma.decode_chunk(&mut rc, out, dict_start, unpacked)?;
        rc.finish()?;
        at += packed;
    }
}
