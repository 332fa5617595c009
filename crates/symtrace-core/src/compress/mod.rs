//! # Decoders
//!
//! Self-contained decoders for the three compression formats found in ELF
//! images produced by common toolchains:
//!
//! - [`deflate`]: zlib streams, both the legacy `.zdebug_*` framing and
//!   `SHF_COMPRESSED` sections with `ELFCOMPRESS_ZLIB`
//! - [`zstd`]: Zstandard frames in `SHF_COMPRESSED` sections with
//!   `ELFCOMPRESS_ZSTD`
//! - [`xz`]: the XZ container with a single LZMA2 filter, used for the
//!   embedded `.gnu_debugdata` image
//!
//! All decoders work on a complete input slice and produce a freshly
//! allocated buffer. They stop at the first inconsistency: a short or corrupt
//! output is never returned.

pub mod bits;
pub mod checksum;
pub mod deflate;
pub mod xz;
pub mod zstd;

use std::fmt;

use thiserror::Error;

/// Compression format a [`DecompressError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec
{
    /// zlib-wrapped DEFLATE
    Zlib,
    /// Zstandard
    Zstd,
    /// XZ container
    Xz,
    /// LZMA2 chunks inside an XZ block
    Lzma2,
}

impl fmt::Display for Codec
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            Codec::Zlib => "zlib",
            Codec::Zstd => "zstd",
            Codec::Xz => "xz",
            Codec::Lzma2 => "lzma2",
        };
        write!(f, "{label}")
    }
}

/// Decoder failure.
///
/// Every variant is fatal for the payload being decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecompressError
{
    /// The input ended before the decoder was done.
    #[error("{codec} stream truncated")]
    Truncated
    {
        /// Format being decoded
        codec: Codec,
    },

    /// The input violates the format.
    #[error("{codec} stream malformed: {reason}")]
    Malformed
    {
        /// Format being decoded
        codec: Codec,
        /// What was wrong
        reason: &'static str,
    },

    /// An embedded checksum disagrees with the decoded data.
    #[error("{codec} checksum mismatch: stored {expected:#x}, computed {actual:#x}")]
    ChecksumMismatch
    {
        /// Format being decoded
        codec: Codec,
        /// Value stored in the stream
        expected: u64,
        /// Value computed over the data
        actual: u64,
    },

    /// The decoded size disagrees with a size declared elsewhere.
    #[error("{codec} size mismatch: declared {expected} bytes, produced {actual}")]
    SizeMismatch
    {
        /// Format being decoded
        codec: Codec,
        /// Declared size
        expected: u64,
        /// Actual size
        actual: u64,
    },

    /// The output buffer could not be allocated.
    #[error("{codec} output of {requested} bytes could not be allocated")]
    Allocation
    {
        /// Format being decoded
        codec: Codec,
        /// Requested size in bytes
        requested: usize,
    },

    /// The stream uses a feature this decoder does not implement.
    #[error("{codec} feature not supported: {feature}")]
    Unsupported
    {
        /// Format being decoded
        codec: Codec,
        /// Feature name
        feature: &'static str,
    },
}

impl DecompressError
{
    pub(crate) const fn malformed(codec: Codec, reason: &'static str) -> Self
    {
        DecompressError::Malformed { codec, reason }
    }

    pub(crate) const fn truncated(codec: Codec) -> Self
    {
        DecompressError::Truncated { codec }
    }
}

/// Convenience alias used throughout the decoders.
pub type DecompressResult<T> = std::result::Result<T, DecompressError>;

/// Allocate an output buffer, surfacing allocation failure as an error.
pub(crate) fn output_buffer(codec: Codec, capacity: usize) -> DecompressResult<Vec<u8>>
{
    let mut out = Vec::new();
    out.try_reserve_exact(capacity)
        .map_err(|_| DecompressError::Allocation { codec, requested: capacity })?;
    Ok(out)
}

/// Grow `out` by `additional` bytes of capacity or fail with an allocation error.
pub(crate) fn reserve(codec: Codec, out: &mut Vec<u8>, additional: usize) -> DecompressResult<()>
{
    out.try_reserve(additional).map_err(|_| DecompressError::Allocation {
        codec,
        requested: out.len().saturating_add(additional),
    })
}

/// Copy `length` bytes starting `distance` bytes back from the end of `out`.
///
/// Overlapping copies (`distance < length`) repeat the most recent bytes, so
/// the copy runs byte by byte in that case.
pub(crate) fn copy_match(out: &mut Vec<u8>, distance: usize, length: usize)
{
    let start = out.len() - distance;
    if distance >= length {
        out.extend_from_within(start..start + length);
    } else {
        for i in 0..length {
            let byte = out[start + i];
            out.push(byte);
        }
    }
}
