//! Compressed section contents.
//!
//! Two conventions exist. Modern toolchains set `SHF_COMPRESSED` and put an
//! `Elf*_Chdr` in front of the payload; older ones rename the section to
//! `.zdebug_*` and prefix it with `"ZLIB"` and a big-endian length.

use object::elf;
use tracing::trace;

use super::header::SectionHeader;
use super::{ElfFile, Layout};
use crate::compress::{deflate, zstd};
use crate::error::{Result, SymtraceError};

/// An `SHF_COMPRESSED` section split at its compression header.
#[derive(Debug, Clone, Copy)]
pub struct CompressedData<'a>
{
    /// `ch_type`
    pub kind: u32,
    /// Size of the decoded contents
    pub size: u64,
    pub payload: &'a [u8],
}

impl<'a> ElfFile<'a>
{
    /// Split an `SHF_COMPRESSED` section into header fields and payload.
    ///
    /// `None` when the section is not compressed.
    pub fn compression(&self, section: &SectionHeader) -> Result<Option<CompressedData<'a>>>
    {
        match &self.view {
            Layout::Elf32(view) => view.compression(section),
            Layout::Elf64(view) => view.compression(section),
        }
    }

    /// Decode an `SHF_COMPRESSED` section.
    ///
    /// ## Errors
    ///
    /// [`SymtraceError::MalformedElf`] when the section is shorter than its
    /// compression header. [`SymtraceError::UnsupportedCompression`] for a
    /// `ch_type` other than zlib or zstd; decoder errors otherwise.
    pub fn decompress_section(&self, section: &SectionHeader) -> Result<Vec<u8>>
    {
        let compressed = self
            .compression(section)?
            .ok_or_else(|| SymtraceError::malformed("section is not SHF_COMPRESSED"))?;
        let size = usize::try_from(compressed.size)
            .map_err(|_| SymtraceError::malformed("compressed section too large for this host"))?;
        trace!(
            "decompressing {} -> {} bytes, type {}",
            compressed.payload.len(),
            size,
            compressed.kind
        );

        match compressed.kind {
            elf::ELFCOMPRESS_ZLIB => Ok(deflate::inflate_zlib(compressed.payload, size)?),
            elf::ELFCOMPRESS_ZSTD => Ok(zstd::decompress(compressed.payload, size)?),
            other => Err(SymtraceError::UnsupportedCompression(other)),
        }
    }

    /// Decode a legacy `.zdebug_*` section.
    pub fn decompress_zdebug(&self, section: &SectionHeader) -> Result<Vec<u8>>
    {
        Ok(deflate::inflate_zdebug(self.section_data(section)?)?)
    }
}
