//! # DWARF Collaborator
//!
//! The engine does not interpret DWARF itself. It gathers and decompresses
//! the debug sections of an image into a [`DebugBundle`] and hands them to a
//! [`DwarfLoader`], which returns a [`LineResolver`] answering
//! address-to-source queries for that image.
//!
//! [`Addr2lineLoader`] is the default loader, built on `addr2line` and
//! `gimli`. Anything else implementing the traits can replace it, for
//! example a test double that records what it was given.

use std::sync::{Arc, Mutex};

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use tracing::debug;

use crate::error::{Result, SymtraceError};
use crate::symbols::demangle::make_symbol_name;
use crate::types::{SourceFrame, SourceFrames, SourceLocation};

type OwnedReader = EndianArcSlice<RunTimeEndian>;

/// The debug sections handed to the DWARF consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugSection
{
    Info,
    Line,
    Abbrev,
    Ranges,
    Str,
    Addr,
    StrOffsets,
    LineStr,
    Rnglists,
}

impl DebugSection
{
    pub const COUNT: usize = 9;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Info,
        Self::Line,
        Self::Abbrev,
        Self::Ranges,
        Self::Str,
        Self::Addr,
        Self::StrOffsets,
        Self::LineStr,
        Self::Rnglists,
    ];

    pub const fn index(self) -> usize
    {
        self as usize
    }

    /// Section name, e.g. `.debug_info`.
    pub const fn name(self) -> &'static str
    {
        match self {
            Self::Info => ".debug_info",
            Self::Line => ".debug_line",
            Self::Abbrev => ".debug_abbrev",
            Self::Ranges => ".debug_ranges",
            Self::Str => ".debug_str",
            Self::Addr => ".debug_addr",
            Self::StrOffsets => ".debug_str_offsets",
            Self::LineStr => ".debug_line_str",
            Self::Rnglists => ".debug_rnglists",
        }
    }

    /// Legacy compressed name, e.g. `.zdebug_info`.
    pub fn zname(self) -> String
    {
        format!(".z{}", &self.name()[1..])
    }

    pub fn from_name(name: &[u8]) -> Option<Self>
    {
        Self::ALL.into_iter().find(|s| s.name().as_bytes() == name)
    }

    pub fn from_zname(name: &[u8]) -> Option<Self>
    {
        let rest = name.strip_prefix(b".z")?;
        Self::ALL.into_iter().find(|s| &s.name().as_bytes()[1..] == rest)
    }

    fn from_section_id(id: SectionId) -> Option<Self>
    {
        Some(match id {
            SectionId::DebugInfo => Self::Info,
            SectionId::DebugLine => Self::Line,
            SectionId::DebugAbbrev => Self::Abbrev,
            SectionId::DebugRanges => Self::Ranges,
            SectionId::DebugStr => Self::Str,
            SectionId::DebugAddr => Self::Addr,
            SectionId::DebugStrOffsets => Self::StrOffsets,
            SectionId::DebugLineStr => Self::LineStr,
            SectionId::DebugRngLists => Self::Rnglists,
            _ => return None,
        })
    }
}

/// Decompressed debug sections of one image.
///
/// Each section is shared, so the bundle can be cloned into a loader or kept
/// as the supplementary context of another image cheaply.
#[derive(Debug, Clone, Default)]
pub struct DebugBundle
{
    sections: [Option<Arc<[u8]>>; DebugSection::COUNT],
}

impl DebugBundle
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn insert(&mut self, section: DebugSection, data: impl Into<Arc<[u8]>>)
    {
        self.sections[section.index()] = Some(data.into());
    }

    pub fn get(&self, section: DebugSection) -> Option<&[u8]>
    {
        self.sections[section.index()].as_deref()
    }

    pub fn contains(&self, section: DebugSection) -> bool
    {
        self.sections[section.index()].is_some()
    }

    pub fn is_empty(&self) -> bool
    {
        self.sections.iter().all(Option::is_none)
    }

    /// Total size of all sections in bytes.
    pub fn total_size(&self) -> usize
    {
        self.sections.iter().flatten().map(|s| s.len()).sum()
    }

    fn reader(&self, id: SectionId, endian: RunTimeEndian) -> OwnedReader
    {
        let data = DebugSection::from_section_id(id)
            .and_then(|section| self.sections[section.index()].clone())
            .unwrap_or_else(|| Arc::from(Vec::new()));
        EndianArcSlice::new(data, endian)
    }
}

/// What a [`DwarfLoader`] is given for one image.
#[derive(Debug, Clone, Copy)]
pub struct DwarfRequest<'a>
{
    /// Load bias of the image; runtime addresses minus this are link-time addresses
    pub base_address: u64,
    pub sections: &'a DebugBundle,
    pub endian: RunTimeEndian,
    /// Sections of the `.gnu_debugaltlink` target, if any
    pub supplementary: Option<&'a DebugBundle>,
}

/// Address-to-source lookups for one image.
pub trait LineResolver: Send + Sync
{
    /// Frames at runtime address `address`, innermost inlined frame first.
    ///
    /// Returns an empty list when the address has no line information.
    fn find_frames(&self, address: u64) -> SourceFrames;
}

/// Turns a [`DwarfRequest`] into a [`LineResolver`].
pub trait DwarfLoader: Send + Sync
{
    fn load(&self, request: DwarfRequest<'_>) -> Result<Box<dyn LineResolver>>;
}

/// Default loader backed by `addr2line`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Addr2lineLoader;

impl DwarfLoader for Addr2lineLoader
{
    fn load(&self, request: DwarfRequest<'_>) -> Result<Box<dyn LineResolver>>
    {
        let endian = request.endian;
        let mut dwarf = Dwarf::load(|id| Ok::<_, gimli::Error>(request.sections.reader(id, endian)))
            .map_err(|err| SymtraceError::Dwarf(format!("failed to load DWARF: {err}")))?;
        if let Some(sup) = request.supplementary {
            debug!("attaching {} bytes of supplementary DWARF", sup.total_size());
            dwarf
                .load_sup(|id| Ok::<_, gimli::Error>(sup.reader(id, endian)))
                .map_err(|err| SymtraceError::Dwarf(format!("failed to load supplementary DWARF: {err}")))?;
        }
        let context = Context::from_dwarf(dwarf)
            .map_err(|err| SymtraceError::Dwarf(format!("failed to build addr2line context: {err}")))?;

        Ok(Box::new(Addr2lineResolver {
            base_address: request.base_address,
            context: Mutex::new(context),
        }))
    }
}

struct Addr2lineResolver
{
    base_address: u64,
    context: Mutex<Context<OwnedReader>>,
}

impl LineResolver for Addr2lineResolver
{
    fn find_frames(&self, address: u64) -> SourceFrames
    {
        let mut frames = SourceFrames::new();
        let Some(probe) = address.checked_sub(self.base_address) else {
            return frames;
        };
        let Ok(context) = self.context.lock() else {
            return frames;
        };
        let Ok(mut iter) = context.find_frames(probe).skip_all_loads() else {
            return frames;
        };

        while let Ok(Some(frame)) = iter.next() {
            let function = frame
                .function
                .as_ref()
                .and_then(|func| func.raw_name().ok())
                .map(|raw| make_symbol_name(raw.into_owned()));
            let location = frame.location.and_then(|loc| {
                loc.file.map(|file| SourceLocation {
                    file: file.to_string(),
                    line: loc.line,
                    column: loc.column,
                })
            });
            if function.is_some() || location.is_some() {
                frames.push(SourceFrame { function, location });
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_section_names()
    {
        assert_eq!(DebugSection::from_name(b".debug_info"), Some(DebugSection::Info));
        assert_eq!(DebugSection::from_name(b".debug_line_str"), Some(DebugSection::LineStr));
        assert_eq!(DebugSection::from_name(b".debug_frame"), None);
        assert_eq!(DebugSection::from_zname(b".zdebug_str_offsets"), Some(DebugSection::StrOffsets));
        assert_eq!(DebugSection::from_zname(b".debug_info"), None);
        assert_eq!(DebugSection::Rnglists.zname(), ".zdebug_rnglists");
        for (i, section) in DebugSection::ALL.iter().enumerate() {
            assert_eq!(section.index(), i);
        }
    }

    #[test]
    fn test_bundle()
    {
        let mut bundle = DebugBundle::new();
        assert!(bundle.is_empty());
        bundle.insert(DebugSection::Line, vec![1, 2, 3]);
        assert!(bundle.contains(DebugSection::Line));
        assert_eq!(bundle.get(DebugSection::Line), Some(&[1u8, 2, 3][..]));
        assert_eq!(bundle.get(DebugSection::Info), None);
        assert_eq!(bundle.total_size(), 3);
    }

    #[test]
    fn test_empty_dwarf_resolves_nothing()
    {
        let bundle = DebugBundle::new();
        let resolver = Addr2lineLoader
            .load(DwarfRequest {
                base_address: 0x1000,
                sections: &bundle,
                endian: RunTimeEndian::Little,
                supplementary: None,
            })
            .unwrap();
        assert!(resolver.find_frames(0x1234).is_empty());
        assert!(resolver.find_frames(0x10).is_empty());
    }
}
