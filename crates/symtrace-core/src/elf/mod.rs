//! # ELF Images
//!
//! Parsing of the parts of an ELF object the symbolizer needs: the file
//! header, the section table with its names, the program headers and the
//! handful of sections that lead to symbols and debug information.
//!
//! The headers, notes, symbol tables and compression headers are read with
//! `object::read::elf`, which refuses ranges outside the byte view, so a
//! truncated or hostile file produces [`SymtraceError::MalformedElf`]
//! instead of a panic. A private `View` holds the class-specific
//! `object` types; the rest of the crate sees the class-independent copies
//! in [`header`].
//!
//! ## Supported layouts
//!
//! - ELF32 and ELF64, little and big endian
//! - The extended section numbering used when an object has more than
//!   `SHN_LORESERVE` sections
//! - `SHF_COMPRESSED` sections (zlib and zstd) and legacy `.zdebug_*` sections

pub mod compressed;
pub mod header;
pub mod notes;
pub mod opd;
pub mod scan;
mod view;

use std::ops::Range;

use object::elf::{self, FileHeader32, FileHeader64};
use object::read::elf::FileHeader as ElfHeader;
use object::{Endianness, ReadRef, StringTable};

pub use compressed::CompressedData;
pub use header::{FileHeader, ProgramHeader, SectionHeader};
pub use notes::{BuildId, DebugAltLink, DebugLink};
pub use opd::OpdTable;
pub use scan::{ElfSymbol, SectionScan, SymbolTable};
use view::View;

use crate::error::{Result, SymtraceError};

/// ELF file class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class
{
    Elf32,
    Elf64,
}

/// `e_ident[EI_CLASS]`
const CLASS_OFFSET: usize = 4;

/// The class-specific view an [`ElfFile`] was parsed into.
#[derive(Debug, Clone, Copy)]
enum Layout<'a>
{
    Elf32(View<'a, FileHeader32<Endianness>>),
    Elf64(View<'a, FileHeader64<Endianness>>),
}

/// A parsed ELF image borrowing its bytes.
#[derive(Debug, Clone)]
pub struct ElfFile<'a>
{
    data: &'a [u8],
    header: FileHeader,
    endian: Endianness,
    /// Section table including the null section at index 0.
    sections: Vec<SectionHeader>,
    names: StringTable<'a>,
    view: Layout<'a>,
}

impl<'a> ElfFile<'a>
{
    /// Validate the header and read the section table and its name table.
    pub fn parse(data: &'a [u8]) -> Result<Self>
    {
        if !data.starts_with(&elf::ELFMAG) {
            return Err(SymtraceError::malformed("not an ELF image"));
        }
        match data.get(CLASS_OFFSET).copied() {
            Some(elf::ELFCLASS32) => Self::from_view(data, Class::Elf32, Layout::Elf32),
            Some(elf::ELFCLASS64) => Self::from_view(data, Class::Elf64, Layout::Elf64),
            Some(other) => Err(SymtraceError::malformed(format!("unknown ELF class {other}"))),
            None => Err(SymtraceError::malformed("truncated ELF identification")),
        }
    }

    fn from_view<Elf>(data: &'a [u8], class: Class, wrap: fn(View<'a, Elf>) -> Layout<'a>) -> Result<Self>
    where
        Elf: ElfHeader<Endian = Endianness>,
    {
        let (view, header) = View::<Elf>::parse(data, class)?;
        Ok(Self {
            data,
            header,
            endian: view.endian(),
            sections: view.section_headers(),
            names: view.names(),
            view: wrap(view),
        })
    }

    pub fn header(&self) -> &FileHeader
    {
        &self.header
    }

    pub fn data(&self) -> &'a [u8]
    {
        self.data
    }

    /// All section headers, the null section at index 0 included.
    pub fn sections(&self) -> &[SectionHeader]
    {
        &self.sections
    }

    pub fn section(&self, index: u32) -> Result<&SectionHeader>
    {
        self.sections
            .get(index as usize)
            .ok_or_else(|| SymtraceError::malformed(format!("section index {index} out of range")))
    }

    pub fn section_name(&self, section: &SectionHeader) -> Result<&'a [u8]>
    {
        self.names
            .get(section.name)
            .map_err(|()| SymtraceError::malformed("section name out of range"))
    }

    /// First section called `name`.
    pub fn section_by_name(&self, name: &[u8]) -> Option<&SectionHeader>
    {
        self.sections
            .iter()
            .skip(1)
            .find(|section| self.section_name(section).is_ok_and(|n| n == name))
    }

    /// Raw contents of a section. `SHT_NOBITS` sections are empty.
    pub fn section_data(&self, section: &SectionHeader) -> Result<&'a [u8]>
    {
        if section.kind == elf::SHT_NOBITS {
            return Ok(&[]);
        }
        self.data
            .read_bytes_at(section.offset, section.size)
            .map_err(|()| SymtraceError::malformed("section data runs past the end of the image"))
    }

    /// The program header table; empty when the image has none.
    pub fn program_headers(&self) -> Result<Vec<ProgramHeader>>
    {
        match &self.view {
            Layout::Elf32(view) => view.program_headers(),
            Layout::Elf64(view) => view.program_headers(),
        }
    }

    /// Link-time address range spanned by the `PT_LOAD` segments.
    pub fn load_extent(&self) -> Result<Option<Range<u64>>>
    {
        let extent = self
            .program_headers()?
            .iter()
            .filter(|ph| ph.is_load())
            .map(|ph| ph.vaddr..ph.vaddr.saturating_add(ph.memsz))
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end));
        Ok(extent)
    }

    /// PowerPC64 using the ELFv1 ABI, where function symbols point at `.opd`.
    pub fn uses_function_descriptors(&self) -> bool
    {
        self.header.machine == elf::EM_PPC64 && (self.header.flags & elf::EF_PPC64_ABI) < 2
    }
}

#[cfg(test)]
mod tests
{
    use gimli::RunTimeEndian;

    use super::*;

    /// Minimal little-endian ELF64: header, `.shstrtab` and `.text`.
    fn tiny_elf64() -> Vec<u8>
    {
        let names = b"\0.shstrtab\0.text\0";
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(&elf::ELFMAG);
        data[4] = elf::ELFCLASS64;
        data[5] = elf::ELFDATA2LSB;
        data[6] = elf::EV_CURRENT;
        data[16..18].copy_from_slice(&2u16.to_le_bytes());
        data[18..20].copy_from_slice(&62u16.to_le_bytes());
        let names_offset = data.len() as u64;
        data.extend_from_slice(names);
        while data.len() % 8 != 0 {
            data.push(0);
        }
        let shoff = data.len() as u64;
        data[40..48].copy_from_slice(&shoff.to_le_bytes());
        data[58..60].copy_from_slice(&64u16.to_le_bytes());
        data[60..62].copy_from_slice(&3u16.to_le_bytes());
        data[62..64].copy_from_slice(&1u16.to_le_bytes());

        let mut section = |name: u32, kind: u32, offset: u64, size: u64| {
            let mut entry = [0u8; 64];
            entry[0..4].copy_from_slice(&name.to_le_bytes());
            entry[4..8].copy_from_slice(&kind.to_le_bytes());
            entry[24..32].copy_from_slice(&offset.to_le_bytes());
            entry[32..40].copy_from_slice(&size.to_le_bytes());
            data.extend_from_slice(&entry);
        };
        section(0, 0, 0, 0);
        section(1, elf::SHT_STRTAB, names_offset, names.len() as u64);
        section(11, elf::SHT_NOBITS, 0, 0x100);
        data
    }

    #[test]
    fn test_parse_tiny_image()
    {
        let data = tiny_elf64();
        let file = ElfFile::parse(&data).unwrap();
        assert_eq!(file.header().class, Class::Elf64);
        assert_eq!(file.header().endian, RunTimeEndian::Little);
        assert_eq!(file.sections().len(), 3);

        let text = file.section_by_name(b".text").unwrap();
        assert_eq!(text.kind, elf::SHT_NOBITS);
        assert!(file.section_data(text).unwrap().is_empty());
        assert!(file.section_by_name(b".data").is_none());
        assert!(file.program_headers().unwrap().is_empty());
        assert_eq!(file.load_extent().unwrap(), None);
    }

    #[test]
    fn test_rejects_bad_identification()
    {
        let good = tiny_elf64();

        let mut data = good.clone();
        data[0] = 0;
        assert!(ElfFile::parse(&data).is_err());

        let mut data = good.clone();
        data[4] = 3;
        assert!(ElfFile::parse(&data).is_err());

        let mut data = good.clone();
        data[6] = 2;
        assert!(ElfFile::parse(&data).is_err());

        assert!(ElfFile::parse(&good[..40]).is_err());
    }

    #[test]
    fn test_rejects_section_table_past_end()
    {
        let mut data = tiny_elf64();
        data[60..62].copy_from_slice(&200u16.to_le_bytes());
        assert!(matches!(ElfFile::parse(&data), Err(SymtraceError::MalformedElf(_))));
    }

    #[test]
    fn test_zero_sections_is_malformed()
    {
        let mut data = tiny_elf64();
        data[40..48].copy_from_slice(&0u64.to_le_bytes());
        data[60..62].copy_from_slice(&0u16.to_le_bytes());
        assert!(ElfFile::parse(&data).is_err());
    }

    #[test]
    fn test_skewed_overflow_string_index()
    {
        // Index 0xff01 written by old binutils as 0x10001.
        let count = 0xff02usize;
        let names_index = count - 1;
        let names = b"\0.shstrtab\0";

        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(&elf::ELFMAG);
        data[4] = elf::ELFCLASS64;
        data[5] = elf::ELFDATA2LSB;
        data[6] = elf::EV_CURRENT;
        data.extend_from_slice(names);
        while data.len() % 8 != 0 {
            data.push(0);
        }
        let shoff = data.len();
        data[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        data[58..60].copy_from_slice(&64u16.to_le_bytes());
        data[62..64].copy_from_slice(&elf::SHN_XINDEX.to_le_bytes());
        data.resize(shoff + count * 64, 0);

        data[shoff + 32..shoff + 40].copy_from_slice(&(count as u64).to_le_bytes());
        let skewed = names_index as u32 + 0x100;
        data[shoff + 40..shoff + 44].copy_from_slice(&skewed.to_le_bytes());
        let entry = shoff + names_index * 64;
        data[entry..entry + 4].copy_from_slice(&1u32.to_le_bytes());
        data[entry + 4..entry + 8].copy_from_slice(&elf::SHT_STRTAB.to_le_bytes());
        data[entry + 24..entry + 32].copy_from_slice(&64u64.to_le_bytes());
        data[entry + 32..entry + 40].copy_from_slice(&(names.len() as u64).to_le_bytes());

        let file = ElfFile::parse(&data).unwrap();
        assert_eq!(file.header().section_count, count as u32);
        assert_eq!(file.header().string_table_index, names_index as u32);
        let names_section = file.section(names_index as u32).unwrap();
        assert_eq!(file.section_name(names_section).unwrap(), b".shstrtab");

        // Past the table but below the skewed range: plain out of range.
        data[shoff + 40..shoff + 44].copy_from_slice(&(count as u32 + 3).to_le_bytes());
        assert!(matches!(ElfFile::parse(&data), Err(SymtraceError::MalformedElf(_))));
    }
}
