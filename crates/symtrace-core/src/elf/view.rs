//! Class-specific access to an image through `object`'s ELF types.
//!
//! [`View`] is generic over `FileHeader32`/`FileHeader64`. Everything the
//! rest of the crate keeps beyond one call is copied out into the
//! class-independent types of [`super::header`] and [`super::scan`].

use object::elf;
use object::read::elf::{
    CompressionHeader as _, FileHeader as ElfHeader, SectionHeader as _, SectionTable, Sym as _,
    SymbolTable as ElfSymbols,
};
use object::{Endianness, ReadRef, SectionIndex, StringTable};

use super::compressed::CompressedData;
use super::header::{FileHeader, ProgramHeader, SectionHeader};
use super::scan::{ElfSymbol, SymbolTable};
use super::Class;
use crate::error::{Result, SymtraceError};

/// The image as seen through one ELF class.
#[derive(Debug, Clone, Copy)]
pub(super) struct View<'a, Elf: ElfHeader>
{
    data: &'a [u8],
    endian: Endianness,
    header: &'a Elf,
    sections: SectionTable<'a, Elf>,
    names: StringTable<'a>,
}

impl<'a, Elf> View<'a, Elf>
where
    Elf: ElfHeader<Endian = Endianness>,
{
    /// Validate the header and locate the section table and its names.
    pub(super) fn parse(data: &'a [u8], class: Class) -> Result<(Self, FileHeader)>
    {
        let header = Elf::parse(data)?;
        let endian = header.endian()?;
        let headers = header.section_headers(endian, data)?;
        let summary = FileHeader::read(header, class, endian, data, headers.len())?;

        let names_section = headers
            .get(summary.string_table_index as usize)
            .ok_or_else(|| SymtraceError::malformed("section name table index out of range"))?;
        let names = match names_section.file_range(endian) {
            Some((offset, size)) => {
                let end = offset
                    .checked_add(size)
                    .ok_or_else(|| SymtraceError::malformed("section name table size overflows"))?;
                StringTable::new(data, offset, end)
            }
            None => StringTable::default(),
        };

        let view = Self {
            data,
            endian,
            header,
            sections: SectionTable::new(headers, names),
            names,
        };
        Ok((view, summary))
    }

    pub(super) fn endian(&self) -> Endianness
    {
        self.endian
    }

    pub(super) fn names(&self) -> StringTable<'a>
    {
        self.names
    }

    /// Class-independent copies of every section header, index 0 included.
    pub(super) fn section_headers(&self) -> Vec<SectionHeader>
    {
        self.sections
            .enumerate()
            .map(|(index, raw)| SectionHeader::from_raw(index.0 as u32, raw, self.endian))
            .collect()
    }

    pub(super) fn program_headers(&self) -> Result<Vec<ProgramHeader>>
    {
        Ok(self
            .header
            .program_headers(self.endian, self.data)?
            .iter()
            .map(|raw| ProgramHeader::from_raw(raw, self.endian))
            .collect())
    }

    fn raw(&self, section: &SectionHeader) -> Result<&'a Elf::SectionHeader>
    {
        Ok(self.sections.section(SectionIndex(section.index as usize))?)
    }

    /// Payload of the first GNU build-id note in a `SHT_NOTE` section.
    pub(super) fn build_id(&self, section: &SectionHeader) -> Result<Option<&'a [u8]>>
    {
        let mut notes = match self.raw(section)?.notes(self.endian, self.data)? {
            Some(notes) => notes,
            None => return Ok(None),
        };
        while let Some(note) = notes.next()? {
            if note.name() == elf::ELF_NOTE_GNU && note.n_type(self.endian) == elf::NT_GNU_BUILD_ID {
                return Ok(Some(note.desc()));
            }
        }
        Ok(None)
    }

    /// Symbols of a `.symtab` or `.dynsym` section and its linked strings.
    pub(super) fn symbols(&self, section: &SectionHeader, dynamic: bool) -> Result<SymbolTable<'a>>
    {
        if section.link == 0 || section.link as usize >= self.sections.len() {
            return Err(SymtraceError::malformed("symbol table string link out of range"));
        }
        let index = SectionIndex(section.index as usize);
        let table = ElfSymbols::parse(self.endian, self.data, &self.sections, index, self.raw(section)?)?;
        let strings = self
            .sections
            .section(table.string_section())?
            .data(self.endian, self.data)?;

        let symbols = table
            .iter()
            .map(|sym| ElfSymbol {
                name: sym.st_name(self.endian),
                kind: sym.st_type(),
                section: sym.st_shndx(self.endian),
                value: sym.st_value(self.endian).into(),
                size: sym.st_size(self.endian).into(),
            })
            .collect();
        Ok(SymbolTable {
            symbols,
            strings,
            dynamic,
        })
    }

    /// The `Elf*_Chdr` of an `SHF_COMPRESSED` section and the payload after it.
    pub(super) fn compression(&self, section: &SectionHeader) -> Result<Option<CompressedData<'a>>>
    {
        let (chdr, offset, size) = match self.raw(section)?.compression(self.endian, self.data)? {
            Some(found) => found,
            None => return Ok(None),
        };
        let payload = self
            .data
            .read_bytes_at(offset, size)
            .map_err(|()| SymtraceError::malformed("compressed section runs past the end of the image"))?;
        Ok(Some(CompressedData {
            kind: chdr.ch_type(self.endian),
            size: chdr.ch_size(self.endian).into(),
            payload,
        }))
    }
}
