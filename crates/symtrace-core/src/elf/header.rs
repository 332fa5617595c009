//! File, section and program headers.
//!
//! `object` hands out class-specific header types. The locator works on the
//! class-independent copies below, taken once when the image is parsed.

use gimli::RunTimeEndian;
use object::elf;
use object::read::elf::{FileHeader as ElfHeader, ProgramHeader as ElfProgramHeader, SectionHeader as ElfSection};
use object::Endianness;

use super::Class;
use crate::error::{Result, SymtraceError};

/// Legacy binutils (2.12 to 2.18) offset large section indices by this much.
const BINUTILS_INDEX_SKEW: u32 = 0x100;

/// The parts of the ELF file header the locator needs.
///
/// `section_count` and `string_table_index` are already resolved through
/// section 0 when the header uses the overflow encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader
{
    pub class: Class,
    pub endian: RunTimeEndian,
    pub kind: u16,
    pub machine: u16,
    pub flags: u32,
    pub section_header_offset: u64,
    pub section_count: u32,
    pub string_table_index: u32,
}

impl FileHeader
{
    /// Summarize `raw`, whose section table holds `section_count` entries.
    ///
    /// ## Errors
    ///
    /// An empty section table, or a string-table index that is zero or out
    /// of range once the overflow encoding has been undone.
    pub(super) fn read<Elf>(raw: &Elf, class: Class, endian: Endianness, data: &[u8], section_count: usize) -> Result<Self>
    where
        Elf: ElfHeader<Endian = Endianness>,
    {
        let section_count = u32::try_from(section_count)
            .map_err(|_| SymtraceError::malformed("section count does not fit in 32 bits"))?;
        if section_count == 0 {
            return Err(SymtraceError::malformed("image has no section table"));
        }

        Ok(Self {
            class,
            endian: match endian {
                Endianness::Little => RunTimeEndian::Little,
                Endianness::Big => RunTimeEndian::Big,
            },
            kind: raw.e_type(endian),
            machine: raw.e_machine(endian),
            flags: raw.e_flags(endian),
            section_header_offset: raw.e_shoff(endian).into(),
            section_count,
            string_table_index: string_table_index(raw, endian, data, section_count)?,
        })
    }
}

/// `e_shstrndx`, following section 0 for the overflow encoding.
///
/// Old binutils wrote the overflowed index skewed by [`BINUTILS_INDEX_SKEW`];
/// an index that only fits the table after removing the skew is taken as such.
fn string_table_index<Elf>(raw: &Elf, endian: Endianness, data: &[u8], section_count: u32) -> Result<u32>
where
    Elf: ElfHeader<Endian = Endianness>,
{
    let mut index = raw.shstrndx(endian, data)?;
    if raw.e_shstrndx(endian) == elf::SHN_XINDEX {
        let reserved = u32::from(elf::SHN_LORESERVE) + BINUTILS_INDEX_SKEW;
        if index >= section_count && index >= reserved {
            index -= BINUTILS_INDEX_SKEW;
        }
    }
    if index >= section_count {
        return Err(SymtraceError::malformed("section name table index out of range"));
    }
    Ok(index)
}

/// One entry of the section header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader
{
    /// Position in the section table
    pub index: u32,
    pub name: u32,
    pub kind: u32,
    pub flags: u64,
    pub address: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub entry_size: u64,
}

impl SectionHeader
{
    pub(super) fn from_raw<S>(index: u32, raw: &S, endian: Endianness) -> Self
    where
        S: ElfSection<Endian = Endianness>,
    {
        Self {
            index,
            name: raw.sh_name(endian),
            kind: raw.sh_type(endian),
            flags: raw.sh_flags(endian).into(),
            address: raw.sh_addr(endian).into(),
            offset: raw.sh_offset(endian).into(),
            size: raw.sh_size(endian).into(),
            link: raw.sh_link(endian),
            entry_size: raw.sh_entsize(endian).into(),
        }
    }

    pub fn is_compressed(&self) -> bool
    {
        self.flags & u64::from(elf::SHF_COMPRESSED) != 0
    }
}

/// One entry of the program header table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader
{
    pub kind: u32,
    pub vaddr: u64,
    pub memsz: u64,
}

impl ProgramHeader
{
    pub(super) fn from_raw<P>(raw: &P, endian: Endianness) -> Self
    where
        P: ElfProgramHeader<Endian = Endianness>,
    {
        Self {
            kind: raw.p_type(endian),
            vaddr: raw.p_vaddr(endian).into(),
            memsz: raw.p_memsz(endian).into(),
        }
    }

    pub fn is_load(&self) -> bool
    {
        self.kind == elf::PT_LOAD
    }
}
