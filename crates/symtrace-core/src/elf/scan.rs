//! One pass over the section table, classifying what the locator needs.

use object::elf;
use tracing::{debug, trace};

use super::notes::{BuildId, DebugAltLink, DebugLink};
use super::opd::OpdTable;
use super::{ElfFile, Layout, SectionHeader};
use crate::dwarf::DebugSection;
use crate::error::Result;

/// One `Elf32_Sym`/`Elf64_Sym` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfSymbol
{
    /// Offset of the name in the linked string table
    pub name: u32,
    /// `STT_*` from the low nibble of `st_info`
    pub kind: u8,
    /// `st_shndx`
    pub section: u16,
    pub value: u64,
    pub size: u64,
}

/// Symbol table entries and the string table their names index into.
#[derive(Debug, Clone)]
pub struct SymbolTable<'a>
{
    /// Every entry, the null symbol at index 0 included.
    pub symbols: Vec<ElfSymbol>,
    pub strings: &'a [u8],
    /// Taken from `.dynsym` because the image has no `.symtab`.
    pub dynamic: bool,
}

/// Everything of interest found in an image's sections.
#[derive(Debug, Clone, Default)]
pub struct SectionScan<'a>
{
    /// Canonical `.debug_*` sections, possibly `SHF_COMPRESSED`.
    pub debug: [Option<SectionHeader>; DebugSection::COUNT],
    /// Legacy `.zdebug_*` siblings.
    pub zdebug: [Option<SectionHeader>; DebugSection::COUNT],
    pub build_id: Option<BuildId>,
    pub debug_link: Option<DebugLink>,
    pub alt_link: Option<DebugAltLink>,
    /// Compressed mini debug info image.
    pub debug_data: Option<&'a [u8]>,
    pub symbols: Option<SymbolTable<'a>>,
    pub opd: Option<OpdTable>,
}

impl SectionScan<'_>
{
    /// Whether any debug section, plain or legacy-compressed, was found.
    pub fn has_debug_sections(&self) -> bool
    {
        self.debug.iter().chain(self.zdebug.iter()).any(Option::is_some)
    }

    /// Names of the debug sections stored compressed, in canonical order.
    pub fn compressed_sections(&self) -> Vec<String>
    {
        let mut names = Vec::new();
        for section in DebugSection::ALL {
            if self.debug[section.index()].is_some_and(|s| s.is_compressed()) {
                names.push(section.name().to_string());
            }
            if self.zdebug[section.index()].is_some() {
                names.push(section.zname());
            }
        }
        names
    }
}

impl<'a> ElfFile<'a>
{
    /// Payload of the first GNU build-id note in a `SHT_NOTE` section.
    pub fn build_id(&self, section: &SectionHeader) -> Result<Option<&'a [u8]>>
    {
        match &self.view {
            Layout::Elf32(view) => view.build_id(section),
            Layout::Elf64(view) => view.build_id(section),
        }
    }

    /// Classify every section by name.
    ///
    /// Malformed link records (a debug link without its CRC, a note section
    /// that cannot be walked) are dropped. A symbol table whose string table
    /// link is out of range fails the scan.
    pub fn scan(&self) -> Result<SectionScan<'a>>
    {
        let mut scan = SectionScan::default();
        let mut symtab = None;
        let mut dynsym = None;

        for section in self.sections().iter().skip(1) {
            match section.kind {
                elf::SHT_SYMTAB if symtab.is_none() => symtab = Some(*section),
                elf::SHT_DYNSYM if dynsym.is_none() => dynsym = Some(*section),
                _ => {}
            }

            let name = self.section_name(section)?;
            trace!("section {}", String::from_utf8_lossy(name));

            if let Some(which) = DebugSection::from_name(name) {
                scan.debug[which.index()].get_or_insert(*section);
                continue;
            }
            if let Some(which) = DebugSection::from_zname(name) {
                scan.zdebug[which.index()].get_or_insert(*section);
                continue;
            }

            if section.kind == elf::SHT_NOTE && scan.build_id.is_none() {
                match self.build_id(section) {
                    Ok(Some(desc)) if !desc.is_empty() => scan.build_id = Some(BuildId::new(desc)),
                    Ok(_) => {}
                    Err(err) => debug!("ignoring notes: {err}"),
                }
                continue;
            }

            match name {
                b".gnu_debuglink" if scan.debug_link.is_none() => {
                    match DebugLink::parse(self.section_data(section)?, self.endian) {
                        Ok(link) => scan.debug_link = Some(link),
                        Err(err) => debug!("ignoring debug link: {err}"),
                    }
                }
                b".gnu_debugaltlink" if scan.alt_link.is_none() => {
                    match DebugAltLink::parse(self.section_data(section)?) {
                        Ok(link) => scan.alt_link = Some(link),
                        Err(err) => debug!("ignoring alternate debug link: {err}"),
                    }
                }
                b".gnu_debugdata" if scan.debug_data.is_none() => {
                    scan.debug_data = Some(self.section_data(section)?);
                }
                b".opd" if section.kind == elf::SHT_PROGBITS && self.uses_function_descriptors() => {
                    scan.opd = Some(OpdTable::new(
                        section.address,
                        self.section_data(section)?,
                        self.endian,
                        self.header().class,
                    ));
                }
                _ => {}
            }
        }

        if let Some((table, dynamic)) = symtab.map(|s| (s, false)).or(dynsym.map(|s| (s, true))) {
            scan.symbols = Some(match &self.view {
                Layout::Elf32(view) => view.symbols(&table, dynamic)?,
                Layout::Elf64(view) => view.symbols(&table, dynamic)?,
            });
        }

        debug!(
            "scanned {} sections: symbols={} build_id={} debug_link={} alt_link={} debug_data={}",
            self.sections().len(),
            scan.symbols.is_some(),
            scan.build_id.is_some(),
            scan.debug_link.is_some(),
            scan.alt_link.is_some(),
            scan.debug_data.is_some()
        );
        Ok(scan)
    }
}
