//! Sorted symbol table of one image.

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use object::elf;
use tracing::{debug, trace};

use super::demangle::make_symbol_name;
use crate::elf::{OpdTable, SymbolTable};
use crate::error::{Result, SymtraceError};
use crate::types::{Address, SymbolInfo};

/// One function or data symbol, relocated to its runtime address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolEntry
{
    /// Offset of the name in the owning index's string table
    pub name: u32,
    pub address: u64,
    pub size: u64,
}

impl SymbolEntry
{
    fn contains(&self, address: u64) -> bool
    {
        address >= self.address && address - self.address < self.size
    }
}

/// Immutable, address-sorted symbols of one image.
///
/// Holds its own copy of the string table so entries stay valid after the
/// image bytes are released.
#[derive(Debug, Clone)]
pub struct SymbolIndex
{
    module: Arc<str>,
    strings: Arc<[u8]>,
    entries: Vec<SymbolEntry>,
    /// Lowest start to highest end over all entries.
    range: Range<u64>,
}

impl SymbolIndex
{
    /// Build the index from the entries of a `.symtab` or `.dynsym`.
    ///
    /// Keeps `STT_FUNC` and `STT_OBJECT` symbols that are defined in some
    /// section. Values inside `opd` are replaced by the descriptor's entry
    /// point, then `base` is added.
    ///
    /// ## Errors
    ///
    /// [`SymtraceError::MalformedElf`] if a kept symbol's name lies outside
    /// the string table.
    pub fn build(module: &str, table: &SymbolTable<'_>, base: u64, opd: Option<&OpdTable>) -> Result<Self>
    {
        let mut entries = Vec::new();

        for symbol in &table.symbols {
            if (symbol.kind != elf::STT_FUNC && symbol.kind != elf::STT_OBJECT) || symbol.section == elf::SHN_UNDEF {
                continue;
            }
            if symbol.name as usize >= table.strings.len() {
                return Err(SymtraceError::malformed("symbol string index out of range"));
            }
            let value = opd.map_or(symbol.value, |opd| opd.resolve(symbol.value));
            trace!("symbol {:#x} at {value:#x}+{:#x}", symbol.name, symbol.size);
            entries.push(SymbolEntry {
                name: symbol.name,
                address: value.wrapping_add(base),
                size: symbol.size,
            });
        }

        debug!(
            "{module}: {} of {} symbols kept from {}",
            entries.len(),
            table.symbols.len(),
            if table.dynamic { ".dynsym" } else { ".symtab" }
        );
        Ok(Self::from_parts(module, Arc::from(table.strings), entries))
    }

    /// Build an index from already relocated entries.
    ///
    /// ## Errors
    ///
    /// [`SymtraceError::MalformedElf`] if a name offset lies outside `strings`.
    pub fn from_entries(module: &str, strings: impl Into<Arc<[u8]>>, entries: Vec<SymbolEntry>) -> Result<Self>
    {
        let strings = strings.into();
        if entries.iter().any(|e| e.name as usize >= strings.len()) {
            return Err(SymtraceError::malformed("symbol string index out of range"));
        }
        Ok(Self::from_parts(module, strings, entries))
    }

    fn from_parts(module: &str, strings: Arc<[u8]>, mut entries: Vec<SymbolEntry>) -> Self
    {
        // Zero-size entries sort ahead of sized ones at the same address so
        // the containment search stays monotonic.
        entries.sort_unstable_by_key(|e| (e.address, e.size));
        let range = entries
            .iter()
            .map(|e| e.address..e.address.saturating_add(e.size))
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))
            .unwrap_or(0..0);
        Self {
            module: Arc::from(module),
            strings,
            entries,
            range,
        }
    }

    pub fn module(&self) -> &str
    {
        &self.module
    }

    pub fn entries(&self) -> &[SymbolEntry]
    {
        &self.entries
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// Whether `address` falls between the first symbol and the end of the last.
    pub fn covers(&self, address: u64) -> bool
    {
        self.range.contains(&address)
    }

    /// The symbol whose `[address, address + size)` contains `address`.
    ///
    /// Zero-size symbols never match.
    pub fn lookup(&self, address: u64) -> Option<&SymbolEntry>
    {
        let index = self
            .entries
            .binary_search_by(|entry| {
                if address < entry.address {
                    Ordering::Greater
                } else if entry.contains(address) {
                    Ordering::Equal
                } else {
                    Ordering::Less
                }
            })
            .ok()?;
        self.entries.get(index)
    }

    /// Raw name bytes of `entry`, without the terminator.
    pub fn name(&self, entry: &SymbolEntry) -> &[u8]
    {
        let rest = self.strings.get(entry.name as usize..).unwrap_or_default();
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        &rest[..end]
    }

    pub fn symbol_info(&self, entry: &SymbolEntry) -> SymbolInfo
    {
        SymbolInfo {
            name: make_symbol_name(String::from_utf8_lossy(self.name(entry)).into_owned()),
            address: Address::new(entry.address),
            size: entry.size,
        }
    }
}

#[cfg(test)]
mod tests
{
    use object::Endianness;

    use super::*;
    use crate::elf::{Class, ElfSymbol};

    fn sym(name: u32, kind: u8, section: u16, value: u64, size: u64) -> ElfSymbol
    {
        ElfSymbol {
            name,
            kind,
            section,
            value,
            size,
        }
    }

    #[test]
    fn test_build_filters_and_relocates()
    {
        let table = SymbolTable {
            symbols: vec![
                sym(0, 0, 0, 0, 0),
                sym(5, elf::STT_OBJECT, 2, 0x50, 0x10),
                sym(1, elf::STT_FUNC, 1, 0x0, 0x20),
                sym(9, elf::STT_FUNC, elf::SHN_UNDEF, 0x0, 0x20),
                sym(15, elf::STT_SECTION, 1, 0x0, 0x0),
            ],
            strings: b"\0foo\0bar\0undef\0section\0",
            dynamic: false,
        };

        let index = SymbolIndex::build("test", &table, 0x1000, None).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.entries()[0].address, 0x1000);
        assert_eq!(index.name(&index.entries()[0]), b"foo");
        assert_eq!(index.name(&index.entries()[1]), b"bar");
        assert!(index.covers(0x1055));
        assert!(!index.covers(0x1060));
    }

    #[test]
    fn test_name_out_of_range()
    {
        let table = SymbolTable {
            symbols: vec![sym(40, elf::STT_FUNC, 1, 0x10, 4)],
            strings: b"\0x\0",
            dynamic: false,
        };
        assert!(SymbolIndex::build("bad", &table, 0, None).is_err());
    }

    #[test]
    fn test_opd_indirection()
    {
        let mut opd = Vec::new();
        opd.extend_from_slice(&0x2000u64.to_be_bytes());
        opd.extend_from_slice(&[0; 16]);
        let opd = OpdTable::new(0x9000, &opd, Endianness::Big, Class::Elf64);

        let table = SymbolTable {
            symbols: vec![sym(1, elf::STT_FUNC, 1, 0x9000, 0x40)],
            strings: b"\0.f\0",
            dynamic: false,
        };
        let index = SymbolIndex::build("ppc", &table, 0x10_0000, Some(&opd)).unwrap();
        assert_eq!(index.entries()[0].address, 0x10_2000);
    }

    #[test]
    fn test_lookup_boundaries()
    {
        let entries = vec![
            SymbolEntry {
                name: 5,
                address: 0x1050,
                size: 0x10,
            },
            SymbolEntry {
                name: 1,
                address: 0x1000,
                size: 0x20,
            },
            SymbolEntry {
                name: 1,
                address: 0x1030,
                size: 0,
            },
        ];
        let index = SymbolIndex::from_entries("m", b"\0foo\0bar\0".to_vec(), entries).unwrap();
        assert!(index.entries().windows(2).all(|w| w[0].address <= w[1].address));

        assert_eq!(index.lookup(0xfff), None);
        assert_eq!(index.lookup(0x1000).map(|e| e.address), Some(0x1000));
        assert_eq!(index.lookup(0x101f).map(|e| e.address), Some(0x1000));
        assert_eq!(index.lookup(0x1020), None);
        assert_eq!(index.lookup(0x1030), None);
        assert_eq!(index.lookup(0x1055).map(|e| index.name(e)), Some(&b"bar"[..]));
        assert_eq!(index.lookup(0x1060), None);
    }
}
