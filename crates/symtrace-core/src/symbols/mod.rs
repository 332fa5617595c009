//! # Symbols
//!
//! Symbol tables of loaded images.
//!
//! Each image contributes one [`SymbolIndex`]: the function and data symbols
//! of its `.symtab` (or `.dynsym`), relocated by the image's load bias and
//! sorted by address. Indexes are published into a process-wide
//! [`ChunkList`] and never change afterwards, so lookups need no locking.
//!
//! ## Lookup
//!
//! [`SymbolTables::lookup`] walks the published indexes and binary-searches
//! each one whose address range covers the query. A symbol matches when the
//! address lies in `[address, address + size)`.
//!
//! ```rust
//! use symtrace_core::symbols::{SymbolEntry, SymbolIndex, SymbolTables};
//!
//! let tables = SymbolTables::new();
//! let entries = vec![SymbolEntry { name: 1, address: 0x1000, size: 0x20 }];
//! tables.publish(SymbolIndex::from_entries("app", b"\0foo\0".to_vec(), entries).unwrap());
//!
//! let info = tables.lookup(0x1010).unwrap();
//! assert_eq!(info.name.display_name(), "foo");
//! assert!(tables.lookup(0x1020).is_none());
//! ```

pub mod chunks;
pub(crate) mod demangle;
pub mod index;

pub use chunks::ChunkList;
pub use index::{SymbolEntry, SymbolIndex};

use crate::types::SymbolInfo;

/// All published symbol indexes of a process.
#[derive(Debug, Default)]
pub struct SymbolTables
{
    chunks: ChunkList<SymbolIndex>,
}

impl SymbolTables
{
    pub const fn new() -> Self
    {
        Self { chunks: ChunkList::new() }
    }

    /// Make `index` visible to lookups. Empty indexes are dropped.
    pub fn publish(&self, index: SymbolIndex)
    {
        if !index.is_empty() {
            self.chunks.push(index);
        }
    }

    pub fn lookup(&self, address: u64) -> Option<SymbolInfo>
    {
        self.chunks
            .iter()
            .filter(|index| index.covers(address))
            .find_map(|index| index.lookup(address).map(|entry| index.symbol_info(entry)))
    }

    pub fn indexes(&self) -> chunks::Iter<'_, SymbolIndex>
    {
        self.chunks.iter()
    }

    /// Number of symbols across all indexes.
    pub fn symbol_count(&self) -> usize
    {
        self.chunks.iter().map(SymbolIndex::len).sum()
    }
}
