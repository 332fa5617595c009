//! PowerPC64 ELFv1 function descriptors.
//!
//! On that ABI a function symbol's value is the address of a descriptor in
//! `.opd`, and the descriptor's first word is the entry point. Companion
//! debug files usually lack a populated `.opd`, so the table of the primary
//! image is carried into their symbol tables.

use std::sync::Arc;

use object::endian::{U32, U64};
use object::{Bytes, Endianness};

use super::Class;

/// Contents of an `.opd` section and the address it is loaded at.
#[derive(Debug, Clone)]
pub struct OpdTable
{
    address: u64,
    data: Arc<[u8]>,
    endian: Endianness,
    class: Class,
}

impl OpdTable
{
    pub fn new(address: u64, data: &[u8], endian: Endianness, class: Class) -> Self
    {
        Self {
            address,
            data: Arc::from(data),
            endian,
            class,
        }
    }

    /// Whether `value` points inside the table.
    pub fn contains(&self, value: u64) -> bool
    {
        value >= self.address && value - self.address < self.data.len() as u64
    }

    /// The entry point of the descriptor at `value`, or `value` itself when
    /// it is not a descriptor address or the descriptor is cut off.
    pub fn resolve(&self, value: u64) -> u64
    {
        if !self.contains(value) {
            return value;
        }
        let Ok(offset) = usize::try_from(value - self.address) else {
            return value;
        };
        let bytes = Bytes(&self.data);
        let entry = match self.class {
            Class::Elf32 => bytes.read_at::<U32<Endianness>>(offset).map(|w| u64::from(w.get(self.endian))),
            Class::Elf64 => bytes.read_at::<U64<Endianness>>(offset).map(|w| w.get(self.endian)),
        };
        entry.unwrap_or(value)
    }
}
