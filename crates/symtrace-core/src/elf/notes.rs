//! # Companion-file references
//!
//! The three records an image can carry to point at its separate debug
//! information:
//!
//! - `.note.gnu.build-id`: a note whose payload identifies the build
//! - `.gnu_debuglink`: a file name and the CRC32 of that file
//! - `.gnu_debugaltlink`: a path and the build-id of a shared DWARF file

use std::fmt;

use object::endian::U32;
use object::{Bytes, Endianness};

use crate::error::{Result, SymtraceError};

/// Unique identifier of a build, taken from the GNU build-id note.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BuildId(Vec<u8>);

impl BuildId
{
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self
    {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8]
    {
        &self.0
    }

    /// Lowercase hex rendering, two digits per byte.
    pub fn to_hex(&self) -> String
    {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for BuildId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "BuildId({})", self.to_hex())
    }
}

impl fmt::Display for BuildId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.to_hex())
    }
}

/// Contents of `.gnu_debuglink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLink
{
    /// File name of the companion, usually relative
    pub name: String,
    /// CRC32 of the companion's full contents; zero disables the check
    pub crc: u32,
}

impl DebugLink
{
    /// Parse a NUL-terminated file name followed by a CRC32 at the next
    /// four-byte boundary.
    ///
    /// A record that ends before the CRC is malformed.
    pub fn parse(data: &[u8], endian: Endianness) -> Result<Self>
    {
        let data = Bytes(data);
        let name = data
            .read_string_at(0)
            .map_err(|()| SymtraceError::malformed("debug link name is not terminated"))?;
        if name.is_empty() {
            return Err(SymtraceError::malformed("empty debug link name"));
        }
        let crc_offset = (name.len() + 4) & !3;
        let crc = data
            .read_at::<U32<Endianness>>(crc_offset)
            .map_err(|()| SymtraceError::malformed("debug link has no CRC"))?;
        Ok(Self {
            name: String::from_utf8_lossy(name).into_owned(),
            crc: crc.get(endian),
        })
    }
}

/// Contents of `.gnu_debugaltlink`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugAltLink
{
    pub path: String,
    /// Build-id the target must carry
    pub build_id: BuildId,
}

impl DebugAltLink
{
    /// Parse a NUL-terminated path followed by the build-id bytes.
    pub fn parse(data: &[u8]) -> Result<Self>
    {
        let mut data = Bytes(data);
        let path = data
            .read_string()
            .map_err(|()| SymtraceError::malformed("alternate debug link path is not terminated"))?;
        if path.is_empty() {
            return Err(SymtraceError::malformed("empty alternate debug link"));
        }
        if data.is_empty() {
            return Err(SymtraceError::malformed("alternate debug link has no build-id"));
        }
        Ok(Self {
            path: String::from_utf8_lossy(path).into_owned(),
            build_id: BuildId::new(data.0),
        })
    }
}
