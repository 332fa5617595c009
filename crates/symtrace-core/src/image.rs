//! # Images
//!
//! The bytes of one ELF object: a memory-mapped file, or an owned buffer
//! such as the image decompressed from `.gnu_debugdata`.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::trace;

use crate::error::{Result, SymtraceError};

enum Backing
{
    Mapped(Mmap),
    Memory(Arc<[u8]>),
}

/// An ELF object to run through the locator.
pub struct Image
{
    name: String,
    path: Option<PathBuf>,
    backing: Backing,
}

impl Image
{
    /// Map the file at `path` read-only.
    pub fn open(path: &Path) -> Result<Self>
    {
        let open_err = |source| SymtraceError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(open_err)?;
        // SAFETY: read-only mapping; the file must not be truncated while mapped.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&file) }.map_err(open_err)?;
        trace!("mapped {} ({} bytes)", path.display(), map.len());
        Ok(Self {
            name: path.display().to_string(),
            path: Some(path.to_path_buf()),
            backing: Backing::Mapped(map),
        })
    }

    /// An image held in memory. `name` is used in diagnostics.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self
    {
        Self {
            name: name.into(),
            path: None,
            backing: Backing::Memory(bytes.into()),
        }
    }

    pub fn bytes(&self) -> &[u8]
    {
        match &self.backing {
            Backing::Mapped(map) => map,
            Backing::Memory(bytes) => bytes,
        }
    }

    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// File the image was mapped from; `None` for in-memory images.
    pub fn path(&self) -> Option<&Path>
    {
        self.path.as_deref()
    }
}

impl fmt::Debug for Image
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Image")
            .field("name", &self.name)
            .field("len", &self.bytes().len())
            .field("mapped", &matches!(self.backing, Backing::Mapped(_)))
            .finish()
    }
}
