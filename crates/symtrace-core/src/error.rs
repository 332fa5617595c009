//! # Error Types
//!
//! General error handling for the symbolication engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and readable messages. Decoder failures have their own enum,
//! [`DecompressError`](crate::compress::DecompressError), which converts into
//! [`SymtraceError`] with `?`.
//!
//! "Not found" outcomes (no build-id, no companion file, no symbol table) are
//! never errors. They are expressed as `Option` and degrade what a module can
//! offer without failing the lookup.

use std::path::PathBuf;

use thiserror::Error;

use crate::compress::DecompressError;

/// Main error type for symbolication operations
///
/// ## Error Categories
///
/// 1. **Malformed input**: MalformedElf, Decompress, UnsupportedCompression, BuildIdMismatch,
///    DepthExceeded
/// 2. **Resource errors**: Io, Open
/// 3. **Collaborator errors**: Dwarf
/// 4. **Caller errors**: InvalidArgument
#[derive(Error, Debug)]
pub enum SymtraceError
{
    /// The ELF image failed validation
    ///
    /// Covers bad magic, unsupported class or version, section indices that
    /// point outside the section table and fields that run past the end of the
    /// image.
    #[error("Malformed ELF image: {0}")]
    MalformedElf(String),

    /// A compressed payload (section, embedded image) could not be decoded
    #[error("Decompression failed: {0}")]
    Decompress(#[from] DecompressError),

    /// A section uses an `SHF_COMPRESSED` type with no decoder
    #[error("Unsupported section compression type {0}")]
    UnsupportedCompression(u32),

    /// An alternate debug link pointed at a file built from different sources
    #[error("Build-id mismatch for {}: expected {expected}, found {found}", path.display())]
    BuildIdMismatch
    {
        /// File that was opened
        path: PathBuf,
        /// Build-id recorded in the referring image (hex)
        expected: String,
        /// Build-id carried by the opened file (hex)
        found: String,
    },

    /// Companion images kept referring to further images past the configured limit
    #[error("Companion recursion limit of {0} reached")]
    DepthExceeded(usize),

    /// The DWARF collaborator rejected the debug sections
    #[error("DWARF error: {0}")]
    Dwarf(String),

    /// Invalid argument passed to an engine function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A file could not be opened or mapped
    #[error("Failed to open {}: {source}", path.display())]
    Open
    {
        /// Path that was being opened
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SymtraceError
{
    /// Shorthand for [`SymtraceError::MalformedElf`].
    pub(crate) fn malformed(reason: impl Into<String>) -> Self
    {
        SymtraceError::MalformedElf(reason.into())
    }

    /// Whether the error came from input data rather than the environment.
    ///
    /// Resource failures can be retried later (the file may appear, memory may
    /// free up); malformed input cannot.
    #[must_use]
    pub fn is_malformed_input(&self) -> bool
    {
        matches!(
            self,
            SymtraceError::MalformedElf(_)
                | SymtraceError::Decompress(_)
                | SymtraceError::UnsupportedCompression(_)
                | SymtraceError::BuildIdMismatch { .. }
                | SymtraceError::DepthExceeded(_)
        )
    }
}

/// Every failure `object` reports while reading an image is a validation
/// failure of that image.
impl From<object::read::Error> for SymtraceError
{
    fn from(err: object::read::Error) -> Self
    {
        SymtraceError::MalformedElf(err.to_string())
    }
}

/// Convenience type alias for `Result<T, SymtraceError>`
///
/// ```rust
/// use symtrace_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, SymtraceError>;
