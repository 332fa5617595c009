//! # symtrace-core
//!
//! ELF symbolication engine for Symtrace.
//!
//! This crate turns runtime addresses into function names and source lines:
//! - ELF parsing: headers, sections, notes and function descriptors
//! - Companion debug files found by build-id or `.gnu_debuglink`
//! - Built-in DEFLATE, Zstandard and XZ decoders for compressed debug info
//! - Sorted, lock-free symbol tables shared between threads
//! - Live tracking of the modules mapped into the running process
//! - DWARF line tables through `addr2line`
//!
//! ## Platform Support
//!
//! File symbolication works for any ELF object on any host. Live module
//! tracking needs `dl_iterate_phdr` (Linux, Android, FreeBSD).
//!
//! ## Why unsafe code is needed
//!
//! Two places need `unsafe`: memory-mapping image files and walking the
//! dynamic linker's module list. Both are wrapped in safe types.

#![allow(unsafe_code)] // Required for mmap and dl_iterate_phdr

pub mod compress;
pub mod config;
pub mod debugfile;
pub mod dwarf;
pub mod elf;
pub mod error;
pub mod image;
pub mod locator;
pub mod modules;
pub mod report;
pub mod symbolizer;
pub mod symbols;
pub mod types;

pub use config::SymbolizerConfig;
// Re-export commonly used types
pub use error::{Result, SymtraceError};
pub use locator::LoadSummary;
pub use report::{ErrorReporter, TracingReporter};
pub use symbolizer::Symbolizer;
pub use types::{Address, ResolvedFrame, SourceFrame, SourceFrames, SourceLocation, SymbolInfo, SymbolName};
