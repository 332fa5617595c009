//! # Symtrace Utilities
//!
//! Shared logging setup and helpers for Symtrace.
//!
//! The core library only emits `tracing` events. Binaries call one of the
//! `init_logging*` functions here to decide where those events go.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::info;
