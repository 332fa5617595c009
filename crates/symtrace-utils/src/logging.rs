//! # Logging Utilities
//!
//! Logging infrastructure for Symtrace using `tracing`.
//!
//! This module provides structured logging with support for:
//! - Pretty (development) and JSON (machine-readable) output
//! - Environment variable configuration
//! - An optional log file next to, or instead of, the console
//!
//! Console output goes to stderr so it never mixes with symbolized frames on
//! stdout.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use symtrace_utils::init_logging;
//!
//! // Keep the guard alive until exit so file output is flushed
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Level filter (e.g., `RUST_LOG=debug`, `RUST_LOG=symtrace_core=trace`)
//! - `SYMTRACE_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
//! - `SYMTRACE_LOG_FILE`: Optional log file. A directory gets a dated file inside it.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use symtrace_utils::{LogFormat, LogLevel, init_logging_to_file, init_logging_with_level};
//!
//! // Explicit level on the console
//! let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
//!     .expect("Failed to initialize logging");
//!
//! // Or: JSON to a file only
//! let _guard = init_logging_to_file("/tmp/symtrace.log", Some(LogLevel::Trace), LogFormat::Json)
//!     .expect("Failed to initialize logging");
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Local;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default)
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(LoggingError::InvalidLevel(s.to_string())),
        }
    }
}

/// Keeps the background file writer alive.
///
/// Dropping the guard flushes buffered file output. Console-only logging
/// returns an empty guard.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging from the environment
///
/// Reads:
/// - `RUST_LOG`: Level filter (default `info`)
/// - `SYMTRACE_LOG_FORMAT`: Output format (`json` or `pretty`)
/// - `SYMTRACE_LOG_FILE`: Optional log file, written in addition to the console
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `SYMTRACE_LOG_FORMAT` holds an unknown format
/// - The log file cannot be created
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var("SYMTRACE_LOG_FORMAT") {
        Ok(value) => value.parse()?,
        Err(_) => LogFormat::default(),
    };
    init(None, format, env_log_file(), true)
}

/// Initialize logging with explicit level and format
///
/// `SYMTRACE_LOG_FILE` is still honoured.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init(Some(level.into()), format, env_log_file(), true)
}

/// Initialize logging to `path` only, with no console output
///
/// With `level` of `None` the filter comes from `RUST_LOG`, defaulting to
/// `info`.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the file cannot be
/// created.
pub fn init_logging_to_file(
    path: impl AsRef<Path>,
    level: Option<LogLevel>,
    format: LogFormat,
) -> Result<LoggingGuard, LoggingError>
{
    init(level.map(Into::into), format, Some(path.as_ref().to_path_buf()), false)
}

fn env_log_file() -> Option<PathBuf>
{
    env::var_os("SYMTRACE_LOG_FILE")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Priority: explicit level, then `RUST_LOG`, then `info`.
fn build_filter(explicit: Option<Level>) -> EnvFilter
{
    if let Some(level) = explicit {
        return EnvFilter::new(level.to_string());
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
}

/// A directory gets `<dir>/YYYY-MM-DD-symtrace.log`.
fn resolve_log_path(path: PathBuf) -> PathBuf
{
    if path.is_dir() {
        let today = Local::now().format("%Y-%m-%d");
        path.join(format!("{today}-symtrace.log"))
    } else {
        path
    }
}

fn build_layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

fn init(level: Option<Level>, format: LogFormat, file: Option<PathBuf>, console: bool) -> Result<LoggingGuard, LoggingError>
{
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if console {
        layers.push(build_layer(format, io::stderr, true, build_filter(level)));
    }

    let mut guard = LoggingGuard::default();
    if let Some(path) = file {
        let path = resolve_log_path(path);
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = path
            .file_name()
            .ok_or_else(|| LoggingError::InvalidPath(path.clone()))?
            .to_os_string();
        std::fs::create_dir_all(&directory)?;

        // The date is already part of generated names; never roll.
        let appender = tracing_appender::rolling::never(directory, name);
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(build_layer(format, writer, false, build_filter(level)));
        guard = LoggingGuard { _file: Some(worker) };
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}. Use 'pretty' or 'json'")]
    InvalidFormat(String),

    /// Invalid log level
    #[error("Invalid log level: {0}. Use 'error', 'warn', 'info', 'debug', or 'trace'")]
    InvalidLevel(String),

    /// The log file path has no file name
    #[error("Invalid log file path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
