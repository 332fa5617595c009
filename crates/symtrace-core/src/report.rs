//! # Error Reporting
//!
//! Failures while loading one module never fail the lookup that triggered
//! them. They are handed to an [`ErrorReporter`] and the module degrades to
//! whatever was loaded before the failure.
//!
//! The reporter runs inside the `locate` span, which carries the image name.

use std::sync::Mutex;

use tracing::warn;

use crate::error::SymtraceError;

/// Receives errors that were absorbed while loading a module.
pub trait ErrorReporter: Send + Sync
{
    fn report(&self, error: &SymtraceError);
}

/// Logs every error at `warn` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter
{
    fn report(&self, error: &SymtraceError)
    {
        warn!("{error}");
    }
}

/// Keeps the rendered errors for later inspection.
#[derive(Debug, Default)]
pub struct CollectingReporter
{
    errors: Mutex<Vec<String>>,
}

impl CollectingReporter
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Rendered messages in the order they were reported.
    pub fn messages(&self) -> Vec<String>
    {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ErrorReporter for CollectingReporter
{
    fn report(&self, error: &SymtraceError)
    {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error.to_string());
        }
    }
}

impl<R: ErrorReporter + ?Sized> ErrorReporter for std::sync::Arc<R>
{
    fn report(&self, error: &SymtraceError)
    {
        (**self).report(error);
    }
}
