//! Backtrace frame types.

use std::fmt;

use smallvec::SmallVec;

use super::symbols::{SourceLocation, SymbolInfo, SymbolName};
use super::Address;

/// One (possibly inlined) function at an address, from the line tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFrame
{
    pub function: Option<SymbolName>,
    pub location: Option<SourceLocation>,
}

/// Frames at one address, innermost inlined frame first.
pub type SourceFrames = SmallVec<[SourceFrame; 4]>;

/// Everything known about one address.
///
/// `Display` renders the one-line description used in backtraces:
///
/// - `name at file:line` when line information exists
/// - the function name alone when only symbols are known
/// - `0x... in <module>` when nothing is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame
{
    pub address: Address,
    /// Path or name of the containing module, if one covers the address
    pub module: Option<String>,
    pub symbol: Option<SymbolInfo>,
    pub frames: SourceFrames,
}

impl ResolvedFrame
{
    /// Best function name: the innermost DWARF frame, then the symbol table.
    pub fn function_name(&self) -> Option<&SymbolName>
    {
        self.frames
            .iter()
            .find_map(|frame| frame.function.as_ref())
            .or(self.symbol.as_ref().map(|symbol| &symbol.name))
    }

    pub fn location(&self) -> Option<&SourceLocation>
    {
        self.frames.iter().find_map(|frame| frame.location.as_ref())
    }
}

impl fmt::Display for ResolvedFrame
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match (self.function_name(), self.location()) {
            (Some(name), Some(location)) => write!(f, "{name} at {location}"),
            (None, Some(location)) => write!(f, "{} at {location}", self.address),
            (Some(name), None) => write!(f, "{name}"),
            (None, None) => write!(f, "{} in {}", self.address, self.module.as_deref().unwrap_or("??")),
        }
    }
}
