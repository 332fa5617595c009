//! # Types
//!
//! Plain data types shared by the symbolizer and its callers: addresses,
//! symbol names and the frames a lookup produces.

pub mod address;
pub mod frame;
pub mod symbols;

pub use address::Address;
pub use frame::{ResolvedFrame, SourceFrame, SourceFrames};
pub use symbols::{SourceLocation, SymbolInfo, SymbolLanguage, SymbolName};
