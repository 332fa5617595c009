//! Symbol demangling.
//!
//! Rust names (legacy `_ZN...17h<hash>E` and v0 `_R...`) are demangled with
//! `rustc-demangle`; the alternate form drops the legacy hash suffix. Other
//! Itanium names are classified as C++ and left mangled, and anything without
//! a mangling prefix is treated as C.

use rustc_demangle::try_demangle;

use crate::types::{SymbolLanguage, SymbolName};

/// Build a [`SymbolName`] from a raw linkage name.
pub(crate) fn make_symbol_name(raw: String) -> SymbolName
{
    let demangled = try_demangle(&raw).ok().map(|d| format!("{d:#}"));
    let language = if demangled.is_some() || raw.starts_with("_R") {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else if raw.is_empty() {
        SymbolLanguage::Unknown
    } else {
        SymbolLanguage::C
    };

    SymbolName::new(raw, demangled, language)
}
