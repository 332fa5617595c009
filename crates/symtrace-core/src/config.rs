//! # Configuration
//!
//! Settings for a [`Symbolizer`](crate::Symbolizer).
//!
//! Defaults match the usual Linux layout. [`SymbolizerConfig::from_env`]
//! applies overrides from the environment:
//!
//! - `SYMTRACE_DEBUG_ROOT`: global debug directory (default `/usr/lib/debug`)
//! - `SYMTRACE_BUILD_ID_DIRS`: extra colon-separated build-id directories,
//!   searched after `<debug_root>/.build-id`
//! - `SYMTRACE_MAX_DEPTH`: companion recursion limit (default 4)
//! - `SYMTRACE_TRACK_MODULES`: `0`/`false` disables re-scanning loaded modules

use std::env;
use std::path::PathBuf;

pub const DEFAULT_DEBUG_ROOT: &str = "/usr/lib/debug";
pub const DEFAULT_MAX_DEPTH: usize = 4;
pub const DEFAULT_EXE_PATH: &str = "/proc/self/exe";

/// Symbolizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolizerConfig
{
    /// Root of the global debug tree
    pub debug_root: PathBuf,
    /// Directories holding `<xx>/<rest>.debug` build-id files, in search order
    pub build_id_dirs: Vec<PathBuf>,
    /// How many companion files deep the locator may recurse
    pub max_depth: usize,
    /// Re-enumerate loaded modules when an address is not covered
    pub track_modules: bool,
    /// Follow `.gnu_debuglink` records
    pub follow_debug_links: bool,
    /// Decode `.gnu_debugdata` mini debug info
    pub use_minidebuginfo: bool,
    /// Path that names the running executable
    pub exe_path: PathBuf,
}

impl Default for SymbolizerConfig
{
    fn default() -> Self
    {
        let debug_root = PathBuf::from(DEFAULT_DEBUG_ROOT);
        Self {
            build_id_dirs: vec![debug_root.join(".build-id")],
            debug_root,
            max_depth: DEFAULT_MAX_DEPTH,
            track_modules: true,
            follow_debug_links: true,
            use_minidebuginfo: true,
            exe_path: PathBuf::from(DEFAULT_EXE_PATH),
        }
    }
}

impl SymbolizerConfig
{
    /// Defaults with environment overrides applied.
    ///
    /// Values that do not parse are ignored.
    pub fn from_env() -> Self
    {
        let mut config = Self::default();
        if let Some(root) = env::var_os("SYMTRACE_DEBUG_ROOT") {
            config = config.with_debug_root(root);
        }
        if let Some(dirs) = env::var_os("SYMTRACE_BUILD_ID_DIRS") {
            config.build_id_dirs.extend(env::split_paths(&dirs).filter(|p| !p.as_os_str().is_empty()));
        }
        if let Some(depth) = env::var("SYMTRACE_MAX_DEPTH").ok().and_then(|s| s.trim().parse().ok()) {
            config.max_depth = depth;
        }
        if let Some(track) = env::var("SYMTRACE_TRACK_MODULES").ok().and_then(|s| parse_bool(&s)) {
            config.track_modules = track;
        }
        config
    }

    /// Set the debug root; the default build-id directory moves with it.
    #[must_use]
    pub fn with_debug_root(mut self, root: impl Into<PathBuf>) -> Self
    {
        let old_default = self.debug_root.join(".build-id");
        self.debug_root = root.into();
        let new_default = self.debug_root.join(".build-id");
        for dir in &mut self.build_id_dirs {
            if *dir == old_default {
                dir.clone_from(&new_default);
            }
        }
        self
    }

    #[must_use]
    pub fn with_build_id_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.build_id_dirs.push(dir.into());
        self
    }

    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self
    {
        self.max_depth = depth;
        self
    }

    #[must_use]
    pub fn with_track_modules(mut self, enabled: bool) -> Self
    {
        self.track_modules = enabled;
        self
    }

    #[must_use]
    pub fn with_follow_debug_links(mut self, enabled: bool) -> Self
    {
        self.follow_debug_links = enabled;
        self
    }

    #[must_use]
    pub fn with_minidebuginfo(mut self, enabled: bool) -> Self
    {
        self.use_minidebuginfo = enabled;
        self
    }

    #[must_use]
    pub fn with_exe_path(mut self, path: impl Into<PathBuf>) -> Self
    {
        self.exe_path = path.into();
        self
    }
}

fn parse_bool(value: &str) -> Option<bool>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
