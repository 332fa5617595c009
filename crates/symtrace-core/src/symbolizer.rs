//! # Symbolizer
//!
//! The entry point of the crate. A [`Symbolizer`] owns the published symbol
//! tables, the line resolvers of every loaded module and, optionally, a
//! [`ModuleTracker`] that loads modules of the running process on demand.
//!
//! ```rust,no_run
//! use symtrace_core::{Symbolizer, SymbolizerConfig};
//!
//! let symbolizer = Symbolizer::new(SymbolizerConfig::from_env());
//! symbolizer.add_file("/usr/bin/true".as_ref(), 0).unwrap();
//! println!("{}", symbolizer.resolve(0x1234));
//! ```
//!
//! Lookups only read published data and may run on any number of threads.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::config::SymbolizerConfig;
use crate::debugfile::{BuildIdFallback, DebugFileResolver};
use crate::dwarf::{Addr2lineLoader, DwarfLoader, LineResolver};
use crate::error::Result;
use crate::image::Image;
use crate::locator::{LoadSummary, Locator};
use crate::modules::{ModuleRange, ModuleSource, ModuleTracker, PhdrModuleSource};
use crate::report::{ErrorReporter, TracingReporter};
use crate::symbols::{ChunkList, SymbolTables};
use crate::types::{Address, ResolvedFrame, SourceFrame, SourceFrames, SymbolInfo};

struct LoadedModule
{
    summary: LoadSummary,
    resolver: Option<Box<dyn LineResolver>>,
}

impl LoadedModule
{
    /// Modules without program headers are assumed to cover everything.
    fn covers(&self, address: u64) -> bool
    {
        self.summary.extent.as_ref().map_or(true, |extent| extent.contains(&address))
    }
}

/// Address to symbol and source lookups over a set of loaded modules.
pub struct Symbolizer
{
    config: SymbolizerConfig,
    files: DebugFileResolver,
    dwarf: Box<dyn DwarfLoader>,
    reporter: Box<dyn ErrorReporter>,
    symbols: SymbolTables,
    modules: ChunkList<LoadedModule>,
    tracker: Option<ModuleTracker>,
}

impl Symbolizer
{
    /// A symbolizer with no modules loaded and no live tracking.
    pub fn new(config: SymbolizerConfig) -> Self
    {
        Self {
            files: DebugFileResolver::from_config(&config),
            config,
            dwarf: Box::new(Addr2lineLoader),
            reporter: Box::new(TracingReporter),
            symbols: SymbolTables::new(),
            modules: ChunkList::new(),
            tracker: None,
        }
    }

    /// A symbolizer for the running process.
    ///
    /// Modules are loaded lazily through `dl_iterate_phdr` the first time an
    /// address inside them is looked up, unless `track_modules` is off.
    pub fn for_current_process(config: SymbolizerConfig) -> Self
    {
        let track = config.track_modules;
        let source = PhdrModuleSource::new(config.exe_path.clone());
        let symbolizer = Self::new(config);
        if track {
            symbolizer.with_module_source(source)
        } else {
            symbolizer
        }
    }

    #[must_use]
    pub fn with_dwarf_loader(mut self, loader: impl DwarfLoader + 'static) -> Self
    {
        self.dwarf = Box::new(loader);
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self
    {
        self.reporter = Box::new(reporter);
        self
    }

    /// Track modules reported by `source`.
    #[must_use]
    pub fn with_module_source(mut self, source: impl ModuleSource + 'static) -> Self
    {
        self.tracker = Some(ModuleTracker::new(Box::new(source)));
        self
    }

    #[must_use]
    pub fn with_build_id_fallback(mut self, fallback: Arc<dyn BuildIdFallback>) -> Self
    {
        self.files = self.files.with_fallback(fallback);
        self
    }

    pub fn config(&self) -> &SymbolizerConfig
    {
        &self.config
    }

    /// Load the ELF file at `path`, mapped at load bias `base`.
    ///
    /// ## Errors
    ///
    /// Fails if the file cannot be opened or is not a valid ELF image.
    /// Problems with companion files and debug sections are reported to the
    /// [`ErrorReporter`] and leave the module with symbols only.
    pub fn add_file(&self, path: &Path, base: u64) -> Result<LoadSummary>
    {
        let image = Image::open(path)?;
        self.add_image(&image, base)
    }

    /// Load an ELF image held in memory.
    pub fn add_memory(&self, name: &str, bytes: impl Into<Arc<[u8]>>, base: u64) -> Result<LoadSummary>
    {
        let image = Image::from_bytes(name, bytes);
        self.add_image(&image, base)
    }

    fn add_image(&self, image: &Image, base: u64) -> Result<LoadSummary>
    {
        let locator = Locator::new(
            &self.config,
            &self.files,
            &self.symbols,
            self.dwarf.as_ref(),
            self.reporter.as_ref(),
        );
        let located = locator.locate(image, base)?;
        let summary = located.summary.clone();
        self.modules.push(LoadedModule {
            summary: located.summary,
            resolver: located.resolver,
        });
        Ok(summary)
    }

    /// Load any not yet known module covering `address`.
    fn track(&self, address: u64) -> Option<ModuleRange>
    {
        let tracker = self.tracker.as_ref()?;
        tracker.ensure(address, |module| {
            let Some(path) = &module.path else {
                return;
            };
            debug!("loading {} at {:#x}", path.display(), module.base);
            if let Err(err) = self.add_file(path, module.base) {
                self.reporter.report(&err);
            }
        })
    }

    /// The symbol whose range contains `address`.
    pub fn symbol(&self, address: u64) -> Option<SymbolInfo>
    {
        self.track(address);
        self.symbols.lookup(address)
    }

    /// Source frames at `address`, innermost inlined frame first.
    ///
    /// Without line information this is a single frame carrying the symbol
    /// name, or nothing if no symbol covers the address either.
    pub fn source_frames(&self, address: u64) -> SourceFrames
    {
        self.track(address);
        self.frames_at(address)
    }

    fn frames_at(&self, address: u64) -> SourceFrames
    {
        let frames = self
            .modules
            .iter()
            .filter(|module| module.covers(address))
            .filter_map(|module| module.resolver.as_ref())
            .map(|resolver| resolver.find_frames(address))
            .find(|frames| !frames.is_empty());
        if let Some(frames) = frames {
            return frames;
        }

        self.symbols
            .lookup(address)
            .map(|symbol| SourceFrame {
                function: Some(symbol.name),
                location: None,
            })
            .into_iter()
            .collect()
    }

    /// Symbol, source frames and module of `address`.
    pub fn resolve(&self, address: u64) -> ResolvedFrame
    {
        let range = self.track(address);
        let module = range.map(|r| r.name).or_else(|| {
            self.modules
                .iter()
                .find(|m| m.summary.extent.as_ref().is_some_and(|e| e.contains(&address)))
                .map(|m| m.summary.module.clone())
        });
        ResolvedFrame {
            address: Address::new(address),
            module,
            symbol: self.symbols.lookup(address),
            frames: self.frames_at(address),
        }
    }

    /// Summaries of every module loaded so far, in load order.
    pub fn loaded(&self) -> Vec<LoadSummary>
    {
        self.modules.iter().map(|m| m.summary.clone()).collect()
    }

    /// Ranges recorded by the module tracker, highest base first.
    pub fn modules(&self) -> Vec<ModuleRange>
    {
        self.tracker.as_ref().map(ModuleTracker::ranges).unwrap_or_default()
    }

    /// Make sure the modules covering `address` are loaded.
    pub fn refresh(&self, address: u64) -> Option<ModuleRange>
    {
        self.track(address)
    }

    /// How often the tracker has enumerated the process.
    pub fn scan_count(&self) -> usize
    {
        self.tracker.as_ref().map_or(0, ModuleTracker::scan_count)
    }

    pub fn symbols(&self) -> &SymbolTables
    {
        &self.symbols
    }
}

impl std::fmt::Debug for Symbolizer
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Symbolizer")
            .field("config", &self.config)
            .field("modules", &self.modules.len())
            .field("symbols", &self.symbols.symbol_count())
            .field("tracker", &self.tracker)
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::error::SymtraceError;

    #[test]
    fn test_empty_symbolizer_renders_address()
    {
        let symbolizer = Symbolizer::new(SymbolizerConfig::default());
        let frame = symbolizer.resolve(0x10);
        assert!(frame.symbol.is_none());
        assert!(frame.frames.is_empty());
        assert_eq!(frame.to_string(), "0x10 in ??");
        assert_eq!(symbolizer.scan_count(), 0);
    }

    #[test]
    fn test_add_memory_rejects_garbage()
    {
        let symbolizer = Symbolizer::new(SymbolizerConfig::default());
        let err = symbolizer.add_memory("junk", vec![0u8; 64], 0).unwrap_err();
        assert!(matches!(err, SymtraceError::MalformedElf(_)));
        assert!(symbolizer.loaded().is_empty());
    }

    #[test]
    fn test_symbolizer_is_shareable()
    {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Symbolizer>();
    }
}
