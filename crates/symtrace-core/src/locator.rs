//! # Locator
//!
//! Runs one image through the loading pipeline:
//!
//! 1. Parse and scan the sections.
//! 2. Publish the symbol table.
//! 3. Look for a companion debug file (build-id first, then debug link) and,
//!    if one is found, continue with it instead of this image.
//! 4. Load the `.gnu_debugaltlink` target as supplementary DWARF.
//! 5. Decode `.gnu_debugdata` and continue with the embedded image.
//! 6. Gather the debug sections and hand them to the [`DwarfLoader`].
//!
//! Companions recurse into the same pipeline, bounded by
//! [`SymbolizerConfig::max_depth`]. Errors inside a companion or in the debug
//! sections are reported and only cost the line information; symbols that
//! were already published stay.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, debug_span, warn};

use crate::compress::xz;
use crate::config::SymbolizerConfig;
use crate::debugfile::DebugFileResolver;
use crate::dwarf::{DebugBundle, DebugSection, DwarfLoader, DwarfRequest, LineResolver};
use crate::elf::{BuildId, DebugLink, ElfFile, OpdTable, SectionScan};
use crate::error::{Result, SymtraceError};
use crate::image::Image;
use crate::report::ErrorReporter;
use crate::symbols::{SymbolIndex, SymbolTables};

/// What the locator learned about one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary
{
    pub module: String,
    /// Symbols published, across the image and its companions
    pub symbols: usize,
    /// Runtime address range of the `PT_LOAD` segments
    pub extent: Option<Range<u64>>,
    /// Companion files that were followed, in order
    pub companions: Vec<PathBuf>,
    pub minidebuginfo: bool,
    pub dwarf: bool,
}

/// Result of [`Locator::locate`].
pub struct Located
{
    pub summary: LoadSummary,
    pub resolver: Option<Box<dyn LineResolver>>,
}

impl std::fmt::Debug for Located
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Located")
            .field("summary", &self.summary)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode<'a>
{
    /// A module as mapped into the process
    Primary,
    /// A separate debug file found for a primary image
    DebugInfo,
    /// The `.gnu_debugaltlink` target, which must carry this build-id
    AltLink(&'a BuildId),
}

/// Borrowed collaborators for one run of the pipeline.
pub struct Locator<'a>
{
    config: &'a SymbolizerConfig,
    files: &'a DebugFileResolver,
    symbols: &'a SymbolTables,
    dwarf: &'a dyn DwarfLoader,
    reporter: &'a dyn ErrorReporter,
}

impl<'a> Locator<'a>
{
    pub fn new(
        config: &'a SymbolizerConfig,
        files: &'a DebugFileResolver,
        symbols: &'a SymbolTables,
        dwarf: &'a dyn DwarfLoader,
        reporter: &'a dyn ErrorReporter,
    ) -> Self
    {
        Self {
            config,
            files,
            symbols,
            dwarf,
            reporter,
        }
    }

    /// Load `image`, mapped at load bias `base`.
    ///
    /// ## Errors
    ///
    /// Fails only if the image itself is malformed. Anything that goes wrong
    /// after its symbols are published is reported instead.
    pub fn locate(&self, image: &Image, base: u64) -> Result<Located>
    {
        let _span = debug_span!("locate", image = image.name()).entered();

        let extent = ElfFile::parse(image.bytes())?
            .load_extent()?
            .map(|r| r.start.wrapping_add(base)..r.end.wrapping_add(base));
        let mut located = Located {
            summary: LoadSummary {
                module: image.name().to_string(),
                extent,
                ..LoadSummary::default()
            },
            resolver: None,
        };
        self.process(image, base, Mode::Primary, 0, None, &mut located)?;
        located.summary.dwarf = located.resolver.is_some();

        debug!(
            "loaded {}: {} symbols, dwarf={}, companions={:?}",
            located.summary.module, located.summary.symbols, located.summary.dwarf, located.summary.companions
        );
        Ok(located)
    }

    /// One level of the pipeline. Returns the debug sections in alt-link mode.
    fn process(
        &self,
        image: &Image,
        base: u64,
        mode: Mode<'_>,
        depth: usize,
        caller_opd: Option<&OpdTable>,
        out: &mut Located,
    ) -> Result<Option<DebugBundle>>
    {
        if depth > self.config.max_depth {
            return Err(SymtraceError::DepthExceeded(self.config.max_depth));
        }

        let file = ElfFile::parse(image.bytes())?;
        let scan = file.scan()?;
        debug!("processing {} as {mode:?} at depth {depth}", image.name());

        if let Mode::AltLink(expected) = mode {
            if scan.build_id.as_ref() != Some(expected) {
                return Err(SymtraceError::BuildIdMismatch {
                    path: image.path().map_or_else(|| PathBuf::from(image.name()), PathBuf::from),
                    expected: expected.to_hex(),
                    found: scan.build_id.as_ref().map(BuildId::to_hex).unwrap_or_default(),
                });
            }
        }

        // A debug file usually lacks a usable .opd; borrow the caller's.
        let opd = scan.opd.as_ref().or(caller_opd);

        if let Some(table) = &scan.symbols {
            let index = SymbolIndex::build(image.name(), table, base, opd)?;
            out.summary.symbols += index.len();
            self.symbols.publish(index);
        }

        if matches!(mode, Mode::Primary) {
            if let Some(path) = self.find_companion(image, &scan) {
                out.summary.companions.push(path.clone());
                let outcome = Image::open(&path)
                    .and_then(|companion| self.process(&companion, base, Mode::DebugInfo, depth + 1, opd, out));
                if let Err(err) = outcome {
                    self.reporter.report(&err);
                }
                return Ok(None);
            }
        }

        let supplementary = scan
            .alt_link
            .as_ref()
            .and_then(|alt| self.load_alt_link(image, alt.path.as_str(), &alt.build_id, base, depth, opd, out));

        if let Some(blob) = scan.debug_data.filter(|_| self.config.use_minidebuginfo) {
            match xz::decompress(blob) {
                Ok(bytes) => {
                    debug!("{}: decoded {} bytes of mini debug info", image.name(), bytes.len());
                    out.summary.minidebuginfo = true;
                    let embedded = Image::from_bytes(format!("{}[.gnu_debugdata]", image.name()), bytes);
                    return self.process(&embedded, base, Mode::Primary, depth + 1, opd, out);
                }
                Err(err) => self.reporter.report(&SymtraceError::from(err)),
            }
        }

        let bundle = match gather_debug_sections(&file, &scan) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!("dropping debug info of {}", image.name());
                self.reporter.report(&err);
                return Ok(None);
            }
        };

        if matches!(mode, Mode::AltLink(_)) {
            return Ok(Some(bundle));
        }
        if !bundle.get(DebugSection::Info).is_some_and(|info| !info.is_empty()) {
            debug!("{}: no .debug_info", image.name());
            return Ok(None);
        }

        let request = DwarfRequest {
            base_address: base,
            sections: &bundle,
            endian: file.header().endian,
            supplementary: supplementary.as_ref(),
        };
        match self.dwarf.load(request) {
            Ok(resolver) => out.resolver = Some(resolver),
            Err(err) => self.reporter.report(&err),
        }
        Ok(None)
    }

    /// Build-id companion, else the debug-link target.
    fn find_companion(&self, image: &Image, scan: &SectionScan<'_>) -> Option<PathBuf>
    {
        if let Some(id) = &scan.build_id {
            match self.files.find_by_build_id(id) {
                Ok(Some(path)) => return Some(path),
                Ok(None) => {}
                Err(err) => self.reporter.report(&err),
            }
        }

        let link = scan.debug_link.as_ref().filter(|_| self.config.follow_debug_links)?;
        let origin = image.path()?;
        match self.files.find_by_debuglink(origin, link) {
            Ok(found) => found,
            Err(err) => {
                self.reporter.report(&err);
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn load_alt_link(
        &self,
        image: &Image,
        name: &str,
        build_id: &BuildId,
        base: u64,
        depth: usize,
        opd: Option<&OpdTable>,
        out: &mut Located,
    ) -> Option<DebugBundle>
    {
        let origin = image.path()?;
        let link = DebugLink {
            name: name.to_string(),
            crc: 0,
        };
        let path = match self.files.find_by_debuglink(origin, &link) {
            Ok(Some(path)) => path,
            Ok(None) => {
                debug!("alternate debug file {name} not found");
                return None;
            }
            Err(err) => {
                self.reporter.report(&err);
                return None;
            }
        };

        out.summary.companions.push(path.clone());
        let outcome = Image::open(&path)
            .and_then(|alt| self.process(&alt, base, Mode::AltLink(build_id), depth + 1, opd, out));
        match outcome {
            Ok(bundle) => bundle,
            Err(err) => {
                self.reporter.report(&err);
                None
            }
        }
    }
}

/// Decompressed copies of the nine debug sections.
///
/// A `.zdebug_*` section is only used when the plain one is absent.
pub fn gather_debug_sections(file: &ElfFile<'_>, scan: &SectionScan<'_>) -> Result<DebugBundle>
{
    let mut bundle = DebugBundle::new();
    for section in DebugSection::ALL {
        let data: Arc<[u8]> = match (scan.debug[section.index()], scan.zdebug[section.index()]) {
            (Some(header), _) if header.is_compressed() => file.decompress_section(&header)?.into(),
            (Some(header), _) => file.section_data(&header)?.into(),
            (None, Some(header)) => file.decompress_zdebug(&header)?.into(),
            (None, None) => continue,
        };
        bundle.insert(section, data);
    }
    Ok(bundle)
}
