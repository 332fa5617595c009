//! # Companion Debug Files
//!
//! Distributions strip debug information into separate files. Two
//! conventions point from a binary to its companion:
//!
//! 1. **Build-id**: `<dir>/<xx>/<rest>.debug`, where `xx` is the first byte
//!    of the build-id in hex and `rest` the remaining bytes. `<dir>` is
//!    `/usr/lib/debug/.build-id` by default.
//! 2. **Debug link**: a file name plus a CRC32 of the companion, looked up
//!    next to the binary, in its `.debug/` subdirectory and under the global
//!    debug root (`/usr/lib/debug/<dir>/<name>`).
//!
//! The resolver only finds paths. Opening and processing the companion is
//! the locator's job, so the resolver holds no state between calls.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::compress::checksum::crc32_update;
use crate::config::SymbolizerConfig;
use crate::elf::{BuildId, DebugLink};
use crate::error::Result;

/// Symlink hops followed before giving up on resolving a binary's path.
const MAX_SYMLINK_HOPS: usize = 40;

/// Last-resort lookup for build-ids missing from the local directories,
/// for example a debuginfod client.
pub trait BuildIdFallback: Send + Sync
{
    fn find(&self, build_id: &BuildId) -> Option<PathBuf>;
}

/// Finds companion debug files on disk.
#[derive(Clone)]
pub struct DebugFileResolver
{
    debug_root: PathBuf,
    build_id_dirs: Vec<PathBuf>,
    fallback: Option<Arc<dyn BuildIdFallback>>,
}

impl DebugFileResolver
{
    pub fn new(debug_root: impl Into<PathBuf>, build_id_dirs: Vec<PathBuf>) -> Self
    {
        Self {
            debug_root: debug_root.into(),
            build_id_dirs,
            fallback: None,
        }
    }

    pub fn from_config(config: &SymbolizerConfig) -> Self
    {
        Self::new(config.debug_root.clone(), config.build_id_dirs.clone())
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn BuildIdFallback>) -> Self
    {
        self.fallback = Some(fallback);
        self
    }

    /// `<dir>/<xx>/<rest>.debug` for `build_id`.
    pub fn build_id_path(dir: &Path, build_id: &BuildId) -> Option<PathBuf>
    {
        let (first, rest) = build_id.as_bytes().split_first()?;
        let rest: String = rest.iter().map(|b| format!("{b:02x}")).collect();
        Some(dir.join(format!("{first:02x}")).join(format!("{rest}.debug")))
    }

    /// Look `build_id` up in each build-id directory, then ask the fallback.
    pub fn find_by_build_id(&self, build_id: &BuildId) -> Result<Option<PathBuf>>
    {
        for dir in &self.build_id_dirs {
            let Some(candidate) = Self::build_id_path(dir, build_id) else {
                continue;
            };
            trace!("trying {}", candidate.display());
            if candidate.is_file() {
                debug!("build-id {build_id} found at {}", candidate.display());
                return Ok(Some(candidate));
            }
        }

        if let Some(fallback) = &self.fallback {
            if let Some(path) = fallback.find(build_id) {
                debug!("build-id {build_id} supplied by fallback: {}", path.display());
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Look for the file named by `link` on behalf of the binary at `original`.
    ///
    /// Candidates whose CRC32 differs from a non-zero `link.crc` are skipped.
    pub fn find_by_debuglink(&self, original: &Path, link: &DebugLink) -> Result<Option<PathBuf>>
    {
        let name = Path::new(&link.name);
        let candidates = if name.is_absolute() {
            vec![name.to_path_buf()]
        } else {
            let Some(resolved) = resolve_symlinks(original)? else {
                return Ok(None);
            };
            let dir = resolved.parent().unwrap_or_else(|| Path::new(""));
            vec![
                dir.join(name),
                dir.join(".debug").join(name),
                self.debug_root.join(strip_root(dir)).join(name),
            ]
        };

        for candidate in candidates {
            trace!("trying {}", candidate.display());
            if !candidate.is_file() || same_file(&candidate, original) {
                continue;
            }
            if link.crc != 0 {
                match file_crc32(&candidate) {
                    Ok(crc) if crc == link.crc => {}
                    Ok(crc) => {
                        debug!(
                            "{} has CRC {crc:#010x}, link wants {:#010x}",
                            candidate.display(),
                            link.crc
                        );
                        continue;
                    }
                    Err(err) => {
                        debug!("cannot read {}: {err}", candidate.display());
                        continue;
                    }
                }
            }
            debug!("debug link {} resolved to {}", link.name, candidate.display());
            return Ok(Some(candidate));
        }
        Ok(None)
    }
}

impl fmt::Debug for DebugFileResolver
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DebugFileResolver")
            .field("debug_root", &self.debug_root)
            .field("build_id_dirs", &self.build_id_dirs)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Follow symlinks from `path` to the file they name.
///
/// Relative link targets are taken relative to the link's directory.
/// Returns `None` if the path does not exist or the chain is too long.
fn resolve_symlinks(path: &Path) -> Result<Option<PathBuf>>
{
    let mut current = path.to_path_buf();
    for _ in 0..MAX_SYMLINK_HOPS {
        let metadata = match current.symlink_metadata() {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if !metadata.file_type().is_symlink() {
            return Ok(Some(current));
        }
        let target = current.read_link()?;
        current = match current.parent() {
            Some(dir) if target.is_relative() => dir.join(target),
            _ => target,
        };
    }
    debug!("too many symlinks resolving {}", path.display());
    Ok(None)
}

/// `dir` without its root, so it can be joined under the debug root.
fn strip_root(dir: &Path) -> PathBuf
{
    dir.components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect()
}

fn same_file(a: &Path, b: &Path) -> bool
{
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// CRC32 of the whole file, the checksum `.gnu_debuglink` records.
pub fn file_crc32(path: &Path) -> io::Result<u32>
{
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut crc = 0;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            return Ok(crc);
        }
        crc = crc32_update(crc, &buffer[..read]);
    }
}
