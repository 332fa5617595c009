//! # Live Module Tracking
//!
//! Shared objects can be loaded at any time, so the set of modules known to
//! the symbolizer may be out of date when an address is looked up. The
//! [`ModuleTracker`] keeps the address range of every module it has seen and
//! re-enumerates the process only when an address falls outside all of them.
//!
//! Enumeration goes through the [`ModuleSource`] trait. [`PhdrModuleSource`]
//! walks `dl_iterate_phdr`; tests substitute a fixed list.
//!
//! Ranges are never removed. A module that was unloaded keeps its stale
//! range, and an address inside it resolves against the old module. A module
//! with no `PT_LOAD` segment is recorded with an empty range: later scans skip
//! it, and it never covers an address.

pub mod phdr;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use object::elf;
use tracing::debug;

pub use phdr::PhdrModuleSource;

/// One program header of a mapped module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment
{
    pub kind: u32,
    pub vaddr: u64,
    pub memsz: u64,
}

impl Segment
{
    pub fn load(vaddr: u64, memsz: u64) -> Self
    {
        Self {
            kind: elf::PT_LOAD,
            vaddr,
            memsz,
        }
    }
}

/// A module mapped into the process, as reported by a [`ModuleSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// File to load symbols from; `None` for modules with no backing file
    pub path: Option<PathBuf>,
    /// Load bias added to every link-time address
    pub base: u64,
    pub segments: Vec<Segment>,
}

impl ModuleInfo
{
    /// `base` plus the highest end of any `PT_LOAD` segment.
    pub fn end(&self) -> Option<u64>
    {
        self.segments
            .iter()
            .filter(|s| s.kind == elf::PT_LOAD)
            .map(|s| s.vaddr.saturating_add(s.memsz))
            .max()
            .map(|end| self.base.saturating_add(end))
    }

    fn display_name(&self) -> String
    {
        self.path
            .as_ref()
            .map_or_else(|| format!("<anonymous@{:#x}>", self.base), |p| p.display().to_string())
    }
}

/// Something that can list the modules currently mapped.
pub trait ModuleSource: Send + Sync
{
    fn enumerate(&self) -> Vec<ModuleInfo>;
}

/// Address range of one recorded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRange
{
    pub base: u64,
    pub end: u64,
    pub name: String,
}

impl ModuleRange
{
    pub fn contains(&self, address: u64) -> bool
    {
        address >= self.base && address < self.end
    }

    pub fn is_empty(&self) -> bool
    {
        self.end <= self.base
    }
}

/// Remembers the ranges of modules already processed.
pub struct ModuleTracker
{
    source: Box<dyn ModuleSource>,
    /// Sorted by base, descending.
    ranges: RwLock<Vec<ModuleRange>>,
    scans: AtomicUsize,
}

impl ModuleTracker
{
    pub fn new(source: Box<dyn ModuleSource>) -> Self
    {
        Self {
            source,
            ranges: RwLock::new(Vec::new()),
            scans: AtomicUsize::new(0),
        }
    }

    /// The recorded module covering `address`, without re-scanning.
    pub fn find(&self, address: u64) -> Option<ModuleRange>
    {
        let ranges = self.ranges.read().ok()?;
        let index = ranges.partition_point(|r| r.base > address);
        ranges[index..]
            .iter()
            .find(|r| !r.is_empty())
            .filter(|r| r.contains(address))
            .cloned()
    }

    /// The module covering `address`, re-enumerating once if needed.
    ///
    /// `load` is called for every newly seen module that has a backing file
    /// and at least one `PT_LOAD` segment. Modules whose base is already
    /// recorded are skipped.
    pub fn ensure(&self, address: u64, mut load: impl FnMut(&ModuleInfo)) -> Option<ModuleRange>
    {
        if let Some(range) = self.find(address) {
            return Some(range);
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let modules = self.source.enumerate();
        debug!("module scan for {address:#x} found {} modules", modules.len());

        for module in &modules {
            if !self.record(module) {
                continue;
            }
            if module.path.is_some() && module.end().is_some() {
                load(module);
            }
        }
        self.find(address)
    }

    /// Insert the range of `module`. Returns `false` if its base was known.
    ///
    /// Without a `PT_LOAD` segment the range is empty.
    fn record(&self, module: &ModuleInfo) -> bool
    {
        let end = module.end().unwrap_or(module.base);
        let Ok(mut ranges) = self.ranges.write() else {
            return false;
        };
        let index = ranges.partition_point(|r| r.base > module.base);
        if ranges.get(index).is_some_and(|r| r.base == module.base) {
            return false;
        }
        ranges.insert(
            index,
            ModuleRange {
                base: module.base,
                end,
                name: module.display_name(),
            },
        );
        if module.end().is_none() {
            debug!("{} has no PT_LOAD segment", module.display_name());
        }
        true
    }

    /// How many times the source has been enumerated.
    pub fn scan_count(&self) -> usize
    {
        self.scans.load(Ordering::Relaxed)
    }

    /// Snapshot of the recorded ranges, highest base first.
    pub fn ranges(&self) -> Vec<ModuleRange>
    {
        self.ranges.read().map(|r| r.clone()).unwrap_or_default()
    }
}

impl std::fmt::Debug for ModuleTracker
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("ModuleTracker")
            .field("ranges", &self.ranges())
            .field("scans", &self.scan_count())
            .finish()
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::{Arc, Mutex};

    use super::*;

    struct FixedSource(Arc<Mutex<Vec<ModuleInfo>>>);

    impl ModuleSource for FixedSource
    {
        fn enumerate(&self) -> Vec<ModuleInfo>
        {
            self.0.lock().unwrap().clone()
        }
    }

    fn module(path: &str, base: u64, size: u64) -> ModuleInfo
    {
        ModuleInfo {
            path: Some(PathBuf::from(path)),
            base,
            segments: vec![Segment::load(0, size / 2), Segment::load(size / 2, size / 2)],
        }
    }

    #[test]
    fn test_module_end()
    {
        let mut info = module("/a", 0x1000, 0x200);
        assert_eq!(info.end(), Some(0x1200));
        info.segments = vec![Segment {
            kind: elf::PT_NOTE,
            vaddr: 0,
            memsz: 0x10,
        }];
        assert_eq!(info.end(), None);
    }

    #[test]
    fn test_single_rescan_per_new_module()
    {
        let modules = Arc::new(Mutex::new(vec![module("/exe", 0x1000, 0x1000)]));
        let tracker = ModuleTracker::new(Box::new(FixedSource(Arc::clone(&modules))));
        let mut loaded = Vec::new();

        let range = tracker.ensure(0x1800, |m| loaded.push(m.base)).unwrap();
        assert_eq!(range.name, "/exe");
        assert_eq!(tracker.scan_count(), 1);
        tracker.ensure(0x1800, |m| loaded.push(m.base)).unwrap();
        assert_eq!(tracker.scan_count(), 1);

        // A library appears; only it is loaded on the next miss.
        modules.lock().unwrap().push(module("/lib.so", 0x7000, 0x100));
        assert!(tracker.ensure(0x7010, |m| loaded.push(m.base)).is_some());
        assert_eq!(tracker.scan_count(), 2);
        assert_eq!(loaded, vec![0x1000, 0x7000]);

        // Unmapped address: one scan per miss, nothing new loaded.
        assert!(tracker.ensure(0x5000, |m| loaded.push(m.base)).is_none());
        assert_eq!(tracker.scan_count(), 3);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn test_ranges_sorted_descending()
    {
        let modules = Arc::new(Mutex::new(vec![
            module("/b", 0x5000, 0x100),
            module("/a", 0x1000, 0x100),
            module("/c", 0x9000, 0x100),
        ]));
        let tracker = ModuleTracker::new(Box::new(FixedSource(modules)));
        tracker.ensure(0x1000, |_| {});
        let bases: Vec<_> = tracker.ranges().iter().map(|r| r.base).collect();
        assert_eq!(bases, vec![0x9000, 0x5000, 0x1000]);
        assert_eq!(tracker.find(0x50ff).map(|r| r.name), Some("/b".to_string()));
        assert_eq!(tracker.find(0x5100), None);
        assert_eq!(tracker.find(0xfff), None);
    }

    #[test]
    fn test_anonymous_module_recorded_not_loaded()
    {
        let mut vdso = module("/unused", 0x9000, 0x100);
        vdso.path = None;
        let tracker = ModuleTracker::new(Box::new(FixedSource(Arc::new(Mutex::new(vec![vdso])))));
        let mut calls = 0;
        let range = tracker.ensure(0x9010, |_| calls += 1).unwrap();
        assert_eq!(calls, 0);
        assert_eq!(range.name, "<anonymous@0x9000>");
    }

    #[test]
    fn test_module_without_load_segment_recorded_once()
    {
        let mut bare = module("/bare.so", 0x1400, 0);
        bare.segments = vec![Segment {
            kind: elf::PT_NOTE,
            vaddr: 0,
            memsz: 0x10,
        }];
        let modules = Arc::new(Mutex::new(vec![module("/exe", 0x1000, 0x1000), bare]));
        let tracker = ModuleTracker::new(Box::new(FixedSource(modules)));
        let mut loaded = Vec::new();

        // The empty range inside /exe does not hide it.
        let range = tracker.ensure(0x1800, |m| loaded.push(m.base)).unwrap();
        assert_eq!(range.name, "/exe");
        assert_eq!(loaded, vec![0x1000]);
        let recorded = tracker.ranges();
        assert_eq!(recorded.len(), 2);
        assert!(recorded[0].base == 0x1400 && recorded[0].is_empty());

        // Its base resolves to /exe as well; a miss elsewhere rescans without
        // loading or re-inserting the bare module.
        assert_eq!(tracker.find(0x1400).map(|r| r.name), Some("/exe".to_string()));
        assert!(tracker.ensure(0x9000, |m| loaded.push(m.base)).is_none());
        assert_eq!(tracker.scan_count(), 2);
        assert_eq!(loaded, vec![0x1000]);
        assert_eq!(tracker.ranges().len(), 2);
    }
}
