//! Tests for companion debug files and live module tracking

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use common::{foo_bar, write_file, ElfBuilder, RecordingLoader};
use object::elf;
use pretty_assertions::assert_eq;
use symtrace_core::compress::checksum::crc32;
use symtrace_core::debugfile::{BuildIdFallback, DebugFileResolver};
use symtrace_core::elf::{BuildId, DebugLink};
use symtrace_core::modules::{ModuleInfo, ModuleSource, Segment};
use symtrace_core::report::CollectingReporter;
use symtrace_core::{Symbolizer, SymbolizerConfig};

const BUILD_ID: [u8; 4] = [0xab, 0xcd, 0xef, 0x01];

/// A stripped binary: dynamic `foo` only, plus whatever `extra` adds.
fn stripped(extra: impl FnOnce(ElfBuilder) -> ElfBuilder) -> Vec<u8>
{
    let builder = ElfBuilder::elf64()
        .nobits(".text", 0x100)
        .function("foo", 0x1000, 0x20)
        .dynamic_symbols()
        .load(0x1000, 0x100);
    extra(builder).build()
}

/// The matching debug file: full symbol table and line info.
fn debug_file() -> Vec<u8>
{
    foo_bar()
        .function("internal", 0x1080, 0x10)
        .section(".debug_info", elf::SHT_PROGBITS, b"COMPANION".to_vec())
        .build()
}

fn config_for(root: &Path) -> SymbolizerConfig
{
    SymbolizerConfig::default().with_debug_root(root.join("debug"))
}

#[test]
fn test_companion_found_by_build_id()
{
    let dir = tempfile::tempdir().unwrap();
    let binary = write_file(dir.path(), "bin/app", &stripped(|b| b.build_id(&BUILD_ID)));
    let companion = write_file(dir.path(), "debug/.build-id/ab/cdef01.debug", &debug_file());

    let loader = RecordingLoader::default();
    let symbolizer = Symbolizer::new(config_for(dir.path())).with_dwarf_loader(loader.clone());
    let summary = symbolizer.add_file(&binary, 0x40_0000).unwrap();

    assert_eq!(summary.companions, vec![companion]);
    assert!(summary.dwarf);
    assert_eq!(loader.recorded()[0].info, b"COMPANION");
    assert_eq!(loader.recorded()[0].base_address, 0x40_0000);
    assert_eq!(symbolizer.symbol(0x40_1085).unwrap().name.display_name(), "internal");
    assert_eq!(symbolizer.resolve(0x40_1004).to_string(), "inlined at src/lib.rs:7");
}

#[test]
fn test_build_id_fallback_is_consulted()
{
    struct Fixed(PathBuf);

    impl BuildIdFallback for Fixed
    {
        fn find(&self, build_id: &BuildId) -> Option<PathBuf>
        {
            (build_id.as_bytes() == BUILD_ID).then(|| self.0.clone())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let binary = write_file(dir.path(), "bin/app", &stripped(|b| b.build_id(&BUILD_ID)));
    let companion = write_file(dir.path(), "cache/app.debug", &debug_file());

    let symbolizer = Symbolizer::new(config_for(dir.path())).with_build_id_fallback(Arc::new(Fixed(companion.clone())));
    let summary = symbolizer.add_file(&binary, 0).unwrap();
    assert_eq!(summary.companions, vec![companion]);
    assert!(symbolizer.symbol(0x1085).is_some());
}

#[test]
fn test_companion_found_by_debug_link()
{
    let dir = tempfile::tempdir().unwrap();
    let debug = debug_file();
    let crc = crc32(&debug);
    let binary = write_file(dir.path(), "bin/app", &stripped(|b| b.debug_link("app.debug", Some(crc))));
    let companion = write_file(dir.path(), "bin/.debug/app.debug", &debug);

    let symbolizer = Symbolizer::new(config_for(dir.path()));
    let summary = symbolizer.add_file(&binary, 0).unwrap();
    assert_eq!(summary.companions, vec![companion]);
    assert_eq!(symbolizer.symbol(0x1085).unwrap().name.display_name(), "internal");
}

#[test]
fn test_debug_link_crc_mismatch_is_skipped()
{
    let dir = tempfile::tempdir().unwrap();
    let debug = debug_file();
    let crc = crc32(&debug);
    let binary = write_file(dir.path(), "bin/app", &stripped(|b| b.debug_link("app.debug", Some(crc))));
    // Same directory: wrong contents. Global tree: the right file.
    write_file(dir.path(), "bin/app.debug", b"not the debug file");
    let global = dir.path().join("debug").join(dir.path().strip_prefix("/").unwrap()).join("bin/app.debug");
    std::fs::create_dir_all(global.parent().unwrap()).unwrap();
    std::fs::write(&global, &debug).unwrap();

    let symbolizer = Symbolizer::new(config_for(dir.path()));
    let summary = symbolizer.add_file(&binary, 0).unwrap();
    assert_eq!(summary.companions, vec![global]);
}

#[test]
fn test_debug_link_can_be_disabled()
{
    let dir = tempfile::tempdir().unwrap();
    let debug = debug_file();
    let binary = write_file(dir.path(), "bin/app", &stripped(|b| b.debug_link("app.debug", Some(crc32(&debug)))));
    write_file(dir.path(), "bin/app.debug", &debug);

    let symbolizer = Symbolizer::new(config_for(dir.path()).with_follow_debug_links(false));
    let summary = symbolizer.add_file(&binary, 0).unwrap();
    assert!(summary.companions.is_empty());
    assert!(symbolizer.symbol(0x1085).is_none());
}

#[test]
fn test_alt_link_supplies_supplementary_sections()
{
    let dir = tempfile::tempdir().unwrap();
    let alt_id = [0x11, 0x22, 0x33, 0x44];
    let alt = ElfBuilder::elf64()
        .build_id(&alt_id)
        .section(".debug_str", elf::SHT_PROGBITS, b"SHARED".to_vec())
        .build();
    write_file(dir.path(), "bin/shared.debug", &alt);
    let binary = write_file(
        dir.path(),
        "bin/app",
        &foo_bar()
            .alt_link("shared.debug", &alt_id)
            .section(".debug_info", elf::SHT_PROGBITS, b"PRIMARY".to_vec())
            .build(),
    );

    let loader = RecordingLoader::default();
    let symbolizer = Symbolizer::new(config_for(dir.path())).with_dwarf_loader(loader.clone());
    symbolizer.add_file(&binary, 0).unwrap();

    let recorded = loader.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].info, b"PRIMARY");
    assert_eq!(recorded[0].supplementary_str.as_deref(), Some(&b"SHARED"[..]));
}

#[test]
fn test_alt_link_build_id_mismatch_is_reported()
{
    let dir = tempfile::tempdir().unwrap();
    let alt = ElfBuilder::elf64()
        .build_id(&[9, 9, 9, 9])
        .section(".debug_str", elf::SHT_PROGBITS, b"SHARED".to_vec())
        .build();
    write_file(dir.path(), "bin/shared.debug", &alt);
    let binary = write_file(
        dir.path(),
        "bin/app",
        &foo_bar()
            .alt_link("shared.debug", &[0x11, 0x22, 0x33, 0x44])
            .section(".debug_info", elf::SHT_PROGBITS, b"PRIMARY".to_vec())
            .build(),
    );

    let reporter = Arc::new(CollectingReporter::new());
    let loader = RecordingLoader::default();
    let symbolizer = Symbolizer::new(config_for(dir.path()))
        .with_dwarf_loader(loader.clone())
        .with_reporter(Arc::clone(&reporter));
    symbolizer.add_file(&binary, 0).unwrap();

    let messages = reporter.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Build-id mismatch"), "{messages:?}");
    assert!(messages[0].contains("expected 11223344, found 09090909"));
    // The primary DWARF is still loaded, without supplementary sections.
    assert_eq!(loader.recorded().len(), 1);
    assert!(loader.recorded()[0].supplementary_str.is_none());
}

#[test]
fn test_resolver_without_links_is_idempotent()
{
    let dir = tempfile::tempdir().unwrap();
    let binary = write_file(dir.path(), "bin/app", &foo_bar().build());
    let resolver = DebugFileResolver::new(dir.path().join("debug"), vec![dir.path().join("debug/.build-id")]);
    let id = BuildId::new(BUILD_ID.to_vec());
    let link = DebugLink {
        name: "app.debug".into(),
        crc: 0,
    };

    for _ in 0..3 {
        assert_eq!(resolver.find_by_build_id(&id).unwrap(), None);
        assert_eq!(resolver.find_by_debuglink(&binary, &link).unwrap(), None);
    }

    let symbolizer = Symbolizer::new(config_for(dir.path()));
    for _ in 0..2 {
        let summary = symbolizer.add_file(&binary, 0).unwrap();
        assert!(summary.companions.is_empty());
    }
}

struct ListSource(Arc<Mutex<Vec<ModuleInfo>>>);

impl ModuleSource for ListSource
{
    fn enumerate(&self) -> Vec<ModuleInfo>
    {
        self.0.lock().unwrap().clone()
    }
}

fn module(path: &Path, base: u64) -> ModuleInfo
{
    ModuleInfo {
        path: Some(path.to_path_buf()),
        base,
        segments: vec![Segment::load(0x1000, 0x100)],
    }
}

#[test]
fn test_tracker_rescans_once_per_new_module()
{
    let dir = tempfile::tempdir().unwrap();
    let exe = write_file(dir.path(), "bin/app", &foo_bar().build());
    let lib = write_file(
        dir.path(),
        "lib/libdep.so",
        &ElfBuilder::elf64()
            .function("dep_entry", 0x1000, 0x40)
            .load(0x1000, 0x100)
            .build(),
    );

    let mapped = Arc::new(Mutex::new(vec![module(&exe, 0x10_0000)]));
    let symbolizer = Symbolizer::new(config_for(dir.path())).with_module_source(ListSource(Arc::clone(&mapped)));
    assert_eq!(symbolizer.scan_count(), 0);

    assert_eq!(symbolizer.symbol(0x10_1010).unwrap().name.display_name(), "foo");
    assert_eq!(symbolizer.scan_count(), 1);
    assert_eq!(symbolizer.symbol(0x10_1010).unwrap().name.display_name(), "foo");
    assert_eq!(symbolizer.symbol(0x10_1055).unwrap().name.display_name(), "bar");
    assert_eq!(symbolizer.scan_count(), 1);

    // dlopen: the library shows up on the next miss and is loaded once.
    mapped.lock().unwrap().push(module(&lib, 0x70_0000));
    let frame = symbolizer.resolve(0x70_1008);
    assert_eq!(frame.to_string(), "dep_entry");
    assert_eq!(frame.module.as_deref(), Some(lib.to_str().unwrap()));
    assert_eq!(symbolizer.scan_count(), 2);
    symbolizer.resolve(0x70_1008);
    assert_eq!(symbolizer.scan_count(), 2);
    assert_eq!(symbolizer.loaded().len(), 2);

    let bases: Vec<_> = symbolizer.modules().iter().map(|m| m.base).collect();
    assert_eq!(bases, vec![0x70_0000, 0x10_0000]);
}

#[test]
fn test_tracker_reports_unloadable_module()
{
    let dir = tempfile::tempdir().unwrap();
    let broken = write_file(dir.path(), "lib/broken.so", b"definitely not ELF");
    let reporter = Arc::new(CollectingReporter::new());
    let symbolizer = Symbolizer::new(config_for(dir.path()))
        .with_reporter(Arc::clone(&reporter))
        .with_module_source(ListSource(Arc::new(Mutex::new(vec![module(&broken, 0x20_0000)]))));

    let frame = symbolizer.resolve(0x20_1000);
    assert!(frame.symbol.is_none());
    assert_eq!(frame.module.as_deref(), Some(broken.to_str().unwrap()));
    assert_eq!(reporter.messages().len(), 1);

    // The range is recorded, so the broken module is not retried.
    symbolizer.resolve(0x20_1000);
    assert_eq!(symbolizer.scan_count(), 1);
    assert_eq!(reporter.messages().len(), 1);
}

#[test]
fn test_concurrent_lookups()
{
    let dir = tempfile::tempdir().unwrap();
    let exe = write_file(dir.path(), "bin/app", &foo_bar().build());
    let symbolizer = Arc::new(
        Symbolizer::new(config_for(dir.path()))
            .with_module_source(ListSource(Arc::new(Mutex::new(vec![module(&exe, 0)])))),
    );
    // Load on this thread; the workers only read published tables.
    assert!(symbolizer.symbol(0x1010).is_some());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let symbolizer = Arc::clone(&symbolizer);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    assert_eq!(symbolizer.symbol(0x1010).unwrap().name.display_name(), "foo");
                    assert!(symbolizer.symbol(0x1040).is_none());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
