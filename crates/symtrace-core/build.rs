//! Build script for symtrace-core
//!
//! This script checks system requirements before compilation:
//! - Minimum Rust version
//! - Whether the target can enumerate loaded modules
//!
//! ## Requirements
//!
//! - **Rust**: 1.80.0 or newer
//! - **Live module tracking**: a libc with `dl_iterate_phdr` (Linux, Android, FreeBSD)

use std::env;

const MIN_RUST_VERSION: &str = "1.80.0";

fn main()
{
    println!("cargo:rerun-if-changed=build.rs");

    match (rustc_version::version(), rustc_version::Version::parse(MIN_RUST_VERSION)) {
        (Ok(found), Ok(minimum)) => {
            if found < minimum {
                panic!("symtrace-core requires Rust {minimum} or newer, found {found}");
            }
        }
        _ => {
            // Some build environments hide the compiler version
            println!("cargo:warning=could not verify Rust version");
        }
    }

    check_module_tracking();
}

fn check_module_tracking()
{
    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();

    if !matches!(os.as_str(), "linux" | "android" | "freebsd") {
        println!(
            "cargo:warning=target `{os}` ({family}) has no dl_iterate_phdr; live module tracking is disabled"
        );
    }
}
