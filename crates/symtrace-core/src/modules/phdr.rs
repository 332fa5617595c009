//! Module enumeration through `dl_iterate_phdr`.
//!
//! Only ELF targets whose libc provides the call are supported. Elsewhere
//! the source reports no modules and live tracking does nothing.

use std::path::PathBuf;

use tracing::trace;

use super::{ModuleInfo, ModuleSource, Segment};

/// What the dynamic linker reports for one object.
#[derive(Debug, Clone)]
struct RawModule
{
    name: Vec<u8>,
    base: u64,
    segments: Vec<Segment>,
}

/// Lists the objects mapped into the current process.
#[derive(Debug, Clone)]
pub struct PhdrModuleSource
{
    exe_path: PathBuf,
}

impl PhdrModuleSource
{
    /// `exe_path` names the main executable, which the linker reports with
    /// an empty name.
    pub fn new(exe_path: impl Into<PathBuf>) -> Self
    {
        Self {
            exe_path: exe_path.into(),
        }
    }

    fn convert(&self, raw: Vec<RawModule>) -> Vec<ModuleInfo>
    {
        let mut exe_seen = false;
        raw.into_iter()
            .map(|module| {
                let path = if module.name.is_empty() {
                    // Only the first unnamed object is the executable.
                    (!std::mem::replace(&mut exe_seen, true)).then(|| self.exe_path.clone())
                } else {
                    let path = PathBuf::from(String::from_utf8_lossy(&module.name).into_owned());
                    // The vDSO and similar objects have no file behind them.
                    path.is_file().then_some(path)
                };
                trace!("module {path:?} at {:#x}", module.base);
                ModuleInfo {
                    path,
                    base: module.base,
                    segments: module.segments,
                }
            })
            .collect()
    }
}

impl Default for PhdrModuleSource
{
    fn default() -> Self
    {
        Self::new(crate::config::DEFAULT_EXE_PATH)
    }
}

impl ModuleSource for PhdrModuleSource
{
    fn enumerate(&self) -> Vec<ModuleInfo>
    {
        self.convert(imp::enumerate())
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
mod imp
{
    use std::ffi::CStr;
    use std::slice;

    use libc::{c_int, c_void, dl_iterate_phdr, dl_phdr_info, size_t};

    use super::{RawModule, Segment};

    #[allow(unsafe_code)]
    unsafe extern "C" fn callback(info: *mut dl_phdr_info, _size: size_t, data: *mut c_void) -> c_int
    {
        // SAFETY: `data` is the `Vec` passed to `dl_iterate_phdr` below and
        // `info` is valid for the duration of the callback.
        let (modules, info) = unsafe { (&mut *data.cast::<Vec<RawModule>>(), &*info) };

        let name = if info.dlpi_name.is_null() {
            Vec::new()
        } else {
            // SAFETY: non-null names are NUL-terminated strings owned by the linker.
            unsafe { CStr::from_ptr(info.dlpi_name) }.to_bytes().to_vec()
        };
        let headers = if info.dlpi_phdr.is_null() {
            &[][..]
        } else {
            // SAFETY: the linker guarantees `dlpi_phnum` headers at `dlpi_phdr`.
            unsafe { slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) }
        };

        #[allow(clippy::useless_conversion, clippy::unnecessary_cast)]
        let segments = headers
            .iter()
            .map(|ph| Segment {
                kind: ph.p_type as u32,
                vaddr: ph.p_vaddr as u64,
                memsz: ph.p_memsz as u64,
            })
            .collect();

        #[allow(clippy::unnecessary_cast)]
        modules.push(RawModule {
            name,
            base: info.dlpi_addr as u64,
            segments,
        });
        0
    }

    pub(super) fn enumerate() -> Vec<RawModule>
    {
        let mut modules: Vec<RawModule> = Vec::new();
        // SAFETY: the callback only touches `modules`, which outlives the call.
        #[allow(unsafe_code)]
        unsafe {
            dl_iterate_phdr(Some(callback), (&mut modules as *mut Vec<RawModule>).cast::<c_void>());
        }
        modules
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
mod imp
{
    use super::RawModule;

    pub(super) fn enumerate() -> Vec<RawModule>
    {
        Vec::new()
    }
}
