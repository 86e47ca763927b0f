//! ABI layer for `<dlfcn.h>` functions.
//!
//! Foreign images opened with `dlopen` are loaded by the shim's own loader
//! and get odd handles; anything else goes to the host linker (through the
//! native redirect table) and keeps the host's handle. `dlsym` on a host
//! handle still prefers a catalog handler, so a glibc library looked up by
//! name never bypasses translation.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ffi::{CString, c_char, c_int, c_void};
use std::path::{Path, PathBuf};

use glibcshim_core::elf::{Arch, ForeignImage};
use glibcshim_core::translate::dlfcn::{
    self as dlfcn_core, DlopenMode, RTLD_DEFAULT, RTLD_NEXT, is_runtime_library,
};
use glibcshim_runtime::{config, shim_debug};
use parking_lot::Mutex;

use crate::catalog::catalog;
use crate::context::{context, is_foreign_handle};
use crate::host;
use crate::util::c_str;

// ---------------------------------------------------------------------------
// Thread-local dlerror state
// ---------------------------------------------------------------------------

std::thread_local! {
    static PENDING: RefCell<Option<CString>> = const { RefCell::new(None) };
    static REPORTED: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the thread-local dlerror message.
fn set_dlerror(msg: impl Into<Vec<u8>>) {
    let msg = CString::new(msg).unwrap_or_default();
    shim_debug!("dlfcn", "{}", msg.to_string_lossy());
    PENDING.with(|p| *p.borrow_mut() = Some(msg));
}

/// Clear the thread-local dlerror message.
fn clear_dlerror() {
    PENDING.with(|p| *p.borrow_mut() = None);
}

// ---------------------------------------------------------------------------
// dlopen
// ---------------------------------------------------------------------------

/// Whether `path` is an image built against glibc: an ELF for this machine
/// that needs one of the C runtime libraries.
fn is_foreign_image(path: &Path) -> bool {
    let Some(arch) = Arch::host() else {
        return false;
    };
    let Ok(data) = std::fs::read(path) else {
        return false;
    };
    ForeignImage::parse(&data, arch)
        .is_ok_and(|image| image.needed.iter().any(|n| is_runtime_library(n)))
}

/// Where a foreign image for `name` would come from, if there is one.
fn locate_foreign(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_foreign_image(&path).then_some(path);
    }
    config()
        .library_path
        .iter()
        .map(|dir| dir.join(name))
        .find(|p| p.is_file())
}

/// Handle for the host's global scope.
fn host_global(mode: DlopenMode) -> *mut c_void {
    // SAFETY: a null filename asks for the main program.
    unsafe { libc::dlopen(std::ptr::null(), mode.encode(host::host_rtld())) }
}

/// Open a shared object.
///
/// If `filename` is null, returns a handle to the main program. `flags`
/// must have exactly one of `RTLD_LAZY` or `RTLD_NOW` set; additional
/// modifier flags are allowed and `RTLD_DEEPBIND` is dropped.
pub unsafe extern "C" fn dlopen(filename: *const c_char, flags: c_int) -> *mut c_void {
    let Some(mode) = DlopenMode::decode(flags) else {
        set_dlerror(dlfcn_core::ERR_INVALID_FLAGS);
        return std::ptr::null_mut();
    };
    clear_dlerror();
    if filename.is_null() {
        return host_global(mode);
    }
    let Some(name) = (unsafe { c_str(filename) }) else {
        set_dlerror("dlopen: file name is not valid UTF-8");
        return std::ptr::null_mut();
    };
    let base = name.rsplit('/').next().unwrap_or(name);
    if is_runtime_library(base) {
        return host_global(mode);
    }

    if mode.noload {
        if let Some(handle) = context().reference(Path::new(name)) {
            return handle as *mut c_void;
        }
    } else if let Some(path) = locate_foreign(name) {
        return match context().load_with(&path, mode) {
            Ok(handle) => handle as *mut c_void,
            Err(e) => {
                set_dlerror(e.to_string());
                std::ptr::null_mut()
            }
        };
    }

    match host::open(name, mode) {
        Ok(handle) => handle,
        Err(reason) => {
            set_dlerror(reason);
            std::ptr::null_mut()
        }
    }
}

// ---------------------------------------------------------------------------
// dlsym / dlvsym
// ---------------------------------------------------------------------------

fn lookup(handle: usize, name: &str) -> Option<usize> {
    if handle == RTLD_DEFAULT || handle == RTLD_NEXT {
        return context().resolve_address(name).ok();
    }
    if is_foreign_handle(handle) {
        return context().dlsym_from_handle(handle, name).ok();
    }
    if let Some(addr) = catalog().lookup(name).and_then(|e| e.handler) {
        return Some(addr);
    }
    host::lookup_in(handle as *mut c_void, name).map(|a| a as usize)
}

/// Resolve a symbol. `RTLD_NEXT` is treated as `RTLD_DEFAULT`.
pub unsafe extern "C" fn dlsym(handle: *mut c_void, symbol: *const c_char) -> *mut c_void {
    let Some(name) = (unsafe { c_str(symbol) }) else {
        set_dlerror(dlfcn_core::ERR_SYMBOL_NOT_FOUND);
        return std::ptr::null_mut();
    };
    clear_dlerror();
    match lookup(handle as usize, name) {
        Some(addr) => addr as *mut c_void,
        None => {
            set_dlerror(format!("{name}: {}", dlfcn_core::ERR_SYMBOL_NOT_FOUND));
            std::ptr::null_mut()
        }
    }
}

/// Versioned lookup. The host has no symbol versions, so `version` is
/// ignored.
pub unsafe extern "C" fn dlvsym(
    handle: *mut c_void,
    symbol: *const c_char,
    _version: *const c_char,
) -> *mut c_void {
    unsafe { dlsym(handle, symbol) }
}

// ---------------------------------------------------------------------------
// dlclose
// ---------------------------------------------------------------------------

pub unsafe extern "C" fn dlclose(handle: *mut c_void) -> c_int {
    let h = handle as usize;
    if dlfcn_core::is_pseudo_handle(h) {
        set_dlerror(dlfcn_core::ERR_INVALID_HANDLE);
        return -1;
    }
    if is_foreign_handle(h) {
        return match context().unload(h) {
            Ok(()) => 0,
            Err(e) => {
                set_dlerror(e.to_string());
                -1
            }
        };
    }
    let rc = host::close(handle);
    if rc != 0 {
        set_dlerror(dlfcn_core::ERR_INVALID_HANDLE);
    }
    rc
}

// ---------------------------------------------------------------------------
// dlerror
// ---------------------------------------------------------------------------

/// The last error on this thread, or null. Reading clears it; the string
/// stays valid until the next `dlerror` call on the same thread.
pub unsafe extern "C" fn dlerror() -> *const c_char {
    let msg = PENDING.with(|p| p.borrow_mut().take());
    REPORTED.with(|r| {
        let mut r = r.borrow_mut();
        *r = msg;
        r.as_ref().map_or(std::ptr::null(), |m| m.as_ptr())
    })
}

// ---------------------------------------------------------------------------
// dladdr
// ---------------------------------------------------------------------------

/// glibc's `Dl_info`.
#[repr(C)]
#[derive(Debug)]
pub struct GlibcDlInfo {
    pub dli_fname: *const c_char,
    pub dli_fbase: *mut c_void,
    pub dli_sname: *const c_char,
    pub dli_saddr: *mut c_void,
}

/// Module paths handed out through `dli_fname`. They must outlive the
/// module, so they are kept for the life of the process.
static FILE_NAMES: Mutex<BTreeMap<PathBuf, CString>> = Mutex::new(BTreeMap::new());

fn interned(path: &Path) -> *const c_char {
    let mut names = FILE_NAMES.lock();
    names
        .entry(path.to_path_buf())
        .or_insert_with(|| CString::new(path.as_os_str().as_encoded_bytes()).unwrap_or_default())
        .as_ptr()
}

/// Describe `addr`. Addresses inside foreign modules report the module;
/// symbol names are not recovered for them.
pub unsafe extern "C" fn dladdr(addr: *const c_void, info: *mut GlibcDlInfo) -> c_int {
    if info.is_null() {
        return 0;
    }
    let a = addr as usize;
    if let Some(handle) = context().module_containing(a)
        && let Some(m) = context().enumerate_loaded().into_iter().find(|m| m.handle == handle)
    {
        unsafe {
            info.write(GlibcDlInfo {
                dli_fname: interned(&m.path),
                dli_fbase: m.base as *mut c_void,
                dli_sname: std::ptr::null(),
                dli_saddr: std::ptr::null_mut(),
            })
        };
        return 1;
    }
    // SAFETY: `Dl_info` has the same four pointer fields on the host.
    unsafe { libc::dladdr(addr, info.cast()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glibcshim_core::translate::dlfcn::{RTLD_LAZY, RTLD_NOW};

    fn take_error() -> Option<String> {
        let p = unsafe { dlerror() };
        (!p.is_null()).then(|| unsafe { std::ffi::CStr::from_ptr(p) }.to_string_lossy().into_owned())
    }

    #[test]
    fn invalid_flags_set_dlerror_once() {
        let h = unsafe { dlopen(c"libm.so.6".as_ptr(), 0) };
        assert!(h.is_null());
        assert_eq!(take_error().as_deref(), Some(dlfcn_core::ERR_INVALID_FLAGS));
        assert_eq!(take_error(), None);
    }

    #[test]
    fn runtime_library_names_share_the_global_scope() {
        let h = unsafe { dlopen(c"libc.so.6".as_ptr(), RTLD_NOW) };
        assert!(!h.is_null());
        let strftime = unsafe { dlsym(h, c"strftime".as_ptr()) };
        let handler = catalog().lookup("strftime").and_then(|e| e.handler);
        assert_eq!(Some(strftime as usize), handler);
    }

    #[test]
    fn default_scope_prefers_the_catalog() {
        let p = unsafe { dlsym(std::ptr::null_mut(), c"qsort_r".as_ptr()) };
        assert_eq!(p as usize, crate::stdlib_abi::qsort_r as *const () as usize);
        let missing = unsafe { dlsym(std::ptr::null_mut(), c"glibcshim_no_such_symbol".as_ptr()) };
        assert!(missing.is_null());
        assert!(take_error().is_some_and(|e| e.contains("glibcshim_no_such_symbol")));
    }

    #[test]
    fn missing_library_reports_error() {
        let h = unsafe { dlopen(c"libglibcshim-nowhere.so.3".as_ptr(), RTLD_LAZY) };
        assert!(h.is_null());
        assert!(take_error().is_some());
    }

    #[test]
    fn closing_unknown_foreign_handle_fails() {
        assert_eq!(unsafe { dlclose(0x7777 as *mut c_void) }, -1);
        assert!(take_error().is_some());
    }
}
