//! C API for collaborators: the only symbols this library exports.
//!
//! Failures return null or `-1` and leave a message for
//! [`glibcshim_last_error`] on the calling thread.

use std::cell::RefCell;
use std::ffi::{CStr, CString, OsStr, c_char, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use glibcshim_core::{CatalogStats, ShimError};
use glibcshim_runtime::{LogLevel, clear_sink, set_sink, shim_info};

use crate::catalog::{CatalogRow, c_rows, catalog};
use crate::context::context;
use crate::util::c_str;

std::thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn record(err: &ShimError) {
    let msg = CString::new(err.to_string()).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
}

fn record_name_error() -> ShimError {
    let err = ShimError::resolution("<invalid name>");
    record(&err);
    err
}

/// Log and return the catalog's entry counts.
pub fn dump_catalog_stats() -> CatalogStats {
    let stats = catalog().stats();
    shim_info!("catalog", "catalog: {stats}");
    stats
}

// ---------------------------------------------------------------------------
// Resolution and loading
// ---------------------------------------------------------------------------

/// Address of `name` as foreign code should see it, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glibcshim_resolve(name: *const c_char) -> *mut c_void {
    let Some(name) = (unsafe { c_str(name) }) else {
        record_name_error();
        return std::ptr::null_mut();
    };
    match context().resolve_address(name) {
        Ok(addr) => addr as *mut c_void,
        Err(e) => {
            record(&e);
            std::ptr::null_mut()
        }
    }
}

/// Load a foreign image and its dependencies. Returns an opaque handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glibcshim_load(path: *const c_char) -> *mut c_void {
    if path.is_null() {
        record(&ShimError::load("<null>", "no path"));
        return std::ptr::null_mut();
    }
    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();
    match context().load(Path::new(OsStr::from_bytes(bytes))) {
        Ok(handle) => handle as *mut c_void,
        Err(e) => {
            record(&e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn glibcshim_unload(handle: *mut c_void) -> c_int {
    match context().unload(handle as usize) {
        Ok(()) => 0,
        Err(e) => {
            record(&e);
            -1
        }
    }
}

/// Look `name` up in one module's exports only.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn glibcshim_dlsym_from_handle(
    handle: *mut c_void,
    name: *const c_char,
) -> *mut c_void {
    let Some(name) = (unsafe { c_str(name) }) else {
        record_name_error();
        return std::ptr::null_mut();
    };
    match context().dlsym_from_handle(handle as usize, name) {
        Ok(addr) => addr as *mut c_void,
        Err(e) => {
            record(&e);
            std::ptr::null_mut()
        }
    }
}

/// The last failure on this thread, or null. The string stays valid until
/// the next failing call on the same thread.
#[unsafe(no_mangle)]
pub extern "C" fn glibcshim_last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ref().map_or(std::ptr::null(), |m| m.as_ptr()))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// `void (*)(int level, const char *tag, const char *message)`.
pub type LogCallback = extern "C" fn(c_int, *const c_char, *const c_char);

/// Route log records to `cb`, or back to stderr when `cb` is null.
#[unsafe(no_mangle)]
pub extern "C" fn glibcshim_set_log_callback(cb: Option<LogCallback>) {
    let Some(cb) = cb else {
        clear_sink();
        return;
    };
    set_sink(move |level: LogLevel, tag: &str, message: &str| {
        let tag = CString::new(tag).unwrap_or_default();
        let message = CString::new(message).unwrap_or_default();
        cb(level as c_int, tag.as_ptr(), message.as_ptr());
    });
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The catalog rows, ending with `{NULL, NULL}`.
#[unsafe(no_mangle)]
pub extern "C" fn glibcshim_catalog() -> *const CatalogRow {
    c_rows().as_ptr()
}

/// C mirror of [`CatalogStats`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlibcshimCatalogStats {
    pub total: usize,
    pub wrappers: usize,
    pub passthrough: usize,
}

#[unsafe(no_mangle)]
pub extern "C" fn glibcshim_dump_catalog_stats() -> GlibcshimCatalogStats {
    let s = dump_catalog_stats();
    GlibcshimCatalogStats {
        total: s.total,
        wrappers: s.wrappers,
        passthrough: s.passthrough,
    }
}
