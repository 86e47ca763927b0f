//! `<errno.h>`: the foreign errno and the program-name variables.
//!
//! `errno` lives in the foreign block, not the host's thread data, so a
//! host call only changes what foreign code sees once a wrapper syncs it.

use std::ffi::{CString, c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::foreign_tls;

pub unsafe extern "C" fn __errno_location() -> *mut c_int {
    foreign_tls::errno_location()
}

// glibc exports these two as `char *` data symbols; the catalog hands out
// the addresses of the statics.
pub static PROGRAM_INVOCATION_NAME: AtomicPtr<c_char> = AtomicPtr::new(std::ptr::null_mut());
pub static PROGRAM_INVOCATION_SHORT_NAME: AtomicPtr<c_char> = AtomicPtr::new(std::ptr::null_mut());

static ARGV0: OnceLock<CString> = OnceLock::new();

/// Fill the program-name variables from `argv[0]`. Returns the full and
/// short name addresses.
pub fn program_names() -> (usize, usize) {
    let full = ARGV0.get_or_init(|| {
        let arg0 = std::env::args_os().next().unwrap_or_default();
        CString::new(arg0.as_bytes()).unwrap_or_default()
    });
    let bytes = full.as_bytes();
    let short_at = bytes.iter().rposition(|&b| b == b'/').map_or(0, |p| p + 1);
    let full_ptr = full.as_ptr().cast_mut();
    // SAFETY: `short_at <= bytes.len()`, which is inside the NUL-terminated
    // buffer.
    let short_ptr = unsafe { full_ptr.add(short_at) };
    PROGRAM_INVOCATION_NAME.store(full_ptr, Ordering::Release);
    PROGRAM_INVOCATION_SHORT_NAME.store(short_ptr, Ordering::Release);
    (full_ptr as usize, short_ptr as usize)
}
