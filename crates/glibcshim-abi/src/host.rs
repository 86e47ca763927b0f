//! The host C library as a symbol and module provider.

use std::ffi::{CString, c_int, c_void};

use glibcshim_core::translate::dlfcn::{DlopenMode, HostRtld};
use glibcshim_runtime::shim_debug;

/// Library names a glibc system uses that the host spells differently. A
/// requested name starting with the first column is opened as the second.
pub const NATIVE_REDIRECTS: &[(&str, &str)] = &[
    ("libSDL2-2.0.so", "libSDL2.so"),
    ("libGL.so.1", "libGL.so"),
    ("libGLU.so.1", "libGLU.so"),
    ("libEGL.so.1", "libEGL.so"),
    ("libGLESv2.so.2", "libGLESv2.so"),
    ("libopenal.so.1", "libopenal.so"),
    ("libvulkan.so.1", "libvulkan.so"),
];

/// The host's spelling of `name`, if it is redirected.
pub fn redirect(name: &str) -> Option<&'static str> {
    let base = name.rsplit('/').next().unwrap_or(name);
    NATIVE_REDIRECTS
        .iter()
        .find(|(prefix, _)| base.starts_with(prefix))
        .map(|&(_, native)| native)
}

/// Host values of the `RTLD_*` bits.
pub fn host_rtld() -> HostRtld {
    HostRtld {
        lazy: libc::RTLD_LAZY,
        now: libc::RTLD_NOW,
        global: libc::RTLD_GLOBAL,
        local: libc::RTLD_LOCAL,
        noload: libc::RTLD_NOLOAD,
        nodelete: libc::RTLD_NODELETE,
    }
}

/// `dlsym(RTLD_DEFAULT, name)`.
pub fn lookup(name: &str) -> Option<u64> {
    let cname = CString::new(name).ok()?;
    // SAFETY: valid NUL-terminated name; RTLD_DEFAULT is always a valid
    // handle.
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
    (!addr.is_null()).then_some(addr as u64)
}

/// `dlsym(handle, name)` on a host handle.
pub fn lookup_in(handle: *mut c_void, name: &str) -> Option<u64> {
    let cname = CString::new(name).ok()?;
    // SAFETY: `handle` came from the host's dlopen.
    let addr = unsafe { libc::dlsym(handle, cname.as_ptr()) };
    (!addr.is_null()).then_some(addr as u64)
}

/// Open `name` on the host, trying the redirected spelling first.
pub fn open(name: &str, mode: DlopenMode) -> Result<*mut c_void, String> {
    let flags = mode.encode(host_rtld());
    let candidates = redirect(name).into_iter().chain(std::iter::once(name));
    let mut last = format!("{name}: cannot open shared object file");
    for candidate in candidates {
        let Ok(cname) = CString::new(candidate) else {
            continue;
        };
        // SAFETY: valid NUL-terminated name.
        let handle = unsafe { libc::dlopen(cname.as_ptr(), flags) };
        if !handle.is_null() {
            shim_debug!("host", "dlopen {name} as {candidate}");
            return Ok(handle);
        }
        last = host_dlerror().unwrap_or(last);
    }
    Err(last)
}

pub fn close(handle: *mut c_void) -> c_int {
    // SAFETY: `handle` came from `open`.
    unsafe { libc::dlclose(handle) }
}

fn host_dlerror() -> Option<String> {
    // SAFETY: dlerror returns null or a NUL-terminated string owned by the
    // host, valid until the next dl* call on this thread.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        return None;
    }
    Some(
        unsafe { std::ffi::CStr::from_ptr(msg) }
            .to_string_lossy()
            .into_owned(),
    )
}
