//! ABI layer for threading entry points the host cannot honor.

use std::ffi::c_int;

use glibcshim_runtime::shim_warn;

wrapper_fn! {
    /// The host has no asynchronous cancellation; the request is refused
    /// rather than silently dropped.
    fn pthread_cancel(thread: libc::pthread_t) -> c_int {
        shim_warn!("pthread", "pthread_cancel({thread:#x}) is not supported");
        libc::ENOSYS
    }
}
