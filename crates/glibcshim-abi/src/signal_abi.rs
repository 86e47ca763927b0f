//! ABI layer for the GNU signal-set extensions: `sigisemptyset`,
//! `sigandset`, `sigorset`.
//!
//! Built from the portable `sigismember`/`sigaddset` primitives so they do
//! not depend on the host's `sigset_t` internals.

use std::ffi::c_int;

use crate::util::fail;

/// Highest signal number plus one (real-time signals included).
const NSIG: c_int = 65;

unsafe fn member(set: *const libc::sigset_t, sig: c_int) -> bool {
    unsafe { libc::sigismember(set, sig) == 1 }
}

unsafe fn combine(
    dest: *mut libc::sigset_t,
    left: *const libc::sigset_t,
    right: *const libc::sigset_t,
    keep: impl Fn(bool, bool) -> bool,
) -> c_int {
    if dest.is_null() || left.is_null() || right.is_null() {
        return fail(libc::EINVAL, -1);
    }
    // `dest` may alias an input.
    let (l, r) = unsafe { (left.read(), right.read()) };
    unsafe { libc::sigemptyset(dest) };
    for sig in 1..NSIG {
        if keep(unsafe { member(&l, sig) }, unsafe { member(&r, sig) }) {
            unsafe { libc::sigaddset(dest, sig) };
        }
    }
    0
}

wrapper_fn! {
    fn sigisemptyset(set: *const libc::sigset_t) -> c_int {
        if set.is_null() {
            return fail(libc::EINVAL, -1);
        }
        c_int::from(!(1..NSIG).any(|sig| member(set, sig)))
    }
}

wrapper_fn! {
    fn sigandset(dest: *mut libc::sigset_t, left: *const libc::sigset_t, right: *const libc::sigset_t) -> c_int {
        combine(dest, left, right, |a, b| a && b)
    }
}

wrapper_fn! {
    fn sigorset(dest: *mut libc::sigset_t, left: *const libc::sigset_t, right: *const libc::sigset_t) -> c_int {
        combine(dest, left, right, |a, b| a || b)
    }
}
