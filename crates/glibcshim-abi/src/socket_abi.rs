//! ABI layer for socket creation: `socket`, `socketpair`, `accept4`.
//!
//! glibc packs `SOCK_NONBLOCK`/`SOCK_CLOEXEC` into the type word with its
//! own values; they are split off and re-encoded for the host.

use std::ffi::c_int;

use glibcshim_core::translate::socket::{SocketType, accept_flags};

use crate::foreign_tls;

fn host_type(ty: c_int) -> c_int {
    SocketType::decode(ty).encode(libc::SOCK_NONBLOCK, libc::SOCK_CLOEXEC)
}

wrapper_fn! {
    fn socket(domain: c_int, ty: c_int, protocol: c_int) -> c_int {
        let ret = libc::socket(domain, host_type(ty), protocol);
        foreign_tls::sync_errno_if_fail(i64::from(ret));
        ret
    }
}

wrapper_fn! {
    fn socketpair(domain: c_int, ty: c_int, protocol: c_int, sv: *mut c_int) -> c_int {
        let ret = libc::socketpair(domain, host_type(ty), protocol, sv);
        foreign_tls::sync_errno_if_fail(i64::from(ret));
        ret
    }
}

wrapper_fn! {
    fn accept4(
        fd: c_int,
        addr: *mut libc::sockaddr,
        len: *mut libc::socklen_t,
        flags: c_int,
    ) -> c_int {
        let host_flags = accept_flags(flags, libc::SOCK_NONBLOCK, libc::SOCK_CLOEXEC);
        let ret = libc::accept4(fd, addr, len, host_flags);
        foreign_tls::sync_errno_if_fail(i64::from(ret));
        ret
    }
}
