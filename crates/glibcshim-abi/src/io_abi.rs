//! ABI layer for `open`, `openat`, `open64` and `fcntl`.
//!
//! glibc's `O_*` bits are remapped to the host's by name. `fcntl` commands
//! are decoded in core and re-issued with host numbering; `F_GETFL` results
//! are mapped back.

use std::ffi::{c_char, c_int, c_long};
use std::sync::OnceLock;

use glibcshim_core::translate::FlagTable;
use glibcshim_core::translate::fcntl::{FcntlCommand, GLIBC_OPEN_FLAGS};

use crate::foreign_tls;

/// The host's `O_*` values, by glibc name.
const HOST_OPEN_FLAGS: &[(&str, i32)] = &[
    ("O_CREAT", libc::O_CREAT),
    ("O_EXCL", libc::O_EXCL),
    ("O_NOCTTY", libc::O_NOCTTY),
    ("O_TRUNC", libc::O_TRUNC),
    ("O_APPEND", libc::O_APPEND),
    ("O_NONBLOCK", libc::O_NONBLOCK),
    ("O_DSYNC", libc::O_DSYNC),
    ("O_ASYNC", libc::O_ASYNC),
    ("O_DIRECT", libc::O_DIRECT),
    ("O_LARGEFILE", libc::O_LARGEFILE),
    ("O_DIRECTORY", libc::O_DIRECTORY),
    ("O_NOFOLLOW", libc::O_NOFOLLOW),
    ("O_NOATIME", libc::O_NOATIME),
    ("O_CLOEXEC", libc::O_CLOEXEC),
    ("O_SYNC", libc::O_SYNC),
    ("O_PATH", libc::O_PATH),
    ("O_TMPFILE", libc::O_TMPFILE),
];

pub fn open_flags() -> &'static FlagTable {
    static TABLE: OnceLock<FlagTable> = OnceLock::new();
    TABLE.get_or_init(|| FlagTable::by_name(GLIBC_OPEN_FLAGS, HOST_OPEN_FLAGS))
}

fn finish(ret: c_int) -> c_int {
    foreign_tls::sync_errno_if_fail(i64::from(ret));
    ret
}

// ---------------------------------------------------------------------------
// open / openat
// ---------------------------------------------------------------------------

// glibc declares these variadic. The catalog hands out fixed-argument
// handlers: on both supported ABIs the optional mode arrives in the third
// (fourth for openat) integer register either way.

wrapper_fn! {
    fn open(path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
        finish(libc::open(path, open_flags().to_host(flags), mode as libc::c_uint))
    }
}

wrapper_fn! {
    fn openat(dirfd: c_int, path: *const c_char, flags: c_int, mode: libc::mode_t) -> c_int {
        finish(libc::openat(dirfd, path, open_flags().to_host(flags), mode as libc::c_uint))
    }
}

// ---------------------------------------------------------------------------
// fcntl
// ---------------------------------------------------------------------------

/// Host command number for a decoded command.
fn host_command(cmd: FcntlCommand) -> c_int {
    match cmd {
        FcntlCommand::DupFd => libc::F_DUPFD,
        FcntlCommand::DupFdCloexec => libc::F_DUPFD_CLOEXEC,
        FcntlCommand::GetFd => libc::F_GETFD,
        FcntlCommand::SetFd => libc::F_SETFD,
        FcntlCommand::GetFl => libc::F_GETFL,
        FcntlCommand::SetFl => libc::F_SETFL,
        FcntlCommand::GetLk => libc::F_GETLK,
        FcntlCommand::SetLk => libc::F_SETLK,
        FcntlCommand::SetLkW => libc::F_SETLKW,
        FcntlCommand::OfdGetLk => libc::F_OFD_GETLK,
        FcntlCommand::OfdSetLk => libc::F_OFD_SETLK,
        FcntlCommand::OfdSetLkW => libc::F_OFD_SETLKW,
        FcntlCommand::Other(n) => n,
    }
}

wrapper_fn! {
    /// `struct flock` has the same 64-bit layout on both sides, so lock
    /// commands pass the pointer through.
    fn fcntl(fd: c_int, cmd: c_int, arg: c_long) -> c_int {
        let decoded = FcntlCommand::decode(cmd);
        let host_cmd = host_command(decoded);
        let ret = match decoded {
            FcntlCommand::SetFl => libc::fcntl(fd, host_cmd, open_flags().to_host(arg as c_int)),
            FcntlCommand::GetFl => {
                let r = libc::fcntl(fd, host_cmd);
                if r >= 0 { open_flags().to_foreign(r) } else { r }
            }
            c if c.takes_lock() => libc::fcntl(fd, host_cmd, arg as *mut libc::flock),
            _ => libc::fcntl(fd, host_cmd, arg),
        };
        finish(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glibcshim_core::translate::fcntl::{F_GETFL, F_SETFL};

    #[test]
    fn glibc_flags_reach_the_host() {
        let t = open_flags();
        assert_eq!(t.to_host(0o100 | 0o1000), libc::O_CREAT | libc::O_TRUNC);
        assert_eq!(t.to_host(0o2000000), libc::O_CLOEXEC);
        assert_eq!(t.to_host(libc::O_RDWR), libc::O_RDWR);
    }

    #[test]
    fn setfl_and_getfl_round_trip_through_host() {
        let path = c"/dev/null";
        let fd = unsafe { open(path.as_ptr(), libc::O_RDONLY, 0) };
        assert!(fd >= 0);
        let glibc_nonblock = 0o4000;
        assert_eq!(unsafe { fcntl(fd, F_SETFL, glibc_nonblock) }, 0);
        let fl = unsafe { fcntl(fd, F_GETFL, 0) };
        assert_ne!(fl & glibc_nonblock as c_int, 0);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn failed_open_sets_foreign_errno() {
        let ret = unsafe { open(c"/nonexistent/x".as_ptr(), 0, 0) };
        assert_eq!(ret, -1);
        assert_eq!(foreign_tls::errno(), libc::ENOENT);
    }
}
