//! ABI layer for `sysconf` and for Linux-specific calls the host does not
//! provide (`capget`, `capset`, `name_to_handle_at`).

use std::ffi::{c_char, c_int, c_long, c_void};

use glibcshim_core::translate::sysconf::SysconfName;
use glibcshim_runtime::shim_debug;

use crate::foreign_tls;
use crate::util::fail;

/// Cache line size reported when the host has no `_SC_LEVEL1_DCACHE_LINESIZE`.
const DEFAULT_CACHE_LINE: c_long = 64;

/// Host `_SC_*` number for a decoded name. `None` means the host has no
/// such query.
pub fn host_sysconf_name(name: SysconfName) -> Option<c_int> {
    Some(match name {
        SysconfName::ArgMax => libc::_SC_ARG_MAX,
        SysconfName::ChildMax => libc::_SC_CHILD_MAX,
        SysconfName::ClkTck => libc::_SC_CLK_TCK,
        SysconfName::NgroupsMax => libc::_SC_NGROUPS_MAX,
        SysconfName::OpenMax => libc::_SC_OPEN_MAX,
        SysconfName::PageSize => libc::_SC_PAGESIZE,
        SysconfName::LineMax => libc::_SC_LINE_MAX,
        SysconfName::IovMax => libc::_SC_IOV_MAX,
        SysconfName::GetgrRSizeMax => libc::_SC_GETGR_R_SIZE_MAX,
        SysconfName::GetpwRSizeMax => libc::_SC_GETPW_R_SIZE_MAX,
        SysconfName::LoginNameMax => libc::_SC_LOGIN_NAME_MAX,
        SysconfName::TtyNameMax => libc::_SC_TTY_NAME_MAX,
        SysconfName::ThreadKeysMax => libc::_SC_THREAD_KEYS_MAX,
        SysconfName::ThreadStackMin => libc::_SC_THREAD_STACK_MIN,
        SysconfName::NprocessorsConf => libc::_SC_NPROCESSORS_CONF,
        SysconfName::NprocessorsOnln => libc::_SC_NPROCESSORS_ONLN,
        SysconfName::PhysPages => libc::_SC_PHYS_PAGES,
        SysconfName::AvphysPages => libc::_SC_AVPHYS_PAGES,
        SysconfName::MonotonicClock => libc::_SC_MONOTONIC_CLOCK,
        SysconfName::HostNameMax => libc::_SC_HOST_NAME_MAX,
        #[cfg(target_env = "gnu")]
        SysconfName::Level1DcacheLinesize => libc::_SC_LEVEL1_DCACHE_LINESIZE,
        #[cfg(not(target_env = "gnu"))]
        SysconfName::Level1DcacheLinesize => return None,
    })
}

wrapper_fn! {
    fn sysconf(name: c_int) -> c_long {
        let Some(decoded) = SysconfName::from_glibc(name) else {
            shim_debug!("sysconf", "unknown glibc name {name}");
            return fail(libc::EINVAL, -1);
        };
        match host_sysconf_name(decoded) {
            Some(host) => {
                // -1 with errno untouched means "no limit".
                *libc::__errno_location() = 0;
                let ret = libc::sysconf(host);
                foreign_tls::sync_errno_silent();
                ret
            }
            None if decoded == SysconfName::Level1DcacheLinesize => DEFAULT_CACHE_LINE,
            None => fail(libc::EINVAL, -1),
        }
    }
}

// ---------------------------------------------------------------------------
// Unsupported
// ---------------------------------------------------------------------------

wrapper_fn! {
    fn capget(_header: *mut c_void, _data: *mut c_void) -> c_int {
        fail(libc::ENOSYS, -1)
    }
}

wrapper_fn! {
    fn capset(_header: *mut c_void, _data: *const c_void) -> c_int {
        fail(libc::ENOSYS, -1)
    }
}

wrapper_fn! {
    fn name_to_handle_at(
        _dirfd: c_int,
        _path: *const c_char,
        _handle: *mut c_void,
        _mount_id: *mut c_int,
        _flags: c_int,
    ) -> c_int {
        fail(libc::EOPNOTSUPP, -1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glibc_page_size_query() {
        let page = unsafe { sysconf(30) };
        assert_eq!(page, unsafe { libc::sysconf(libc::_SC_PAGESIZE) });
        assert!(unsafe { sysconf(84) } >= 1);
    }

    #[test]
    fn unknown_name_is_einval() {
        assert_eq!(unsafe { sysconf(9999) }, -1);
        assert_eq!(foreign_tls::errno(), libc::EINVAL);
    }

    #[test]
    fn every_decoded_name_has_an_answer() {
        for name in SysconfName::all() {
            let v = unsafe { sysconf(name.glibc_number()) };
            assert!(v != -1 || foreign_tls::errno() != libc::EINVAL, "{name:?}");
        }
    }

    #[test]
    fn capability_calls_are_unsupported() {
        let ret = unsafe { capget(std::ptr::null_mut(), std::ptr::null_mut()) };
        assert_eq!((ret, foreign_tls::errno()), (-1, libc::ENOSYS));
        let ret = unsafe { name_to_handle_at(0, c"/".as_ptr(), std::ptr::null_mut(), std::ptr::null_mut(), 0) };
        assert_eq!((ret, foreign_tls::errno()), (-1, libc::EOPNOTSUPP));
    }
}
