//! ABI layer for TLS access and stack protection: `__tls_get_addr`,
//! `__stack_chk_fail`, `__stack_chk_guard`.

use std::ffi::c_void;
use std::sync::atomic::AtomicU64;

use glibcshim_runtime::shim_error;

use crate::foreign_tls;

/// The `tls_index` pair general-dynamic code passes to `__tls_get_addr`.
/// The module id is the one `R_*_DTPMOD64` stored for the module.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsIndex {
    pub module: u64,
    pub offset: u64,
}

wrapper_fn! {
    fn __tls_get_addr(index: *const TlsIndex) -> *mut c_void {
        let TlsIndex { module, offset } = index.read();
        foreign_tls::arena_address(module, offset) as *mut c_void
    }
}

/// Canary for code that reads a global guard (aarch64) instead of the
/// thread-pointer slot. Seeded when the catalog is built.
pub static STACK_CHK_GUARD: AtomicU64 = AtomicU64::new(0);

wrapper_fn! {
    fn __stack_chk_fail() {
        shim_error!("tls", "stack smashing detected in foreign code");
        std::process::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_addr_matches_arena_address() {
        let Ok(slot) = foreign_tls::reserve_slot(32, 8, &[7; 32]) else {
            return;
        };
        let index = TlsIndex {
            module: slot.module_id,
            offset: 4,
        };
        let p = unsafe { __tls_get_addr(&index) } as usize;
        assert_eq!(p, foreign_tls::arena_address(slot.module_id, 4));
        assert_eq!(unsafe { *(p as *const u8) }, 7);
        foreign_tls::release_slot(slot.module_id);
    }
}
