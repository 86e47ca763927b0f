//! `<ctype.h>` table accessors.
//!
//! glibc's classification macros read the tables directly, so the wrappers
//! only hand out pointers to the per-thread table pointers in the foreign
//! block.

use std::ffi::c_ushort;

use crate::foreign_tls;

pub unsafe extern "C" fn __ctype_b_loc() -> *const *const c_ushort {
    unsafe { (&raw const (*foreign_tls::block()).ctype_b).cast() }
}

pub unsafe extern "C" fn __ctype_tolower_loc() -> *const *const i32 {
    unsafe { (&raw const (*foreign_tls::block()).ctype_tolower).cast() }
}

pub unsafe extern "C" fn __ctype_toupper_loc() -> *const *const i32 {
    unsafe { (&raw const (*foreign_tls::block()).ctype_toupper).cast() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glibcshim_core::tls::ctype::{IS_ALPHA, IS_DIGIT, IS_SPACE, IS_UPPER};

    // What glibc's `isalpha(c)` macro expands to.
    fn class(c: i32) -> u16 {
        unsafe { *(*__ctype_b_loc()).offset(c as isize) }
    }

    #[test]
    fn macros_see_glibc_bits() {
        assert_ne!(class(i32::from(b'A')) & IS_UPPER, 0);
        assert_ne!(class(i32::from(b'z')) & IS_ALPHA, 0);
        assert_ne!(class(i32::from(b'7')) & IS_DIGIT, 0);
        assert_ne!(class(i32::from(b' ')) & IS_SPACE, 0);
        assert_eq!(class(-1), 0, "EOF indexes valid memory");
        assert_eq!(class(-128), 0);
    }

    #[test]
    fn case_tables_cover_signed_chars() {
        unsafe {
            let lower = *__ctype_tolower_loc();
            let upper = *__ctype_toupper_loc();
            assert_eq!(*lower.offset(i32::from(b'Q') as isize), i32::from(b'q'));
            assert_eq!(*upper.offset(i32::from(b'q') as isize), i32::from(b'Q'));
            assert_eq!(*lower.offset(-1), -1);
            assert_eq!(*upper.offset(200), 200);
        }
    }
}
