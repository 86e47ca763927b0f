//! ABI layer for `strverscmp`.

use std::ffi::{CStr, c_char, c_int};

use glibcshim_core::string;

wrapper_fn! {
    /// glibc's version ordering: digit runs compare numerically, runs with
    /// leading zeros compare as fractional parts.
    fn strverscmp(s1: *const c_char, s2: *const c_char) -> c_int {
        let a = CStr::from_ptr(s1).to_bytes();
        let b = CStr::from_ptr(s2).to_bytes();
        string::strverscmp(a, b)
    }
}
