//! String routines whose glibc behavior differs from the host's.

pub mod verscmp;

pub use verscmp::strverscmp;
