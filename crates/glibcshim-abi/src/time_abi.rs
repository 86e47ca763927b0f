//! ABI layer for `strftime` and `strftime_l`.
//!
//! Output is produced by the C-locale formatter in core, so foreign code
//! sees glibc's exact rendering of `%c`, `%x`, `%P`, the `_-0^#` flags and
//! the `E`/`O` modifiers regardless of what the host libc supports.

use std::ffi::{CStr, c_char, c_void};

use glibcshim_core::time::{self, BrokenDownTime};

/// Copy the foreign `struct tm` into core's representation.
///
/// # Safety
///
/// `tm` must point to a readable `struct tm`; `tm_zone` may be null.
pub unsafe fn broken_down(tm: *const libc::tm) -> BrokenDownTime {
    let tm = unsafe { &*tm };
    let zone = (!tm.tm_zone.is_null())
        .then(|| unsafe { CStr::from_ptr(tm.tm_zone) }.to_string_lossy().into_owned());
    BrokenDownTime {
        tm_sec: tm.tm_sec,
        tm_min: tm.tm_min,
        tm_hour: tm.tm_hour,
        tm_mday: tm.tm_mday,
        tm_mon: tm.tm_mon,
        tm_year: tm.tm_year,
        tm_wday: tm.tm_wday,
        tm_yday: tm.tm_yday,
        tm_isdst: tm.tm_isdst,
        tm_gmtoff: tm.tm_gmtoff as i64,
        tm_zone: zone,
    }
}

wrapper_fn! {
    /// Returns the byte count without the terminator, or 0 when the result
    /// and its NUL do not fit in `max`.
    fn strftime(s: *mut c_char, max: usize, format: *const c_char, tm: *const libc::tm) -> usize {
        if s.is_null() || format.is_null() || tm.is_null() || max == 0 {
            return 0;
        }
        let fmt = CStr::from_ptr(format).to_bytes();
        let Some(out) = time::strftime(fmt, &broken_down(tm), max - 1) else {
            return 0;
        };
        std::ptr::copy_nonoverlapping(out.as_ptr(), s.cast::<u8>(), out.len());
        *s.add(out.len()) = 0;
        out.len()
    }
}

wrapper_fn! {
    /// The locale argument is ignored: only the C locale is rendered.
    fn strftime_l(
        s: *mut c_char,
        max: usize,
        format: *const c_char,
        tm: *const libc::tm,
        _locale: *mut c_void,
    ) -> usize {
        strftime(s, max, format, tm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> libc::tm {
        // Tue Mar  5 14:07:09 2024
        let mut tm: libc::tm = unsafe { std::mem::zeroed() };
        tm.tm_sec = 9;
        tm.tm_min = 7;
        tm.tm_hour = 14;
        tm.tm_mday = 5;
        tm.tm_mon = 2;
        tm.tm_year = 124;
        tm.tm_wday = 2;
        tm.tm_yday = 64;
        tm.tm_zone = c"UTC".as_ptr();
        tm
    }

    fn render(format: &CStr, max: usize) -> (usize, String) {
        let tm = sample();
        let mut buf = vec![0 as c_char; max.max(1)];
        let n = unsafe { strftime(buf.as_mut_ptr(), max, format.as_ptr(), &tm) };
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) }.to_string_lossy().into_owned();
        (n, text)
    }

    #[test]
    fn renders_glibc_composites() {
        assert_eq!(render(c"%c", 64), (24, "Tue Mar  5 14:07:09 2024".to_owned()));
        assert_eq!(render(c"%P|%Z", 64).1, "pm|UTC");
        assert_eq!(render(c"%-d/%^a", 64).1, "5/TUE");
    }

    #[test]
    fn too_small_buffer_returns_zero() {
        assert_eq!(render(c"%Y-%m-%d", 10).0, 0);
        assert_eq!(render(c"%Y-%m-%d", 11).0, 10);
    }

    #[test]
    fn huge_field_width_returns_zero() {
        assert_eq!(render(c"%1099511627776d", 64).0, 0);
        assert_eq!(render(c"%_4000000000Y", 64).0, 0);
        assert_eq!(render(c"%62d", 64).0, 62);
    }
}
