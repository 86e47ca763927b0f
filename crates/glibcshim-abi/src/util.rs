//! Shared internal utilities for wrapper handlers.

use std::ffi::{CStr, c_char, c_int};
use std::time::{Duration, Instant};

use crate::foreign_tls;

/// Borrow a foreign C string as bytes. Null yields `None`.
///
/// # Safety
///
/// A non-null `ptr` must point to a NUL-terminated string that outlives `'a`.
pub unsafe fn c_bytes<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_bytes())
}

/// [`c_bytes`] as UTF-8. Names the shim looks up are always ASCII.
pub unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    unsafe { c_bytes(ptr) }.and_then(|b| std::str::from_utf8(b).ok())
}

/// Store `errno` for the foreign caller and return `ret`.
pub fn fail<T>(errno: c_int, ret: T) -> T {
    foreign_tls::set_errno(errno);
    ret
}

/// Convert an absolute `CLOCK_REALTIME` timeout into a monotonic deadline.
/// A deadline already in the past yields `now`, one too far out to represent
/// yields `None` (wait forever), and a malformed timespec yields `EINVAL`.
///
/// # Safety
///
/// `ts` must point to a readable `timespec`.
pub unsafe fn realtime_deadline(ts: *const libc::timespec) -> Result<Option<Instant>, c_int> {
    let ts = unsafe { ts.read() };
    if ts.tv_sec < 0 || !(0..1_000_000_000).contains(&ts.tv_nsec) {
        return Err(libc::EINVAL);
    }
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(libc::EINVAL);
    }
    let target = i128::from(ts.tv_sec) * 1_000_000_000 + i128::from(ts.tv_nsec);
    let current = i128::from(now.tv_sec) * 1_000_000_000 + i128::from(now.tv_nsec);
    let remaining = u64::try_from((target - current).max(0)).unwrap_or(u64::MAX);
    Ok(Instant::now().checked_add(Duration::from_nanos(remaining)))
}

/// Convert a relative timeout (as `semtimedop` takes) into a deadline,
/// `None` when it lies beyond what [`Instant`] can represent.
///
/// # Safety
///
/// `ts` must point to a readable `timespec`.
pub unsafe fn relative_deadline(ts: *const libc::timespec) -> Result<Option<Instant>, c_int> {
    let ts = unsafe { ts.read() };
    if ts.tv_sec < 0 || !(0..1_000_000_000).contains(&ts.tv_nsec) {
        return Err(libc::EINVAL);
    }
    Ok(Instant::now().checked_add(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_str_stops_at_nul() {
        let s = b"abc\0def";
        assert!(unsafe { c_str(std::ptr::null()) }.is_none());
        assert_eq!(unsafe { c_str(s.as_ptr().cast()) }, Some("abc"));
    }

    #[test]
    fn past_deadline_is_now() {
        let past = libc::timespec {
            tv_sec: 1,
            tv_nsec: 0,
        };
        let before = Instant::now();
        let d = unsafe { realtime_deadline(&past) }.unwrap().unwrap();
        assert!(d >= before && d <= Instant::now());

        let bad = libc::timespec {
            tv_sec: 0,
            tv_nsec: 2_000_000_000,
        };
        assert_eq!(unsafe { realtime_deadline(&bad) }, Err(libc::EINVAL));
        assert_eq!(unsafe { relative_deadline(&bad) }, Err(libc::EINVAL));
    }

    #[test]
    fn unrepresentable_timeouts_wait_forever() {
        let forever = libc::timespec {
            tv_sec: libc::time_t::MAX,
            tv_nsec: 999_999_999,
        };
        assert_eq!(unsafe { relative_deadline(&forever) }, Ok(None));
        assert!(matches!(unsafe { realtime_deadline(&forever) }, Ok(_)));

        let short = libc::timespec {
            tv_sec: 2,
            tv_nsec: 0,
        };
        let d = unsafe { relative_deadline(&short) }.unwrap().unwrap();
        assert!(d > Instant::now() + Duration::from_secs(1));
    }
}
