//! Broken-down time and glibc-compatible formatting.
//!
//! Conversion between epoch seconds and [`BrokenDownTime`] is UTC only; the
//! ABI layer fills `tm_gmtoff` and `tm_zone` from the host's `struct tm`.

pub mod strftime;

pub use strftime::strftime;

/// Broken-down time representation (like glibc's `struct tm`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokenDownTime {
    /// Seconds (0-60, 60 for leap second).
    pub tm_sec: i32,
    /// Minutes (0-59).
    pub tm_min: i32,
    /// Hours (0-23).
    pub tm_hour: i32,
    /// Day of month (1-31).
    pub tm_mday: i32,
    /// Month (0-11).
    pub tm_mon: i32,
    /// Years since 1900.
    pub tm_year: i32,
    /// Day of week (0-6, Sunday = 0).
    pub tm_wday: i32,
    /// Day of year (0-365).
    pub tm_yday: i32,
    /// Daylight saving time flag.
    pub tm_isdst: i32,
    /// Seconds east of UTC.
    pub tm_gmtoff: i64,
    /// Zone abbreviation, if the caller supplied one.
    pub tm_zone: Option<String>,
}

/// Returns `true` if `year` is a leap year (Gregorian).
#[inline]
pub fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Days in each month for a non-leap year.
const DAYS_IN_MONTH: [i32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Convert seconds since Unix epoch to broken-down UTC time.
pub fn epoch_to_broken_down(epoch_secs: i64) -> BrokenDownTime {
    let days = epoch_secs.div_euclid(86400);
    let rem = epoch_secs.rem_euclid(86400);

    let tm_sec = (rem % 60) as i32;
    let tm_min = ((rem / 60) % 60) as i32;
    let tm_hour = (rem / 3600) as i32;

    // Jan 1 1970 was a Thursday.
    let tm_wday = (days + 4).rem_euclid(7) as i32;

    let mut year: i64 = 1970;
    let mut remaining_days = days;
    if remaining_days >= 0 {
        loop {
            let days_in_year: i64 = if is_leap_year(year) { 366 } else { 365 };
            if remaining_days < days_in_year {
                break;
            }
            remaining_days -= days_in_year;
            year += 1;
        }
    } else {
        loop {
            year -= 1;
            let days_in_year: i64 = if is_leap_year(year) { 366 } else { 365 };
            remaining_days += days_in_year;
            if remaining_days >= 0 {
                break;
            }
        }
    }

    let tm_yday = remaining_days as i32;
    let leap = is_leap_year(year);

    let mut mon = 0i32;
    let mut day_rem = remaining_days as i32;
    for m in 0..12 {
        let dim = if m == 1 && leap {
            29
        } else {
            DAYS_IN_MONTH[m as usize]
        };
        if day_rem < dim {
            mon = m;
            break;
        }
        day_rem -= dim;
        mon = m + 1;
    }

    BrokenDownTime {
        tm_sec,
        tm_min,
        tm_hour,
        tm_mday: day_rem + 1,
        tm_mon: mon,
        tm_year: (year - 1900) as i32,
        tm_wday,
        tm_yday,
        tm_isdst: 0,
        tm_gmtoff: 0,
        tm_zone: None,
    }
}

/// Seconds since the epoch for `tm`, honoring `tm_gmtoff`. Out-of-range
/// fields are normalized arithmetically, as `timegm` does.
pub fn broken_down_to_epoch(tm: &BrokenDownTime) -> i64 {
    let mon = i64::from(tm.tm_mon);
    let year = i64::from(tm.tm_year) + 1900 + mon.div_euclid(12);
    let mon = mon.rem_euclid(12);
    let days = days_from_civil(year, mon + 1, 1) + i64::from(tm.tm_mday) - 1;
    days * 86400
        + i64::from(tm.tm_hour) * 3600
        + i64::from(tm.tm_min) * 60
        + i64::from(tm.tm_sec)
        - tm.tm_gmtoff
}

// Days from 1970-01-01 to the given proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_zero() {
        let t = epoch_to_broken_down(0);
        assert_eq!(t.tm_year, 70);
        assert_eq!(t.tm_mon, 0);
        assert_eq!(t.tm_mday, 1);
        assert_eq!(t.tm_hour, 0);
        assert_eq!(t.tm_wday, 4); // Thursday
        assert_eq!(t.tm_yday, 0);
    }

    #[test]
    fn known_timestamp() {
        // 2024-01-01 00:00:00 UTC
        let t = epoch_to_broken_down(1_704_067_200);
        assert_eq!(t.tm_year, 124);
        assert_eq!(t.tm_mon, 0);
        assert_eq!(t.tm_mday, 1);
        assert_eq!(t.tm_wday, 1); // Monday
    }

    #[test]
    fn leap_year_feb29() {
        let t = epoch_to_broken_down(1_709_208_000);
        assert_eq!(t.tm_mon, 1);
        assert_eq!(t.tm_mday, 29);
        assert_eq!(t.tm_hour, 12);
    }

    #[test]
    fn negative_epoch() {
        let t = epoch_to_broken_down(-1);
        assert_eq!(t.tm_year, 69);
        assert_eq!(t.tm_mon, 11);
        assert_eq!(t.tm_mday, 31);
        assert_eq!(t.tm_sec, 59);
        assert_eq!(t.tm_wday, 3);
    }

    #[test]
    fn epoch_round_trip() {
        for secs in [0, -1, 951_782_400, 1_709_208_000, 4_102_444_799, -2_208_988_800] {
            assert_eq!(broken_down_to_epoch(&epoch_to_broken_down(secs)), secs);
        }
    }

    #[test]
    fn gmtoff_shifts_epoch() {
        let mut t = epoch_to_broken_down(3600);
        t.tm_gmtoff = 3600;
        assert_eq!(broken_down_to_epoch(&t), 0);
    }
}
