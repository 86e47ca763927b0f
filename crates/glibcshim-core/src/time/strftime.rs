//! `strftime` with glibc's C-locale output.
//!
//! Supports the GNU flags `_` (pad with spaces), `-` (no padding), `0` (pad
//! with zeros), `^` (upper case) and `#` (swap case), an optional field
//! width, and the `E`/`O` modifiers, which have no effect in the C locale
//! but are validated the way glibc validates them. An unrecognized
//! conversion is copied to the output verbatim.

use super::{BrokenDownTime, broken_down_to_epoch, is_leap_year};

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pad {
    Default,
    Zero,
    Space,
    None,
}

#[derive(Debug, Clone, Copy)]
struct Spec {
    pad: Pad,
    upper: bool,
    swap_case: bool,
    width: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Case {
    Keep,
    Upper,
    Lower,
}

/// Output that refuses to grow past `limit` bytes. Once a write does not
/// fit, everything after it is dropped too.
#[derive(Debug)]
struct Output {
    buf: Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl Output {
    fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            overflowed: false,
        }
    }

    fn room(&mut self, n: usize) -> bool {
        // `buf.len() <= limit` always holds.
        if self.overflowed || n > self.limit - self.buf.len() {
            self.overflowed = true;
        }
        !self.overflowed
    }

    fn push(&mut self, b: u8) {
        if self.room(1) {
            self.buf.push(b);
        }
    }

    fn bytes(&mut self, s: &[u8], case: Case) {
        if self.room(s.len()) {
            self.buf.extend(s.iter().map(|&b| match case {
                Case::Keep => b,
                Case::Upper => b.to_ascii_uppercase(),
                Case::Lower => b.to_ascii_lowercase(),
            }));
        }
    }

    fn fill(&mut self, b: u8, n: usize) {
        if self.room(n) {
            self.buf.resize(self.buf.len() + n, b);
        }
    }
}

/// Format `tm` according to `format`. The result carries no terminator.
/// Returns `None` when it would be longer than `limit` bytes; field widths
/// never allocate past the limit.
pub fn strftime(format: &[u8], tm: &BrokenDownTime, limit: usize) -> Option<Vec<u8>> {
    let mut out = Output::new(limit);
    format_into(&mut out, format, tm);
    (!out.overflowed).then_some(out.buf)
}

fn format_into(out: &mut Output, format: &[u8], tm: &BrokenDownTime) {
    let mut i = 0;
    while i < format.len() && !out.overflowed {
        if format[i] != b'%' {
            out.push(format[i]);
            i += 1;
            continue;
        }
        let start = i;
        i += 1;

        let mut spec = Spec {
            pad: Pad::Default,
            upper: false,
            swap_case: false,
            width: None,
        };
        while let Some(&c) = format.get(i) {
            match c {
                b'_' => spec.pad = Pad::Space,
                b'-' => spec.pad = Pad::None,
                b'0' => spec.pad = Pad::Zero,
                b'^' => spec.upper = true,
                b'#' => spec.swap_case = true,
                _ => break,
            }
            i += 1;
        }
        let digits_start = i;
        while format.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i > digits_start {
            spec.width = std::str::from_utf8(&format[digits_start..i])
                .ok()
                .and_then(|s| s.parse().ok());
        }
        let modifier = match format.get(i) {
            Some(&m @ (b'E' | b'O')) => {
                i += 1;
                Some(m)
            }
            _ => None,
        };

        let Some(&conv) = format.get(i) else {
            // A trailing '%' sequence is copied as is.
            emit_str(out, &format[start..], spec, Case::Keep);
            return;
        };
        i += 1;

        if !modifier_allowed(modifier, conv) || !convert(out, conv, spec, tm) {
            emit_str(out, &format[start..i], spec, Case::Keep);
        }
    }
}

fn modifier_allowed(modifier: Option<u8>, conv: u8) -> bool {
    match modifier {
        None => true,
        Some(b'E') => matches!(conv, b'c' | b'C' | b'x' | b'X' | b'y' | b'Y'),
        Some(_) => matches!(
            conv,
            b'd' | b'e' | b'H' | b'I' | b'm' | b'M' | b'S' | b'u' | b'U' | b'V' | b'w' | b'W' | b'y'
        ),
    }
}

/// Emits one conversion. Returns `false` for an unknown conversion.
fn convert(out: &mut Output, conv: u8, spec: Spec, tm: &BrokenDownTime) -> bool {
    let name_case = if spec.upper || spec.swap_case {
        Case::Upper
    } else {
        Case::Keep
    };
    let hour12 = match tm.tm_hour % 12 {
        0 => 12,
        h => h,
    };

    match conv {
        b'%' => emit_str(out, b"%", spec, Case::Keep),
        b'n' => emit_str(out, b"\n", spec, Case::Keep),
        b't' => emit_str(out, b"\t", spec, Case::Keep),

        b'a' => emit_str(out, weekday(tm, 3), spec, name_case),
        b'A' => emit_str(out, weekday(tm, usize::MAX), spec, name_case),
        b'b' | b'h' => emit_str(out, month(tm, 3), spec, name_case),
        b'B' => emit_str(out, month(tm, usize::MAX), spec, name_case),
        b'p' => {
            let case = if spec.swap_case {
                Case::Lower
            } else {
                Case::Keep
            };
            emit_str(out, am_pm(tm), spec, case);
        }
        b'P' => emit_str(out, am_pm(tm), spec, Case::Lower),
        b'Z' => {
            let zone = tm.tm_zone.as_deref().unwrap_or("").as_bytes();
            let case = if spec.swap_case {
                Case::Lower
            } else if spec.upper {
                Case::Upper
            } else {
                Case::Keep
            };
            emit_str(out, zone, spec, case);
        }

        b'c' => subformat(out, b"%a %b %e %H:%M:%S %Y", spec, tm),
        b'D' | b'x' => subformat(out, b"%m/%d/%y", spec, tm),
        b'F' => subformat(out, b"%Y-%m-%d", spec, tm),
        b'r' => subformat(out, b"%I:%M:%S %p", spec, tm),
        b'R' => subformat(out, b"%H:%M", spec, tm),
        b'T' | b'X' => subformat(out, b"%H:%M:%S", spec, tm),

        b'C' => {
            let year = i64::from(tm.tm_year) + 1900;
            let sign = if year < 0 { b'-' } else { 0 };
            emit_signed_digits(out, sign, (year / 100).unsigned_abs(), 2, Pad::Zero, spec);
        }
        b'd' => emit_number(out, tm.tm_mday.into(), 2, Pad::Zero, spec),
        b'e' => emit_number(out, tm.tm_mday.into(), 2, Pad::Space, spec),
        b'H' => emit_number(out, tm.tm_hour.into(), 2, Pad::Zero, spec),
        b'I' => emit_number(out, hour12.into(), 2, Pad::Zero, spec),
        b'k' => emit_number(out, tm.tm_hour.into(), 2, Pad::Space, spec),
        b'l' => emit_number(out, hour12.into(), 2, Pad::Space, spec),
        b'j' => emit_number(out, i64::from(tm.tm_yday) + 1, 3, Pad::Zero, spec),
        b'm' => emit_number(out, i64::from(tm.tm_mon) + 1, 2, Pad::Zero, spec),
        b'M' => emit_number(out, tm.tm_min.into(), 2, Pad::Zero, spec),
        b'S' => emit_number(out, tm.tm_sec.into(), 2, Pad::Zero, spec),
        b's' => emit_number(out, broken_down_to_epoch(tm), 1, Pad::Zero, spec),
        b'u' => emit_number(out, ((tm.tm_wday + 6) % 7 + 1).into(), 1, Pad::Zero, spec),
        b'w' => emit_number(out, tm.tm_wday.into(), 1, Pad::Zero, spec),
        b'U' => {
            let week = (tm.tm_yday - tm.tm_wday + 7) / 7;
            emit_number(out, week.into(), 2, Pad::Zero, spec);
        }
        b'W' => {
            let week = (tm.tm_yday - (tm.tm_wday + 6) % 7 + 7) / 7;
            emit_number(out, week.into(), 2, Pad::Zero, spec);
        }
        b'y' => emit_number(out, two_digit_year(i64::from(tm.tm_year) + 1900), 2, Pad::Zero, spec),
        b'Y' => emit_number(out, i64::from(tm.tm_year) + 1900, 1, Pad::Zero, spec),
        b'G' | b'g' | b'V' => {
            let (year, days) = iso_week(tm);
            match conv {
                b'G' => emit_number(out, year, 1, Pad::Zero, spec),
                b'g' => emit_number(out, two_digit_year(year), 2, Pad::Zero, spec),
                _ => emit_number(out, days / 7 + 1, 2, Pad::Zero, spec),
            }
        }
        b'z' => {
            let off = tm.tm_gmtoff;
            let minutes = off.abs() / 60;
            let value = minutes / 60 * 100 + minutes % 60;
            let sign = if off < 0 { b'-' } else { b'+' };
            emit_signed_digits(out, sign, value.unsigned_abs(), 5, Pad::Zero, spec);
        }
        _ => return false,
    }
    true
}

fn weekday(tm: &BrokenDownTime, len: usize) -> &'static [u8] {
    name(usize::try_from(tm.tm_wday).ok().and_then(|i| WEEKDAYS.get(i)), len)
}

fn month(tm: &BrokenDownTime, len: usize) -> &'static [u8] {
    name(usize::try_from(tm.tm_mon).ok().and_then(|i| MONTHS.get(i)), len)
}

// The sign of a negative year is dropped, as glibc does.
fn two_digit_year(year: i64) -> i64 {
    (year % 100).abs()
}

fn name(full: Option<&&'static str>, len: usize) -> &'static [u8] {
    match full {
        Some(n) => &n.as_bytes()[..len.min(n.len())],
        None => b"?",
    }
}

fn am_pm(tm: &BrokenDownTime) -> &'static [u8] {
    if tm.tm_hour > 11 { b"PM" } else { b"AM" }
}

fn subformat(out: &mut Output, fmt: &[u8], spec: Spec, tm: &BrokenDownTime) {
    let mut inner = Output::new(out.limit);
    format_into(&mut inner, fmt, tm);
    if inner.overflowed {
        out.overflowed = true;
        return;
    }
    let case = if spec.upper { Case::Upper } else { Case::Keep };
    emit_str(out, &inner.buf, spec, case);
}

fn emit_str(out: &mut Output, s: &[u8], spec: Spec, case: Case) {
    if spec.pad != Pad::None
        && let Some(width) = spec.width
    {
        let fill = if spec.pad == Pad::Zero { b'0' } else { b' ' };
        out.fill(fill, width.saturating_sub(s.len()));
    }
    out.bytes(s, case);
}

fn emit_number(out: &mut Output, value: i64, digits: usize, default_pad: Pad, spec: Spec) {
    let sign = if value < 0 { b'-' } else { 0 };
    emit_signed_digits(out, sign, value.unsigned_abs(), digits, default_pad, spec);
}

/// `sign` of 0 means none. Space padding precedes the sign; zero padding
/// follows it.
fn emit_signed_digits(
    out: &mut Output,
    sign: u8,
    magnitude: u64,
    digits: usize,
    default_pad: Pad,
    spec: Spec,
) {
    let text = magnitude.to_string();
    let pad = match spec.pad {
        Pad::Default => default_pad,
        p => p,
    };
    let width = spec.width.unwrap_or(digits);
    let used = text.len() + usize::from(sign != 0);
    let fill = if pad == Pad::None {
        0
    } else {
        width.saturating_sub(used)
    };
    if pad == Pad::Space {
        out.fill(b' ', fill);
    }
    if sign != 0 {
        out.push(sign);
    }
    if pad == Pad::Zero {
        out.fill(b'0', fill);
    }
    out.bytes(text.as_bytes(), Case::Keep);
}

// ISO 8601 weeks start on Monday; week 1 contains January 4th.
fn iso_week_days(yday: i64, wday: i64) -> i64 {
    const BIG_ENOUGH_MULTIPLE_OF_7: i64 = (366 / 7 + 2) * 7;
    yday - (yday - wday + 4 + BIG_ENOUGH_MULTIPLE_OF_7) % 7 + 3
}

/// ISO year and days since the start of its first week.
fn iso_week(tm: &BrokenDownTime) -> (i64, i64) {
    let mut year = i64::from(tm.tm_year) + 1900;
    let yday = i64::from(tm.tm_yday);
    let wday = i64::from(tm.tm_wday);
    let year_len = |y: i64| if is_leap_year(y) { 366 } else { 365 };

    let mut days = iso_week_days(yday, wday);
    if days < 0 {
        year -= 1;
        days = iso_week_days(yday + year_len(year), wday);
    } else {
        let next = iso_week_days(yday - year_len(year), wday);
        if next >= 0 {
            year += 1;
            days = next;
        }
    }
    (year, days)
}
