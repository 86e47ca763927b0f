//! `strverscmp`: compare strings holding version numbers.
//!
//! Digit runs compare numerically; a run with leading zeros is read as a
//! fractional part and sorts before a run without them. The inputs are
//! treated as NUL-terminated at the end of the slice (or at an embedded NUL).

use std::cmp::Ordering;

// State: normal, integral part, fractional part, leading zeros.
const S_N: usize = 0;
const S_I: usize = 3;
const S_F: usize = 6;
const S_Z: usize = 9;

#[derive(Clone, Copy)]
enum Outcome {
    /// Compare the differing bytes.
    Cmp,
    /// Compare the lengths of the digit runs, then the bytes.
    Len,
    Fixed(i32),
}

use Outcome::{Cmp, Fixed, Len};

#[rustfmt::skip]
const NEXT_STATE: [usize; 12] = [
    // x    d    0
    S_N, S_I, S_Z, // S_N
    S_N, S_I, S_I, // S_I
    S_N, S_F, S_F, // S_F
    S_N, S_F, S_Z, // S_Z
];

#[rustfmt::skip]
const RESULT: [Outcome; 36] = [
    // x/x  x/d        x/0        d/x       d/d  d/0  0/x       0/d  0/0
    Cmp, Cmp,       Cmp,       Cmp,      Len, Cmp, Cmp,      Cmp, Cmp, // S_N
    Cmp, Fixed(-1), Fixed(-1), Fixed(1), Len, Len, Fixed(1), Len, Len, // S_I
    Cmp, Cmp,       Cmp,       Cmp,      Cmp, Cmp, Cmp,      Cmp, Cmp, // S_F
    Cmp, Fixed(1),  Fixed(1),  Fixed(-1), Cmp, Cmp, Fixed(-1), Cmp, Cmp, // S_Z
];

fn class(c: u8) -> usize {
    usize::from(c == b'0') + usize::from(c.is_ascii_digit())
}

fn at(s: &[u8], i: usize) -> u8 {
    s.get(i).copied().unwrap_or(0)
}

/// glibc's `strverscmp`. The sign of the result orders `s1` against `s2`.
pub fn strverscmp(s1: &[u8], s2: &[u8]) -> i32 {
    let mut i = 0;
    let mut c1 = at(s1, 0);
    let mut c2 = at(s2, 0);
    let mut state = S_N + class(c1);

    while c1 == c2 {
        if c1 == 0 {
            return 0;
        }
        state = NEXT_STATE[state];
        i += 1;
        c1 = at(s1, i);
        c2 = at(s2, i);
        state += class(c1);
    }
    let diff = i32::from(c1) - i32::from(c2);

    match RESULT[state * 3 + class(c2)] {
        Cmp => diff,
        Fixed(r) => r,
        Len => {
            let mut j = i + 1;
            loop {
                let d1 = at(s1, j).is_ascii_digit();
                let d2 = at(s2, j).is_ascii_digit();
                match (d1, d2) {
                    (true, true) => j += 1,
                    (true, false) => return 1,
                    (false, true) => return -1,
                    (false, false) => return diff,
                }
            }
        }
    }
}

/// [`strverscmp`] as an [`Ordering`].
pub fn version_order(s1: &[u8], s2: &[u8]) -> Ordering {
    strverscmp(s1, s2).cmp(&0)
}
