//! glibc C-locale classification and case tables.
//!
//! glibc's `isalpha()` and friends are macros that index
//! `(*__ctype_b_loc())[c]` and test a bit, so foreign code needs tables in
//! glibc's exact encoding. Each table has 384 entries covering `-128..=255`;
//! the pointer handed out addresses entry 128 so that `EOF` (-1) and signed
//! `char` values index valid memory.

/// Entries before index 0 of the published pointer.
pub const TABLE_BIAS: usize = 128;
pub const TABLE_LEN: usize = 384;

// glibc's _ISbit(bit) on a little-endian host.
const fn is_bit(bit: u16) -> u16 {
    if bit < 8 {
        (1 << bit) << 8
    } else {
        (1 << bit) >> 8
    }
}

pub const IS_UPPER: u16 = is_bit(0);
pub const IS_LOWER: u16 = is_bit(1);
pub const IS_ALPHA: u16 = is_bit(2);
pub const IS_DIGIT: u16 = is_bit(3);
pub const IS_XDIGIT: u16 = is_bit(4);
pub const IS_SPACE: u16 = is_bit(5);
pub const IS_PRINT: u16 = is_bit(6);
pub const IS_GRAPH: u16 = is_bit(7);
pub const IS_BLANK: u16 = is_bit(8);
pub const IS_CNTRL: u16 = is_bit(9);
pub const IS_PUNCT: u16 = is_bit(10);
pub const IS_ALNUM: u16 = is_bit(11);

const fn classify(c: u8) -> u16 {
    let mut bits = 0;
    let upper = c.is_ascii_uppercase();
    let lower = c.is_ascii_lowercase();
    let digit = c.is_ascii_digit();
    if upper {
        bits |= IS_UPPER;
    }
    if lower {
        bits |= IS_LOWER;
    }
    if upper || lower {
        bits |= IS_ALPHA;
    }
    if digit {
        bits |= IS_DIGIT;
    }
    if c.is_ascii_hexdigit() {
        bits |= IS_XDIGIT;
    }
    if matches!(c, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r') {
        bits |= IS_SPACE;
    }
    if c >= 0x20 && c <= 0x7e {
        bits |= IS_PRINT;
    }
    if c > 0x20 && c <= 0x7e {
        bits |= IS_GRAPH;
    }
    if c == b' ' || c == b'\t' {
        bits |= IS_BLANK;
    }
    if c < 0x20 || c == 0x7f {
        bits |= IS_CNTRL;
    }
    if c.is_ascii_punctuation() {
        bits |= IS_PUNCT;
    }
    if upper || lower || digit {
        bits |= IS_ALNUM;
    }
    bits
}

const fn build_class_table() -> [u16; TABLE_LEN] {
    let mut table = [0u16; TABLE_LEN];
    let mut c = 0;
    while c < 128 {
        table[TABLE_BIAS + c] = classify(c as u8);
        c += 1;
    }
    table
}

// Entries for -128..=-2 map to the unsigned byte value; -1 (EOF) maps to
// itself.
const fn build_case_table(upper: bool) -> [i32; TABLE_LEN] {
    let mut table = [0i32; TABLE_LEN];
    let mut i = 0;
    while i < TABLE_LEN {
        let c = i as i32 - TABLE_BIAS as i32;
        table[i] = if c == -1 {
            -1
        } else if c < 0 {
            c + 256
        } else if upper && c >= b'a' as i32 && c <= b'z' as i32 {
            c - 32
        } else if !upper && c >= b'A' as i32 && c <= b'Z' as i32 {
            c + 32
        } else {
            c
        };
        i += 1;
    }
    table
}

pub static CLASS_TABLE: [u16; TABLE_LEN] = build_class_table();
pub static TOLOWER_TABLE: [i32; TABLE_LEN] = build_case_table(false);
pub static TOUPPER_TABLE: [i32; TABLE_LEN] = build_case_table(true);

/// Class bits for `c` in `-128..=255`, as glibc's macros see them.
pub fn class_of(c: i32) -> u16 {
    index(c).map_or(0, |i| CLASS_TABLE[i])
}

pub fn to_lower(c: i32) -> i32 {
    index(c).map_or(c, |i| TOLOWER_TABLE[i])
}

pub fn to_upper(c: i32) -> i32 {
    index(c).map_or(c, |i| TOUPPER_TABLE[i])
}

fn index(c: i32) -> Option<usize> {
    usize::try_from(c + TABLE_BIAS as i32)
        .ok()
        .filter(|&i| i < TABLE_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_encoding_matches_glibc_headers() {
        assert_eq!(IS_UPPER, 0x0100);
        assert_eq!(IS_ALPHA, 0x0400);
        assert_eq!(IS_GRAPH, 0x8000);
        assert_eq!(IS_BLANK, 0x0001);
        assert_eq!(IS_PUNCT, 0x0004);
        assert_eq!(IS_ALNUM, 0x0008);
    }

    #[test]
    fn classification_of_ascii() {
        assert_eq!(class_of(b'A' as i32) & IS_UPPER, IS_UPPER);
        assert_eq!(class_of(b'a' as i32) & IS_UPPER, 0);
        assert_ne!(class_of(b'7' as i32) & IS_XDIGIT, 0);
        assert_ne!(class_of(b'\t' as i32) & IS_BLANK, 0);
        assert_ne!(class_of(b'!' as i32) & IS_PUNCT, 0);
        assert_eq!(class_of(b' ' as i32) & IS_GRAPH, 0);
        assert_ne!(class_of(0x7f) & IS_CNTRL, 0);
    }

    #[test]
    fn negative_and_high_bytes_are_unclassified() {
        assert_eq!(class_of(-1), 0);
        assert_eq!(class_of(-128), 0);
        assert_eq!(class_of(0xe9), 0);
        assert_eq!(class_of(400), 0);
    }

    #[test]
    fn case_tables() {
        assert_eq!(to_lower(b'Q' as i32), b'q' as i32);
        assert_eq!(to_upper(b'q' as i32), b'Q' as i32);
        assert_eq!(to_upper(b'1' as i32), b'1' as i32);
        assert_eq!(to_lower(-1), -1);
        assert_eq!(to_lower(-2), 254);
        assert_eq!(to_upper(0xe9), 0xe9);
    }

    #[test]
    fn agrees_with_std_for_every_byte() {
        for c in 0u8..128 {
            let bits = class_of(i32::from(c));
            assert_eq!(bits & IS_ALPHA != 0, c.is_ascii_alphabetic(), "{c}");
            assert_eq!(bits & IS_DIGIT != 0, c.is_ascii_digit(), "{c}");
            assert_eq!(bits & IS_CNTRL != 0, c.is_ascii_control(), "{c}");
            assert_eq!(bits & IS_GRAPH != 0, c.is_ascii_graphic(), "{c}");
        }
    }
}
