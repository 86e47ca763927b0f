//! Foreign per-thread block.
//!
//! The leading words mirror glibc's `tcbhead_t` so that the stack guard sits
//! at `0x28` and the pointer guard at `0x30`, the offsets glibc-compiled code
//! reads relative to its thread pointer. The fields after them carry the
//! state glibc keeps per thread and exposes through accessor functions.

use std::mem::{offset_of, size_of};

/// Byte offset of the stack-protector canary in glibc's thread block.
pub const STACK_GUARD_OFFSET: usize = 0x28;

/// Byte offset of the pointer-mangling guard in glibc's thread block.
pub const POINTER_GUARD_OFFSET: usize = 0x30;

/// Foreign-visible per-thread state. Pointer-valued fields hold addresses so
/// the block stays plain data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForeignTlsBlock {
    /// `tcb`, `dtv`, `self`, `multiple_threads`/`gscope_flag`, `sysinfo`.
    pub reserved: [u64; 5],
    pub stack_guard: u64,
    pub pointer_guard: u64,
    /// `const unsigned short *` into the class table (index 0 == `'\0'`).
    pub ctype_b: usize,
    /// `const int32_t *` into the lower-case table.
    pub ctype_tolower: usize,
    /// `const int32_t *` into the upper-case table.
    pub ctype_toupper: usize,
    /// glibc `errno`.
    pub errno: i32,
    _pad: i32,
    /// `program_invocation_short_name`.
    pub progname: usize,
    /// `program_invocation_name`.
    pub progname_full: usize,
}

const _: () = assert!(offset_of!(ForeignTlsBlock, stack_guard) == STACK_GUARD_OFFSET);
const _: () = assert!(offset_of!(ForeignTlsBlock, pointer_guard) == POINTER_GUARD_OFFSET);
const _: () = assert!(size_of::<ForeignTlsBlock>() % 8 == 0);

impl ForeignTlsBlock {
    pub const fn new() -> Self {
        Self {
            reserved: [0; 5],
            stack_guard: 0,
            pointer_guard: 0,
            ctype_b: 0,
            ctype_tolower: 0,
            ctype_toupper: 0,
            errno: 0,
            _pad: 0,
            progname: 0,
            progname_full: 0,
        }
    }

    /// glibc's canary always has a zero low byte, which stops string
    /// overflows from reproducing it.
    pub fn canary_from_entropy(raw: u64) -> u64 {
        raw & !0xff
    }

    pub fn ctype_ready(&self) -> bool {
        self.ctype_b != 0 && self.ctype_tolower != 0 && self.ctype_toupper != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offsets_match_glibc() {
        assert_eq!(offset_of!(ForeignTlsBlock, stack_guard), 0x28);
        assert_eq!(offset_of!(ForeignTlsBlock, pointer_guard), 0x30);
        assert_eq!(offset_of!(ForeignTlsBlock, ctype_b), 0x38);
        assert_eq!(offset_of!(ForeignTlsBlock, errno), 0x50);
    }

    #[test]
    fn canary_low_byte_is_zero() {
        assert_eq!(ForeignTlsBlock::canary_from_entropy(u64::MAX) & 0xff, 0);
        assert_eq!(
            ForeignTlsBlock::canary_from_entropy(0x1234_5678_9abc_def0),
            0x1234_5678_9abc_de00
        );
    }

    #[test]
    fn fresh_block_is_zeroed() {
        let block = ForeignTlsBlock::new();
        assert_eq!(block, ForeignTlsBlock::default());
        assert!(!block.ctype_ready());
    }
}
