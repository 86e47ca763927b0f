//! Socket type words.

pub const SOCK_TYPE_MASK: i32 = 0xf;
pub const SOCK_NONBLOCK: i32 = 0o4000;
pub const SOCK_CLOEXEC: i32 = 0o2000000;

/// A glibc `type` argument split into base type and creation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketType {
    pub base: i32,
    pub nonblock: bool,
    pub cloexec: bool,
}

impl SocketType {
    pub fn decode(ty: i32) -> Self {
        Self {
            base: ty & SOCK_TYPE_MASK,
            nonblock: ty & SOCK_NONBLOCK != 0,
            cloexec: ty & SOCK_CLOEXEC != 0,
        }
    }

    /// Re-encode with the host's flag values.
    pub fn encode(self, host_nonblock: i32, host_cloexec: i32) -> i32 {
        let mut ty = self.base;
        if self.nonblock {
            ty |= host_nonblock;
        }
        if self.cloexec {
            ty |= host_cloexec;
        }
        ty
    }
}

/// `accept4` flags carry the same two bits without a base type.
pub fn accept_flags(flags: i32, host_nonblock: i32, host_cloexec: i32) -> i32 {
    SocketType::decode(flags).encode(host_nonblock, host_cloexec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_base_and_flags() {
        let t = SocketType::decode(1 | SOCK_CLOEXEC | SOCK_NONBLOCK);
        assert_eq!(
            t,
            SocketType {
                base: 1,
                nonblock: true,
                cloexec: true
            }
        );
        assert_eq!(t.encode(0x800, 0x80000), 1 | 0x800 | 0x80000);
        assert_eq!(SocketType::decode(2).encode(0x800, 0x80000), 2);
    }

    #[test]
    fn accept4_flags() {
        assert_eq!(accept_flags(SOCK_CLOEXEC, 0x4000, 0x40), 0x40);
        assert_eq!(accept_flags(0, 0x4000, 0x40), 0);
    }
}
