//! `open` flags and `fcntl` commands as glibc numbers them.

/// glibc's `O_*` values for the target architecture. Access-mode bits
/// (`O_RDONLY`, `O_WRONLY`, `O_RDWR`) are identical everywhere and not
/// listed.
#[cfg(not(target_arch = "aarch64"))]
pub const GLIBC_OPEN_FLAGS: &[(&str, i32)] = &[
    ("O_CREAT", 0o100),
    ("O_EXCL", 0o200),
    ("O_NOCTTY", 0o400),
    ("O_TRUNC", 0o1000),
    ("O_APPEND", 0o2000),
    ("O_NONBLOCK", 0o4000),
    ("O_DSYNC", 0o10000),
    ("O_ASYNC", 0o20000),
    ("O_DIRECT", 0o40000),
    ("O_LARGEFILE", 0),
    ("O_DIRECTORY", 0o200000),
    ("O_NOFOLLOW", 0o400000),
    ("O_NOATIME", 0o1000000),
    ("O_CLOEXEC", 0o2000000),
    ("O_SYNC", 0o4010000),
    ("O_PATH", 0o10000000),
    ("O_TMPFILE", 0o20200000),
];

#[cfg(target_arch = "aarch64")]
pub const GLIBC_OPEN_FLAGS: &[(&str, i32)] = &[
    ("O_CREAT", 0o100),
    ("O_EXCL", 0o200),
    ("O_NOCTTY", 0o400),
    ("O_TRUNC", 0o1000),
    ("O_APPEND", 0o2000),
    ("O_NONBLOCK", 0o4000),
    ("O_DSYNC", 0o10000),
    ("O_ASYNC", 0o20000),
    ("O_DIRECTORY", 0o40000),
    ("O_NOFOLLOW", 0o100000),
    ("O_DIRECT", 0o200000),
    ("O_LARGEFILE", 0o400000),
    ("O_NOATIME", 0o1000000),
    ("O_CLOEXEC", 0o2000000),
    ("O_SYNC", 0o4010000),
    ("O_PATH", 0o10000000),
    ("O_TMPFILE", 0o20040000),
];

pub const F_DUPFD: i32 = 0;
pub const F_GETFD: i32 = 1;
pub const F_SETFD: i32 = 2;
pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;
pub const F_GETLK: i32 = 5;
pub const F_SETLK: i32 = 6;
pub const F_SETLKW: i32 = 7;
pub const F_GETLK64: i32 = 12;
pub const F_SETLK64: i32 = 13;
pub const F_SETLKW64: i32 = 14;
pub const F_OFD_GETLK: i32 = 36;
pub const F_OFD_SETLK: i32 = 37;
pub const F_OFD_SETLKW: i32 = 38;
pub const F_DUPFD_CLOEXEC: i32 = 1030;

/// A decoded `fcntl` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FcntlCommand {
    DupFd,
    DupFdCloexec,
    GetFd,
    SetFd,
    GetFl,
    /// The argument is an open-flag word and needs remapping.
    SetFl,
    GetLk,
    SetLk,
    SetLkW,
    OfdGetLk,
    OfdSetLk,
    OfdSetLkW,
    /// Not decoded; forwarded with its number unchanged.
    Other(i32),
}

impl FcntlCommand {
    pub fn decode(cmd: i32) -> Self {
        match cmd {
            F_DUPFD => Self::DupFd,
            F_DUPFD_CLOEXEC => Self::DupFdCloexec,
            F_GETFD => Self::GetFd,
            F_SETFD => Self::SetFd,
            F_GETFL => Self::GetFl,
            F_SETFL => Self::SetFl,
            F_GETLK | F_GETLK64 => Self::GetLk,
            F_SETLK | F_SETLK64 => Self::SetLk,
            F_SETLKW | F_SETLKW64 => Self::SetLkW,
            F_OFD_GETLK => Self::OfdGetLk,
            F_OFD_SETLK => Self::OfdSetLk,
            F_OFD_SETLKW => Self::OfdSetLkW,
            other => Self::Other(other),
        }
    }

    /// Commands whose argument is a `struct flock *`.
    pub fn takes_lock(self) -> bool {
        matches!(
            self,
            Self::GetLk | Self::SetLk | Self::SetLkW | Self::OfdGetLk | Self::OfdSetLk | Self::OfdSetLkW
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::FlagTable;

    #[test]
    fn lock_commands_fold_64bit_variants() {
        assert_eq!(FcntlCommand::decode(F_GETLK64), FcntlCommand::GetLk);
        assert_eq!(FcntlCommand::decode(F_SETLK), FcntlCommand::SetLk);
        assert_eq!(FcntlCommand::decode(F_SETLKW64), FcntlCommand::SetLkW);
        assert!(FcntlCommand::decode(F_OFD_SETLKW).takes_lock());
        assert!(!FcntlCommand::decode(F_SETFL).takes_lock());
        assert_eq!(FcntlCommand::decode(1024), FcntlCommand::Other(1024));
    }

    #[test]
    fn sync_is_matched_before_dsync() {
        let host: Vec<(&str, i32)> = GLIBC_OPEN_FLAGS
            .iter()
            .map(|&(n, v)| (n, v.rotate_left(1)))
            .collect();
        let table = FlagTable::by_name(GLIBC_OPEN_FLAGS, &host);
        let sync = GLIBC_OPEN_FLAGS
            .iter()
            .find(|(n, _)| *n == "O_SYNC")
            .map(|&(_, v)| v)
            .unwrap();
        assert_eq!(table.to_host(sync), sync.rotate_left(1));
        assert_eq!(table.to_foreign(table.to_host(sync | 0o100)), sync | 0o100);
    }

    #[test]
    fn flag_values_are_distinct() {
        for (i, (a, va)) in GLIBC_OPEN_FLAGS.iter().enumerate() {
            for (b, vb) in &GLIBC_OPEN_FLAGS[i + 1..] {
                if *va != 0 {
                    assert_ne!(va, vb, "{a} and {b}");
                }
            }
        }
    }
}
