//! `sysconf` names in glibc's `_SC_*` numbering.

/// The names the shim forwards. Anything else fails with `EINVAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysconfName {
    ArgMax,
    ChildMax,
    ClkTck,
    NgroupsMax,
    OpenMax,
    PageSize,
    LineMax,
    IovMax,
    GetgrRSizeMax,
    GetpwRSizeMax,
    LoginNameMax,
    TtyNameMax,
    ThreadKeysMax,
    ThreadStackMin,
    NprocessorsConf,
    NprocessorsOnln,
    PhysPages,
    AvphysPages,
    MonotonicClock,
    HostNameMax,
    Level1DcacheLinesize,
}

const GLIBC_NUMBERS: &[(i32, SysconfName)] = &[
    (0, SysconfName::ArgMax),
    (1, SysconfName::ChildMax),
    (2, SysconfName::ClkTck),
    (3, SysconfName::NgroupsMax),
    (4, SysconfName::OpenMax),
    (30, SysconfName::PageSize),
    (43, SysconfName::LineMax),
    (60, SysconfName::IovMax),
    (69, SysconfName::GetgrRSizeMax),
    (70, SysconfName::GetpwRSizeMax),
    (71, SysconfName::LoginNameMax),
    (72, SysconfName::TtyNameMax),
    (74, SysconfName::ThreadKeysMax),
    (75, SysconfName::ThreadStackMin),
    (83, SysconfName::NprocessorsConf),
    (84, SysconfName::NprocessorsOnln),
    (85, SysconfName::PhysPages),
    (86, SysconfName::AvphysPages),
    (149, SysconfName::MonotonicClock),
    (180, SysconfName::HostNameMax),
    (190, SysconfName::Level1DcacheLinesize),
];

impl SysconfName {
    pub fn from_glibc(name: i32) -> Option<Self> {
        GLIBC_NUMBERS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, s)| s)
    }

    pub fn glibc_number(self) -> i32 {
        GLIBC_NUMBERS
            .iter()
            .find(|(_, s)| *s == self)
            .map_or(-1, |&(n, _)| n)
    }

    pub fn all() -> impl Iterator<Item = Self> {
        GLIBC_NUMBERS.iter().map(|&(_, s)| s)
    }
}
