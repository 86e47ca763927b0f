//! `<dlfcn.h>` modes and pseudo-handles as glibc defines them.

pub const RTLD_LAZY: i32 = 0x00001;
pub const RTLD_NOW: i32 = 0x00002;
pub const RTLD_NOLOAD: i32 = 0x00004;
pub const RTLD_DEEPBIND: i32 = 0x00008;
pub const RTLD_GLOBAL: i32 = 0x00100;
pub const RTLD_LOCAL: i32 = 0x00000;
pub const RTLD_NODELETE: i32 = 0x01000;

/// Special pseudo-handles for `dlsym`.
pub const RTLD_DEFAULT: usize = 0;
pub const RTLD_NEXT: usize = usize::MAX;

const BINDING_MASK: i32 = RTLD_LAZY | RTLD_NOW;
const MODIFIER_MASK: i32 = RTLD_GLOBAL | RTLD_NOLOAD | RTLD_NODELETE | RTLD_DEEPBIND;

/// Returns `true` if `flags` is a valid `dlopen` mode: exactly one of
/// `RTLD_LAZY` or `RTLD_NOW` plus known modifiers.
#[inline]
pub fn valid_flags(flags: i32) -> bool {
    let binding = flags & BINDING_MASK;
    let modifiers = flags & !BINDING_MASK;
    (binding == RTLD_LAZY || binding == RTLD_NOW) && (modifiers & !MODIFIER_MASK) == 0
}

#[inline]
pub fn is_pseudo_handle(handle: usize) -> bool {
    handle == RTLD_DEFAULT || handle == RTLD_NEXT
}

/// A decoded `dlopen` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DlopenMode {
    pub now: bool,
    pub global: bool,
    pub noload: bool,
    pub nodelete: bool,
}

/// Host values of the `RTLD_*` bits, supplied by the ABI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostRtld {
    pub lazy: i32,
    pub now: i32,
    pub global: i32,
    pub local: i32,
    pub noload: i32,
    pub nodelete: i32,
}

impl DlopenMode {
    /// `None` for an invalid mode. `RTLD_DEEPBIND` is accepted and dropped.
    pub fn decode(flags: i32) -> Option<Self> {
        valid_flags(flags).then(|| Self {
            now: flags & RTLD_NOW != 0,
            global: flags & RTLD_GLOBAL != 0,
            noload: flags & RTLD_NOLOAD != 0,
            nodelete: flags & RTLD_NODELETE != 0,
        })
    }

    pub fn encode(self, host: HostRtld) -> i32 {
        let mut out = if self.now { host.now } else { host.lazy };
        out |= if self.global { host.global } else { host.local };
        if self.noload {
            out |= host.noload;
        }
        if self.nodelete {
            out |= host.nodelete;
        }
        out
    }
}

/// Sonames of glibc's own runtime libraries. A foreign module needing one of
/// these is satisfied by the catalog and the host C library, never by
/// loading a foreign copy.
const RUNTIME_LIBRARIES: &[&str] = &[
    "libc.so.6",
    "libm.so.6",
    "libpthread.so.0",
    "libdl.so.2",
    "librt.so.1",
    "libutil.so.1",
    "libresolv.so.2",
];

pub fn is_runtime_library(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    RUNTIME_LIBRARIES.contains(&base) || base.starts_with("ld-linux")
}

pub const ERR_INVALID_FLAGS: &str = "invalid mode for dlopen";
pub const ERR_INVALID_HANDLE: &str = "invalid handle";
pub const ERR_SYMBOL_NOT_FOUND: &str = "undefined symbol";
