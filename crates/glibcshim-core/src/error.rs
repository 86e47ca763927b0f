//! Error taxonomy shared by every layer of the shim.
//!
//! Loader and resolver failures surface as [`ShimError`]. Wrapper handlers
//! never return these across the C boundary; they report `-1`/null and store
//! [`ShimError::errno`] in the foreign errno slot.

use std::fmt;

use thiserror::Error;

use crate::elf::ElfError;
use crate::elf::plan::PlanError;

/// Linux errno values (shared by glibc and the host on every supported
/// architecture).
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EINTR: i32 = 4;
    pub const EIO: i32 = 5;
    pub const E2BIG: i32 = 7;
    pub const ENOEXEC: i32 = 8;
    pub const EBADF: i32 = 9;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EFAULT: i32 = 14;
    pub const EEXIST: i32 = 17;
    pub const EINVAL: i32 = 22;
    pub const ENFILE: i32 = 23;
    pub const EMFILE: i32 = 24;
    pub const EFBIG: i32 = 27;
    pub const ENOSPC: i32 = 28;
    pub const ERANGE: i32 = 34;
    pub const ENOSYS: i32 = 38;
    pub const ENOMSG: i32 = 42;
    pub const EIDRM: i32 = 43;
    pub const EMSGSIZE: i32 = 90;
    pub const EOPNOTSUPP: i32 = 95;
    pub const ETIMEDOUT: i32 = 110;
}

/// Fixed-capacity tables that can fill up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    TlsArena,
    TlsModules,
    LoadedModules,
    MessageQueues,
    SharedMemory,
    SemaphoreSets,
    SysvMessageQueues,
    ExitHandlers,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TlsArena => "dynamic TLS arena",
            Self::TlsModules => "TLS module slots",
            Self::LoadedModules => "module registry",
            Self::MessageQueues => "message queue descriptors",
            Self::SharedMemory => "shared memory segments",
            Self::SemaphoreSets => "semaphore sets",
            Self::SysvMessageQueues => "System V message queues",
            Self::ExitHandlers => "exit handlers",
        }
    }

    /// Tables whose entries are descriptors report `EMFILE` rather than
    /// `ENOSPC` when full.
    pub fn is_descriptor_table(self) -> bool {
        matches!(self, Self::MessageQueues)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShimError {
    /// The symbol is defined nowhere: not in the catalog, no foreign module,
    /// not on the host.
    #[error("symbol `{symbol}` not found")]
    Resolution { symbol: String },

    /// An unsupported or malformed relocation.
    #[error("{module}: relocation {index} ({kind}): {reason}")]
    Relocation {
        module: String,
        index: usize,
        kind: &'static str,
        reason: String,
    },

    /// Bad image header, overlapping segments, mapping or I/O failure.
    #[error("cannot load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("{resource} full (capacity {capacity})")]
    CapacityExceeded { resource: Resource, capacity: usize },

    /// An API the host cannot provide at all.
    #[error("{feature} is not supported")]
    Unsupported { feature: &'static str },
}

impl ShimError {
    pub fn load(path: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn resolution(symbol: impl Into<String>) -> Self {
        Self::Resolution {
            symbol: symbol.into(),
        }
    }

    /// A failed relocation plan. A missing mandatory symbol is still a
    /// relocation failure of the module that needed it.
    pub fn from_plan(module: impl Into<String>, kind: &'static str, err: PlanError) -> Self {
        Self::Relocation {
            module: module.into(),
            index: err.index(),
            kind,
            reason: err.to_string(),
        }
    }

    pub fn capacity(resource: Resource, capacity: usize) -> Self {
        Self::CapacityExceeded { resource, capacity }
    }

    /// errno reported to foreign code.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Resolution { .. } => errno::ENOENT,
            Self::Relocation { .. } | Self::Load { .. } => errno::ENOEXEC,
            Self::CapacityExceeded { resource, .. } if resource.is_descriptor_table() => {
                errno::EMFILE
            }
            Self::CapacityExceeded { .. } => errno::ENOSPC,
            Self::Unsupported { .. } => errno::ENOSYS,
        }
    }
}

impl From<ElfError> for ShimError {
    /// For images parsed from memory; file loads use [`ShimError::load`] to
    /// name the path.
    fn from(err: ElfError) -> Self {
        Self::load("<memory>", err)
    }
}

pub type ShimResult<T> = Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_follows_taxonomy() {
        assert_eq!(ShimError::resolution("foo").errno(), errno::ENOENT);
        assert_eq!(ShimError::load("/x.so", "bad").errno(), errno::ENOEXEC);
        assert_eq!(
            ShimError::capacity(Resource::TlsArena, 65536).errno(),
            errno::ENOSPC
        );
        assert_eq!(
            ShimError::capacity(Resource::MessageQueues, 16).errno(),
            errno::EMFILE
        );
        assert_eq!(
            ShimError::Unsupported { feature: "capget" }.errno(),
            errno::ENOSYS
        );
    }

    #[test]
    fn plan_errors_keep_index() {
        let err = ShimError::from_plan(
            "libfoo.so",
            "GLOB_DAT",
            PlanError::MissingSymbol {
                index: 7,
                symbol: "bar".into(),
            },
        );
        assert!(matches!(err, ShimError::Relocation { index: 7, .. }));
        assert_eq!(
            err.to_string(),
            "libfoo.so: relocation 7 (GLOB_DAT): undefined symbol `bar`"
        );
    }

    #[test]
    fn elf_errors_become_load_failures() {
        let err: ShimError = ElfError::InvalidMagic.into();
        assert_eq!(err.to_string(), "cannot load <memory>: invalid ELF magic");
    }
}
