//! ELF64 parsing and relocation planning for foreign shared objects.
//!
//! Images are parsed read-only from their file bytes. Dynamic metadata is
//! taken from `PT_DYNAMIC` (section headers are optional and ignored), and
//! relocations are turned into a [`RelocationPlan`] of patch operations that
//! the ABI crate applies to the mapped segments.
//!
//! # Supported Machines
//!
//! - `EM_X86_64` (62)
//! - `EM_AARCH64` (183)
//!
//! An image is accepted only when its machine matches the host.
//!
//! # Supported Relocation Kinds
//!
//! - absolute 64-bit, PC-relative 32-bit, GOT and PLT slots, base-relative
//! - `COPY`, `IRELATIVE`
//! - `DTPMOD64`, `DTPOFF64`, `TLSDESC`
//!
//! `TPOFF64` (initial-exec TLS from a dynamically loaded module) is rejected.

pub mod dynamic;
pub mod hash;
pub mod header;
pub mod image;
pub mod plan;
pub mod program;
pub mod relocation;
pub mod symbol;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dynamic::{DynamicInfo, DynamicTag};
pub use hash::{GnuHashTable, SysvHashTable, elf_hash, gnu_hash};
pub use header::{Elf64Header, ElfMachine, ElfType};
pub use image::{ForeignImage, LoadSegment, TlsTemplate};
pub use plan::{
    NullSymbolLookup, PatchOp, PlanContext, PlanError, RelocationPlan, RelocationStats,
    ResolvedSymbol, SymbolLookup, TlsBinding,
};
pub use program::{Elf64ProgramHeader, ProgramFlags, ProgramType};
pub use relocation::{Elf64Rela, RelocKind};
pub use symbol::{Elf64Symbol, SymbolBinding, SymbolType};

/// ELF magic bytes: "\x7fELF"
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Size of ELF identification array
pub const EI_NIDENT: usize = 16;

/// Host page size assumed for segment layout.
pub const PAGE_SIZE: u64 = 4096;

/// Largest `PT_TLS` alignment a dynamically loaded module may ask for; the
/// per-thread arena itself is page aligned.
pub const MAX_TLS_ALIGN: u64 = PAGE_SIZE;

/// Largest `PT_TLS` block accepted, the biggest arena the shim can be
/// configured with.
pub const MAX_TLS_SIZE: u64 = 4 << 20;

/// Instruction-set architectures the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// The architecture this crate was compiled for, if supported.
    #[must_use]
    pub const fn host() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Self::X86_64)
        } else if cfg!(target_arch = "aarch64") {
            Some(Self::Aarch64)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn machine(self) -> ElfMachine {
        match self {
            Self::X86_64 => ElfMachine::X86_64,
            Self::Aarch64 => ElfMachine::Aarch64,
        }
    }

    #[must_use]
    pub fn from_machine(machine: ElfMachine) -> Option<Self> {
        match machine {
            ElfMachine::X86_64 => Some(Self::X86_64),
            ElfMachine::Aarch64 => Some(Self::Aarch64),
            _ => None,
        }
    }
}

/// Error type for ELF parsing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElfError {
    /// Invalid ELF magic bytes
    InvalidMagic,
    /// Unsupported ELF class (not ELF64)
    UnsupportedClass(u8),
    /// Unsupported data encoding (not little-endian)
    UnsupportedEncoding(u8),
    /// Machine type differs from the host
    UnsupportedMachine(u16),
    /// Object type other than ET_DYN / ET_EXEC
    UnsupportedType(u16),
    /// Table offset or size points outside the file
    InvalidOffset { kind: &'static str, offset: u64 },
    /// Buffer too small for requested operation
    BufferTooSmall { needed: usize, available: usize },
    /// Invalid string table index
    InvalidStringIndex(u32),
    /// Invalid symbol index in relocation
    InvalidSymbolIndex(u32),
    /// Virtual address not covered by any PT_LOAD
    UnmappedAddress { kind: &'static str, vaddr: u64 },
    /// Two PT_LOAD segments claim the same pages
    OverlappingSegments { first: u64, second: u64 },
    /// No PT_LOAD segment at all
    NoLoadableSegments,
    /// Image needs writable text (DT_TEXTREL)
    TextRelocations,
    /// Malformed dynamic table
    InvalidDynamic(&'static str),
    /// Unusable `PT_TLS` segment
    InvalidTls(&'static str),
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidMagic => write!(f, "invalid ELF magic"),
            Self::UnsupportedClass(c) => write!(f, "unsupported ELF class: {c}"),
            Self::UnsupportedEncoding(e) => write!(f, "unsupported data encoding: {e}"),
            Self::UnsupportedMachine(m) => write!(f, "unsupported machine type: {m}"),
            Self::UnsupportedType(t) => write!(f, "unsupported object type: {t}"),
            Self::InvalidOffset { kind, offset } => {
                write!(f, "invalid {kind} offset: {offset:#x}")
            }
            Self::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {needed}, have {available}")
            }
            Self::InvalidStringIndex(idx) => write!(f, "invalid string index: {idx}"),
            Self::InvalidSymbolIndex(idx) => write!(f, "invalid symbol index: {idx}"),
            Self::UnmappedAddress { kind, vaddr } => {
                write!(f, "{kind} at {vaddr:#x} is not inside a loadable segment")
            }
            Self::OverlappingSegments { first, second } => {
                write!(f, "segments at {first:#x} and {second:#x} overlap")
            }
            Self::NoLoadableSegments => write!(f, "image has no loadable segments"),
            Self::TextRelocations => write!(f, "text relocations are not supported"),
            Self::InvalidDynamic(what) => write!(f, "malformed dynamic section: {what}"),
            Self::InvalidTls(what) => write!(f, "unusable TLS segment: {what}"),
        }
    }
}

impl std::error::Error for ElfError {}

/// Result type for ELF operations.
pub type ElfResult<T> = Result<T, ElfError>;

pub(crate) fn read_u16(data: &[u8], off: usize) -> ElfResult<u16> {
    read_array::<2>(data, off).map(u16::from_le_bytes)
}

pub(crate) fn read_u32(data: &[u8], off: usize) -> ElfResult<u32> {
    read_array::<4>(data, off).map(u32::from_le_bytes)
}

pub(crate) fn read_u64(data: &[u8], off: usize) -> ElfResult<u64> {
    read_array::<8>(data, off).map(u64::from_le_bytes)
}

fn read_array<const N: usize>(data: &[u8], off: usize) -> ElfResult<[u8; N]> {
    data.get(off..off.saturating_add(N))
        .and_then(|s| s.try_into().ok())
        .ok_or(ElfError::BufferTooSmall {
            needed: off.saturating_add(N),
            available: data.len(),
        })
}

/// Borrow `len` bytes at `offset`, naming the table on failure.
pub(crate) fn slice_at<'a>(
    data: &'a [u8],
    kind: &'static str,
    offset: u64,
    len: u64,
) -> ElfResult<&'a [u8]> {
    let start = usize::try_from(offset).map_err(|_| ElfError::InvalidOffset { kind, offset })?;
    let len = usize::try_from(len).map_err(|_| ElfError::InvalidOffset { kind, offset })?;
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or(ElfError::InvalidOffset { kind, offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elf_magic() {
        assert_eq!(ELF_MAGIC, [0x7f, 0x45, 0x4c, 0x46]);
    }

    #[test]
    fn test_error_display() {
        let err = ElfError::InvalidMagic;
        assert_eq!(format!("{err}"), "invalid ELF magic");

        let err = ElfError::UnmappedAddress {
            kind: "DT_SYMTAB",
            vaddr: 0x4000,
        };
        assert_eq!(
            format!("{err}"),
            "DT_SYMTAB at 0x4000 is not inside a loadable segment"
        );
    }

    #[test]
    fn readers_reject_truncated_input() {
        let data = [1u8, 0, 0];
        assert_eq!(read_u16(&data, 0), Ok(1));
        assert!(matches!(
            read_u32(&data, 0),
            Err(ElfError::BufferTooSmall { needed: 4, available: 3 })
        ));
        assert!(read_u64(&data, usize::MAX - 2).is_err());
    }

    #[test]
    fn slice_at_bounds() {
        let data = [0u8; 16];
        assert_eq!(slice_at(&data, "t", 8, 8).unwrap().len(), 8);
        assert!(slice_at(&data, "t", 9, 8).is_err());
        assert!(slice_at(&data, "t", u64::MAX, 1).is_err());
    }

    #[test]
    fn host_arch_round_trips_through_machine() {
        if let Some(arch) = Arch::host() {
            assert_eq!(Arch::from_machine(arch.machine()), Some(arch));
        }
    }
}
