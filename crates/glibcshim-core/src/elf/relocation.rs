//! RELA entries and architecture-neutral relocation kinds.
//!
//! x86_64 and aarch64 number their relocations differently; both decode into
//! [`RelocKind`], which is what the planner switches on.
//!
//! | kind | x86_64 | aarch64 | value |
//! |---|---|---|---|
//! | `Abs64` | 1 | 257 | S + A |
//! | `Pc32` | 2 | 261 | S + A - P |
//! | `Copy` | 5 | 1024 | copy `st_size` bytes from S |
//! | `GlobDat` | 6 | 1025 | S (+ A on aarch64) |
//! | `JumpSlot` | 7 | 1026 | S (+ A on aarch64) |
//! | `Relative` | 8 | 1027 | B + A |
//! | `DtpMod64` | 16 | 1028 | module TLS id |
//! | `DtpOff64` | 17 | 1029 | symbol TLS offset + A |
//! | `TpOff64` | 18 | 1030 | rejected |
//! | `TlsDesc` | 36 | 1031 | descriptor thunk |
//! | `IRelative` | 37 | 1032 | resolver(B + A) |

use super::{Arch, ElfError, ElfResult, read_u64};

/// Relocation kind after architecture decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocKind {
    None,
    Abs64,
    Abs32,
    Abs32Signed,
    Pc32,
    Pc64,
    Copy,
    GlobDat,
    JumpSlot,
    Relative,
    DtpMod64,
    DtpOff64,
    TpOff64,
    TlsDesc,
    IRelative,
    Unknown(u32),
}

impl RelocKind {
    pub fn decode(arch: Arch, raw: u32) -> Self {
        match arch {
            Arch::X86_64 => match raw {
                0 => Self::None,
                1 => Self::Abs64,
                2 => Self::Pc32,
                5 => Self::Copy,
                6 => Self::GlobDat,
                7 => Self::JumpSlot,
                8 => Self::Relative,
                10 => Self::Abs32,
                11 => Self::Abs32Signed,
                16 => Self::DtpMod64,
                17 => Self::DtpOff64,
                18 => Self::TpOff64,
                24 => Self::Pc64,
                36 => Self::TlsDesc,
                37 => Self::IRelative,
                other => Self::Unknown(other),
            },
            Arch::Aarch64 => match raw {
                0 | 256 => Self::None,
                257 => Self::Abs64,
                258 => Self::Abs32,
                260 => Self::Pc64,
                261 => Self::Pc32,
                1024 => Self::Copy,
                1025 => Self::GlobDat,
                1026 => Self::JumpSlot,
                1027 => Self::Relative,
                1028 => Self::DtpMod64,
                1029 => Self::DtpOff64,
                1030 => Self::TpOff64,
                1031 => Self::TlsDesc,
                1032 => Self::IRelative,
                other => Self::Unknown(other),
            },
        }
    }

    /// Inverse of [`RelocKind::decode`], used by the synthetic image builder.
    pub fn encode(self, arch: Arch) -> Option<u32> {
        let raw = match (arch, self) {
            (_, Self::None) => 0,
            (_, Self::Unknown(v)) => v,
            (Arch::X86_64, k) => match k {
                Self::Abs64 => 1,
                Self::Pc32 => 2,
                Self::Copy => 5,
                Self::GlobDat => 6,
                Self::JumpSlot => 7,
                Self::Relative => 8,
                Self::Abs32 => 10,
                Self::Abs32Signed => 11,
                Self::DtpMod64 => 16,
                Self::DtpOff64 => 17,
                Self::TpOff64 => 18,
                Self::Pc64 => 24,
                Self::TlsDesc => 36,
                Self::IRelative => 37,
                _ => return None,
            },
            (Arch::Aarch64, k) => match k {
                Self::Abs64 => 257,
                Self::Abs32 => 258,
                Self::Pc64 => 260,
                Self::Pc32 => 261,
                Self::Copy => 1024,
                Self::GlobDat => 1025,
                Self::JumpSlot => 1026,
                Self::Relative => 1027,
                Self::DtpMod64 => 1028,
                Self::DtpOff64 => 1029,
                Self::TpOff64 => 1030,
                Self::TlsDesc => 1031,
                Self::IRelative => 1032,
                _ => return None,
            },
        };
        Some(raw)
    }

    pub fn is_tls(self) -> bool {
        matches!(
            self,
            Self::DtpMod64 | Self::DtpOff64 | Self::TpOff64 | Self::TlsDesc
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Abs64 => "ABS64",
            Self::Abs32 => "ABS32",
            Self::Abs32Signed => "ABS32S",
            Self::Pc32 => "PC32",
            Self::Pc64 => "PC64",
            Self::Copy => "COPY",
            Self::GlobDat => "GLOB_DAT",
            Self::JumpSlot => "JUMP_SLOT",
            Self::Relative => "RELATIVE",
            Self::DtpMod64 => "DTPMOD64",
            Self::DtpOff64 => "DTPOFF64",
            Self::TpOff64 => "TPOFF64",
            Self::TlsDesc => "TLSDESC",
            Self::IRelative => "IRELATIVE",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

/// ELF64 RELA relocation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf64Rela {
    /// Link-time address of the patched location
    pub r_offset: u64,
    /// Relocation type (low 32 bits) and symbol index (high 32 bits)
    pub r_info: u64,
    pub r_addend: i64,
}

impl Elf64Rela {
    /// Size of an ELF64 RELA entry in bytes.
    pub const SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            r_offset: read_u64(data, 0)?,
            r_info: read_u64(data, 8)?,
            r_addend: read_u64(data, 16)? as i64,
        })
    }

    pub fn new(r_offset: u64, raw_type: u32, symbol: u32, r_addend: i64) -> Self {
        Self {
            r_offset,
            r_info: (u64::from(symbol) << 32) | u64::from(raw_type),
            r_addend,
        }
    }

    pub fn raw_type(&self) -> u32 {
        (self.r_info & 0xffff_ffff) as u32
    }

    pub fn kind(&self, arch: Arch) -> RelocKind {
        RelocKind::decode(arch, self.raw_type())
    }

    pub fn symbol_index(&self) -> u32 {
        (self.r_info >> 32) as u32
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..8].copy_from_slice(&self.r_offset.to_le_bytes());
        out[8..16].copy_from_slice(&self.r_info.to_le_bytes());
        out[16..24].copy_from_slice(&self.r_addend.to_le_bytes());
        out
    }
}

/// Parse a RELA table.
pub fn parse_relocations(table: &[u8]) -> ElfResult<Vec<Elf64Rela>> {
    if table.len() % Elf64Rela::SIZE != 0 {
        return Err(ElfError::InvalidDynamic("relocation table size not a multiple of 24"));
    }
    table
        .chunks_exact(Elf64Rela::SIZE)
        .map(Elf64Rela::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_split() {
        let rela = Elf64Rela::new(0x3000, 6, 42, -8);
        let parsed = Elf64Rela::parse(&rela.to_bytes()).unwrap();
        assert_eq!(parsed, rela);
        assert_eq!(parsed.symbol_index(), 42);
        assert_eq!(parsed.kind(Arch::X86_64), RelocKind::GlobDat);
        assert_eq!(parsed.r_addend, -8);
    }

    #[test]
    fn numbering_differs_per_arch() {
        assert_eq!(RelocKind::decode(Arch::X86_64, 8), RelocKind::Relative);
        assert_eq!(RelocKind::decode(Arch::Aarch64, 1027), RelocKind::Relative);
        assert_eq!(RelocKind::decode(Arch::Aarch64, 8), RelocKind::Unknown(8));
        assert_eq!(RelocKind::decode(Arch::X86_64, 36), RelocKind::TlsDesc);
        assert_eq!(RelocKind::decode(Arch::Aarch64, 1031), RelocKind::TlsDesc);
    }

    #[test]
    fn encode_inverts_decode() {
        for arch in [Arch::X86_64, Arch::Aarch64] {
            for kind in [
                RelocKind::Abs64,
                RelocKind::Pc32,
                RelocKind::Copy,
                RelocKind::GlobDat,
                RelocKind::JumpSlot,
                RelocKind::Relative,
                RelocKind::DtpMod64,
                RelocKind::DtpOff64,
                RelocKind::TlsDesc,
                RelocKind::IRelative,
            ] {
                let raw = kind.encode(arch).unwrap();
                assert_eq!(RelocKind::decode(arch, raw), kind, "{arch:?} {kind:?}");
            }
        }
        assert_eq!(RelocKind::Abs32Signed.encode(Arch::Aarch64), None);
    }

    #[test]
    fn tls_kinds() {
        assert!(RelocKind::TlsDesc.is_tls());
        assert!(RelocKind::TpOff64.is_tls());
        assert!(!RelocKind::Relative.is_tls());
    }

    #[test]
    fn table_size_must_be_whole_entries() {
        let mut table = Elf64Rela::new(0, 8, 0, 0).to_bytes().to_vec();
        assert_eq!(parse_relocations(&table).unwrap().len(), 1);
        table.push(0);
        assert!(parse_relocations(&table).is_err());
    }
}
