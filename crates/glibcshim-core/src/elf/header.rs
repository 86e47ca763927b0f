//! ELF64 file header.

use super::{Arch, EI_NIDENT, ELF_MAGIC, ElfError, ElfResult, read_u16, read_u32, read_u64};

const EI_CLASS: usize = 4;
const EI_DATA: usize = 5;
const EI_OSABI: usize = 7;
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;

/// ELF object file type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfType {
    None,
    Rel,
    Exec,
    Dyn,
    Core,
    Unknown(u16),
}

impl From<u16> for ElfType {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Rel,
            2 => Self::Exec,
            3 => Self::Dyn,
            4 => Self::Core,
            other => Self::Unknown(other),
        }
    }
}

impl ElfType {
    fn raw(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Rel => 1,
            Self::Exec => 2,
            Self::Dyn => 3,
            Self::Core => 4,
            Self::Unknown(v) => v,
        }
    }
}

/// ELF machine architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfMachine {
    None,
    I386,
    Arm,
    X86_64,
    Aarch64,
    RiscV,
    Unknown(u16),
}

impl From<u16> for ElfMachine {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::None,
            3 => Self::I386,
            40 => Self::Arm,
            62 => Self::X86_64,
            183 => Self::Aarch64,
            243 => Self::RiscV,
            other => Self::Unknown(other),
        }
    }
}

impl ElfMachine {
    /// Convert to the raw u16 value.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::None => 0,
            Self::I386 => 3,
            Self::Arm => 40,
            Self::X86_64 => 62,
            Self::Aarch64 => 183,
            Self::RiscV => 243,
            Self::Unknown(v) => v,
        }
    }
}

/// ELF64 file header (the fields the loader consumes).
#[derive(Debug, Clone, Copy)]
pub struct Elf64Header {
    pub e_ident: [u8; EI_NIDENT],
    pub e_type: ElfType,
    pub e_machine: ElfMachine,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_phentsize: u16,
    pub e_phnum: u16,
}

impl Elf64Header {
    /// Size of an ELF64 header in bytes.
    pub const SIZE: usize = 64;

    /// Parse and check identification: magic, 64-bit class, little-endian.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::InvalidMagic);
        }
        if data[EI_CLASS] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass(data[EI_CLASS]));
        }
        if data[EI_DATA] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding(data[EI_DATA]));
        }

        let mut e_ident = [0u8; EI_NIDENT];
        e_ident.copy_from_slice(&data[..EI_NIDENT]);

        Ok(Self {
            e_ident,
            e_type: ElfType::from(read_u16(data, 16)?),
            e_machine: ElfMachine::from(read_u16(data, 18)?),
            e_entry: read_u64(data, 24)?,
            e_phoff: read_u64(data, 32)?,
            e_shoff: read_u64(data, 40)?,
            e_flags: read_u32(data, 48)?,
            e_phentsize: read_u16(data, 54)?,
            e_phnum: read_u16(data, 56)?,
        })
    }

    /// Reject images the host cannot run: wrong machine or not loadable.
    pub fn validate_for(&self, arch: Arch) -> ElfResult<()> {
        if self.e_machine != arch.machine() {
            return Err(ElfError::UnsupportedMachine(self.e_machine.to_u16()));
        }
        match self.e_type {
            ElfType::Dyn | ElfType::Exec => Ok(()),
            other => Err(ElfError::UnsupportedType(other.raw())),
        }
    }

    pub fn osabi(&self) -> u8 {
        self.e_ident[EI_OSABI]
    }

    pub fn is_shared_object(&self) -> bool {
        matches!(self.e_type, ElfType::Dyn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_header(machine: u16, e_type: u16) -> Vec<u8> {
        let mut h = vec![0u8; Elf64Header::SIZE];
        h[..4].copy_from_slice(&ELF_MAGIC);
        h[EI_CLASS] = ELFCLASS64;
        h[EI_DATA] = ELFDATA2LSB;
        h[6] = 1;
        h[16..18].copy_from_slice(&e_type.to_le_bytes());
        h[18..20].copy_from_slice(&machine.to_le_bytes());
        h[24..32].copy_from_slice(&0x1040u64.to_le_bytes());
        h[32..40].copy_from_slice(&64u64.to_le_bytes());
        h[54..56].copy_from_slice(&56u16.to_le_bytes());
        h[56..58].copy_from_slice(&3u16.to_le_bytes());
        h
    }

    #[test]
    fn parses_fields() {
        let h = Elf64Header::parse(&minimal_header(62, 3)).unwrap();
        assert_eq!(h.e_machine, ElfMachine::X86_64);
        assert!(h.is_shared_object());
        assert_eq!(h.e_entry, 0x1040);
        assert_eq!(h.e_phoff, 64);
        assert_eq!(h.e_phnum, 3);
    }

    #[test]
    fn rejects_bad_identification() {
        let mut h = minimal_header(62, 3);
        h[0] = 0;
        assert_eq!(Elf64Header::parse(&h).unwrap_err(), ElfError::InvalidMagic);

        let mut h = minimal_header(62, 3);
        h[EI_CLASS] = 1;
        assert_eq!(
            Elf64Header::parse(&h).unwrap_err(),
            ElfError::UnsupportedClass(1)
        );

        let mut h = minimal_header(62, 3);
        h[EI_DATA] = 2;
        assert_eq!(
            Elf64Header::parse(&h).unwrap_err(),
            ElfError::UnsupportedEncoding(2)
        );

        assert!(matches!(
            Elf64Header::parse(&h[..10]),
            Err(ElfError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn validate_checks_machine_and_type() {
        let h = Elf64Header::parse(&minimal_header(183, 3)).unwrap();
        assert!(h.validate_for(Arch::Aarch64).is_ok());
        assert_eq!(
            h.validate_for(Arch::X86_64).unwrap_err(),
            ElfError::UnsupportedMachine(183)
        );

        let rel = Elf64Header::parse(&minimal_header(62, 1)).unwrap();
        assert_eq!(
            rel.validate_for(Arch::X86_64).unwrap_err(),
            ElfError::UnsupportedType(1)
        );
    }
}
