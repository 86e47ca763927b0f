//! ELF64 program headers (segments).

use super::{ElfError, ElfResult, read_u32, read_u64, slice_at};

/// Program header type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramType {
    Null,
    Load,
    Dynamic,
    Interp,
    Note,
    Phdr,
    /// Thread-local storage template
    Tls,
    GnuEhFrame,
    GnuStack,
    /// Range made read-only after relocation
    GnuRelro,
    GnuProperty,
    Unknown(u32),
}

impl From<u32> for ProgramType {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Load,
            2 => Self::Dynamic,
            3 => Self::Interp,
            4 => Self::Note,
            6 => Self::Phdr,
            7 => Self::Tls,
            0x6474_e550 => Self::GnuEhFrame,
            0x6474_e551 => Self::GnuStack,
            0x6474_e552 => Self::GnuRelro,
            0x6474_e553 => Self::GnuProperty,
            other => Self::Unknown(other),
        }
    }
}

/// Segment permission flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgramFlags(pub u32);

impl ProgramFlags {
    pub const PF_X: u32 = 0x1;
    pub const PF_W: u32 = 0x2;
    pub const PF_R: u32 = 0x4;

    pub fn is_executable(self) -> bool {
        self.0 & Self::PF_X != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::PF_W != 0
    }

    pub fn is_readable(self) -> bool {
        self.0 & Self::PF_R != 0
    }

    /// Linux `PROT_*` bits for `mmap`/`mprotect`.
    pub fn to_mmap_prot(self) -> i32 {
        const PROT_READ: i32 = 0x1;
        const PROT_WRITE: i32 = 0x2;
        const PROT_EXEC: i32 = 0x4;

        let mut prot = 0;
        if self.is_readable() {
            prot |= PROT_READ;
        }
        if self.is_writable() {
            prot |= PROT_WRITE;
        }
        if self.is_executable() {
            prot |= PROT_EXEC;
        }
        prot
    }
}

/// ELF64 program header.
#[derive(Debug, Clone, Copy)]
pub struct Elf64ProgramHeader {
    pub p_type: ProgramType,
    pub p_flags: ProgramFlags,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub p_align: u64,
}

impl Elf64ProgramHeader {
    /// Size of an ELF64 program header in bytes.
    pub const SIZE: usize = 56;

    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            p_type: ProgramType::from(read_u32(data, 0)?),
            p_flags: ProgramFlags(read_u32(data, 4)?),
            p_offset: read_u64(data, 8)?,
            p_vaddr: read_u64(data, 16)?,
            p_filesz: read_u64(data, 32)?,
            p_memsz: read_u64(data, 40)?,
            p_align: read_u64(data, 48)?,
        })
    }

    pub fn is_load(&self) -> bool {
        matches!(self.p_type, ProgramType::Load)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.p_type, ProgramType::Dynamic)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.p_type, ProgramType::Tls)
    }

    pub fn is_relro(&self) -> bool {
        matches!(self.p_type, ProgramType::GnuRelro)
    }

    /// Does `[vaddr, vaddr+len)` fall inside this segment's file-backed part?
    pub fn contains_file_range(&self, vaddr: u64, len: u64) -> bool {
        vaddr >= self.p_vaddr
            && vaddr
                .checked_add(len)
                .is_some_and(|end| end <= self.p_vaddr.saturating_add(self.p_filesz))
    }
}

/// Parse the program header table.
pub fn parse_program_headers(
    data: &[u8],
    phoff: u64,
    phentsize: u16,
    phnum: u16,
) -> ElfResult<Vec<Elf64ProgramHeader>> {
    if phnum == 0 {
        return Ok(Vec::new());
    }
    if usize::from(phentsize) < Elf64ProgramHeader::SIZE {
        return Err(ElfError::InvalidOffset {
            kind: "program header entry size",
            offset: u64::from(phentsize),
        });
    }
    let table = slice_at(
        data,
        "program header table",
        phoff,
        u64::from(phentsize) * u64::from(phnum),
    )?;
    table
        .chunks_exact(usize::from(phentsize))
        .map(Elf64ProgramHeader::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(p_type: u32, flags: u32, vaddr: u64, filesz: u64, memsz: u64) -> [u8; 56] {
        let mut b = [0u8; 56];
        b[0..4].copy_from_slice(&p_type.to_le_bytes());
        b[4..8].copy_from_slice(&flags.to_le_bytes());
        b[8..16].copy_from_slice(&vaddr.to_le_bytes());
        b[16..24].copy_from_slice(&vaddr.to_le_bytes());
        b[32..40].copy_from_slice(&filesz.to_le_bytes());
        b[40..48].copy_from_slice(&memsz.to_le_bytes());
        b[48..56].copy_from_slice(&0x1000u64.to_le_bytes());
        b
    }

    #[test]
    fn parse_load_segment() {
        let ph = Elf64ProgramHeader::parse(&encode(1, 5, 0x1000, 0x200, 0x300)).unwrap();
        assert!(ph.is_load());
        assert_eq!(ph.p_vaddr, 0x1000);
        assert_eq!(ph.p_memsz, 0x300);
        assert_eq!(ph.p_flags.to_mmap_prot(), 0x1 | 0x4);
    }

    #[test]
    fn gnu_types_recognized() {
        assert_eq!(ProgramType::from(0x6474_e552), ProgramType::GnuRelro);
        assert_eq!(ProgramType::from(7), ProgramType::Tls);
        assert_eq!(ProgramType::from(0x7000_0001), ProgramType::Unknown(0x7000_0001));
    }

    #[test]
    fn table_parse_and_bounds() {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&encode(1, 6, 0, 0x10, 0x10));
        data.extend_from_slice(&encode(2, 6, 0x8, 0x8, 0x8));
        let phs = parse_program_headers(&data, 8, 56, 2).unwrap();
        assert_eq!(phs.len(), 2);
        assert!(phs[1].is_dynamic());
        assert!(parse_program_headers(&data, 8, 56, 3).is_err());
        assert!(parse_program_headers(&data, 8, 40, 2).is_err());
    }

    #[test]
    fn file_range_containment() {
        let ph = Elf64ProgramHeader::parse(&encode(1, 6, 0x1000, 0x100, 0x400)).unwrap();
        assert!(ph.contains_file_range(0x1000, 0x100));
        assert!(!ph.contains_file_range(0x1080, 0x100));
        assert!(!ph.contains_file_range(0xfff, 1));
        assert!(!ph.contains_file_range(u64::MAX, 2));
    }
}
