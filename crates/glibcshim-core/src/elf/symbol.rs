//! Dynamic symbol table entries and string-table access.

use super::{ElfError, ElfResult, read_u16, read_u32, read_u64};

/// Symbol binding (scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
    /// STB_GNU_UNIQUE, treated like global
    Unique,
    Unknown(u8),
}

impl From<u8> for SymbolBinding {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Local,
            1 => Self::Global,
            2 => Self::Weak,
            10 => Self::Unique,
            other => Self::Unknown(other),
        }
    }
}

/// Symbol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolType {
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    /// STT_GNU_IFUNC: value is a resolver, not the function
    IFunc,
    Unknown(u8),
}

impl From<u8> for SymbolType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::NoType,
            1 => Self::Object,
            2 => Self::Func,
            3 => Self::Section,
            4 => Self::File,
            5 => Self::Common,
            6 => Self::Tls,
            10 => Self::IFunc,
            other => Self::Unknown(other),
        }
    }
}

const SHN_UNDEF: u16 = 0;
const STV_HIDDEN: u8 = 2;
const STV_INTERNAL: u8 = 1;

/// ELF64 symbol table entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Elf64Symbol {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Elf64Symbol {
    /// Size of an ELF64 symbol entry in bytes.
    pub const SIZE: usize = 24;

    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        if data.len() < Self::SIZE {
            return Err(ElfError::BufferTooSmall {
                needed: Self::SIZE,
                available: data.len(),
            });
        }
        Ok(Self {
            st_name: read_u32(data, 0)?,
            st_info: data[4],
            st_other: data[5],
            st_shndx: read_u16(data, 6)?,
            st_value: read_u64(data, 8)?,
            st_size: read_u64(data, 16)?,
        })
    }

    pub fn binding(&self) -> SymbolBinding {
        SymbolBinding::from(self.st_info >> 4)
    }

    pub fn symbol_type(&self) -> SymbolType {
        SymbolType::from(self.st_info & 0xf)
    }

    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }

    pub fn is_defined(&self) -> bool {
        !self.is_undefined()
    }

    pub fn is_weak(&self) -> bool {
        matches!(self.binding(), SymbolBinding::Weak)
    }

    pub fn is_local(&self) -> bool {
        matches!(self.binding(), SymbolBinding::Local)
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.symbol_type(), SymbolType::Tls)
    }

    pub fn is_ifunc(&self) -> bool {
        matches!(self.symbol_type(), SymbolType::IFunc)
    }

    /// Defined, non-local and not hidden: visible to other modules.
    pub fn is_exported(&self) -> bool {
        let vis = self.st_other & 0x3;
        self.is_defined() && !self.is_local() && vis != STV_HIDDEN && vis != STV_INTERNAL
    }
}

/// Read a NUL-terminated UTF-8 name from a string table.
pub fn get_string(strtab: &[u8], index: u32) -> ElfResult<&str> {
    let start = index as usize;
    let tail = strtab
        .get(start..)
        .ok_or(ElfError::InvalidStringIndex(index))?;
    let len = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(ElfError::InvalidStringIndex(index))?;
    core::str::from_utf8(&tail[..len]).map_err(|_| ElfError::InvalidStringIndex(index))
}

/// Parse `count` consecutive symbols.
pub fn parse_symbols(table: &[u8], count: usize) -> ElfResult<Vec<Elf64Symbol>> {
    let needed = count.saturating_mul(Elf64Symbol::SIZE);
    if table.len() < needed {
        return Err(ElfError::BufferTooSmall {
            needed,
            available: table.len(),
        });
    }
    table[..needed]
        .chunks_exact(Elf64Symbol::SIZE)
        .map(Elf64Symbol::parse)
        .collect()
}
