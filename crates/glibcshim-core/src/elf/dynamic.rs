//! `PT_DYNAMIC` table decoding.
//!
//! Address-valued tags hold link-time virtual addresses; [`super::image`]
//! translates them to file offsets through the loadable segments.

use super::{ElfError, ElfResult, read_u64};

/// Dynamic table tags the loader acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicTag {
    Null,
    Needed,
    PltRelSz,
    PltGot,
    Hash,
    StrTab,
    SymTab,
    Rela,
    RelaSz,
    RelaEnt,
    StrSz,
    SymEnt,
    Init,
    Fini,
    SoName,
    RPath,
    Rel,
    PltRel,
    TextRel,
    JmpRel,
    BindNow,
    InitArray,
    FiniArray,
    InitArraySz,
    FiniArraySz,
    RunPath,
    Flags,
    GnuHash,
    Flags1,
    Other(u64),
}

impl From<u64> for DynamicTag {
    fn from(value: u64) -> Self {
        match value {
            0 => Self::Null,
            1 => Self::Needed,
            2 => Self::PltRelSz,
            3 => Self::PltGot,
            4 => Self::Hash,
            5 => Self::StrTab,
            6 => Self::SymTab,
            7 => Self::Rela,
            8 => Self::RelaSz,
            9 => Self::RelaEnt,
            10 => Self::StrSz,
            11 => Self::SymEnt,
            12 => Self::Init,
            13 => Self::Fini,
            14 => Self::SoName,
            15 => Self::RPath,
            17 => Self::Rel,
            20 => Self::PltRel,
            22 => Self::TextRel,
            23 => Self::JmpRel,
            24 => Self::BindNow,
            25 => Self::InitArray,
            26 => Self::FiniArray,
            27 => Self::InitArraySz,
            28 => Self::FiniArraySz,
            29 => Self::RunPath,
            30 => Self::Flags,
            0x6fff_fef5 => Self::GnuHash,
            0x6fff_fffb => Self::Flags1,
            other => Self::Other(other),
        }
    }
}

const DT_RELA_TAG: u64 = 7;
const DF_TEXTREL: u64 = 0x4;
const DF_1_PIE: u64 = 0x0800_0000;
const ELF64_DYN_SIZE: usize = 16;

/// Decoded dynamic table. String-valued entries are string-table offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicInfo {
    pub needed: Vec<u32>,
    pub soname: Option<u32>,
    pub runpath: Option<u32>,
    pub strtab: Option<u64>,
    pub strsz: u64,
    pub symtab: Option<u64>,
    pub syment: u64,
    pub hash: Option<u64>,
    pub gnu_hash: Option<u64>,
    pub rela: Option<u64>,
    pub relasz: u64,
    pub relaent: u64,
    pub jmprel: Option<u64>,
    pub pltrelsz: u64,
    pub pltgot: Option<u64>,
    pub init: Option<u64>,
    pub fini: Option<u64>,
    pub init_array: Option<u64>,
    pub init_arraysz: u64,
    pub fini_array: Option<u64>,
    pub fini_arraysz: u64,
    pub flags: u64,
    pub flags_1: u64,
    pub textrel: bool,
}

impl DynamicInfo {
    /// Decode `(tag, value)` pairs up to `DT_NULL` or the end of `data`.
    pub fn parse(data: &[u8]) -> ElfResult<Self> {
        let mut info = Self {
            syment: 24,
            relaent: 24,
            ..Self::default()
        };
        let mut rpath = None;

        for entry in data.chunks_exact(ELF64_DYN_SIZE) {
            let tag = DynamicTag::from(read_u64(entry, 0)?);
            let val = read_u64(entry, 8)?;
            match tag {
                DynamicTag::Null => break,
                DynamicTag::Needed => info.needed.push(string_offset(val)?),
                DynamicTag::SoName => info.soname = Some(string_offset(val)?),
                DynamicTag::RunPath => info.runpath = Some(string_offset(val)?),
                DynamicTag::RPath => rpath = Some(string_offset(val)?),
                DynamicTag::StrTab => info.strtab = Some(val),
                DynamicTag::StrSz => info.strsz = val,
                DynamicTag::SymTab => info.symtab = Some(val),
                DynamicTag::SymEnt => info.syment = val,
                DynamicTag::Hash => info.hash = Some(val),
                DynamicTag::GnuHash => info.gnu_hash = Some(val),
                DynamicTag::Rela => info.rela = Some(val),
                DynamicTag::RelaSz => info.relasz = val,
                DynamicTag::RelaEnt => info.relaent = val,
                DynamicTag::JmpRel => info.jmprel = Some(val),
                DynamicTag::PltRelSz => info.pltrelsz = val,
                DynamicTag::PltRel if val != DT_RELA_TAG => {
                    return Err(ElfError::InvalidDynamic("PLT relocations are not RELA"));
                }
                DynamicTag::PltGot => info.pltgot = Some(val),
                DynamicTag::Init => info.init = Some(val),
                DynamicTag::Fini => info.fini = Some(val),
                DynamicTag::InitArray => info.init_array = Some(val),
                DynamicTag::InitArraySz => info.init_arraysz = val,
                DynamicTag::FiniArray => info.fini_array = Some(val),
                DynamicTag::FiniArraySz => info.fini_arraysz = val,
                DynamicTag::Flags => info.flags = val,
                DynamicTag::Flags1 => info.flags_1 = val,
                DynamicTag::TextRel => info.textrel = true,
                DynamicTag::Rel => {
                    return Err(ElfError::InvalidDynamic("REL relocations are not supported"));
                }
                _ => {}
            }
        }

        // DT_RUNPATH supersedes DT_RPATH when both are present.
        if info.runpath.is_none() {
            info.runpath = rpath;
        }
        if info.flags & DF_TEXTREL != 0 {
            info.textrel = true;
        }
        if info.syment != 0 && info.syment != 24 {
            return Err(ElfError::InvalidDynamic("unexpected DT_SYMENT"));
        }
        if info.relaent != 0 && info.relaent != 24 {
            return Err(ElfError::InvalidDynamic("unexpected DT_RELAENT"));
        }
        Ok(info)
    }

    pub fn is_pie(&self) -> bool {
        self.flags_1 & DF_1_PIE != 0
    }
}

fn string_offset(val: u64) -> ElfResult<u32> {
    u32::try_from(val).map_err(|_| ElfError::InvalidDynamic("string offset out of range"))
}
