//! Parsed foreign shared object.
//!
//! [`ForeignImage::parse`] extracts everything the loader needs from the
//! file bytes, before anything is mapped: load segments, the TLS template,
//! dynamic symbols and strings, relocations in file order (`DT_RELA` then
//! `DT_JMPREL`), needed modules, initializer/finalizer tables and RELRO.

use std::collections::HashMap;

use super::dynamic::DynamicInfo;
use super::hash::{GnuHashTable, SysvHashTable};
use super::header::Elf64Header;
use super::program::{Elf64ProgramHeader, ProgramFlags, parse_program_headers};
use super::relocation::{Elf64Rela, parse_relocations};
use super::symbol::{Elf64Symbol, get_string, parse_symbols};
use super::{Arch, ElfError, ElfResult, MAX_TLS_ALIGN, MAX_TLS_SIZE, PAGE_SIZE, read_u64, slice_at};

/// One `PT_LOAD` segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u64,
    pub memsz: u64,
    pub filesz: u64,
    pub file_offset: u64,
    pub flags: ProgramFlags,
}

impl LoadSegment {
    pub fn page_start(&self) -> u64 {
        self.vaddr & !(PAGE_SIZE - 1)
    }

    pub fn page_end(&self) -> u64 {
        (self.vaddr + self.memsz).next_multiple_of(PAGE_SIZE)
    }

    /// File offset of `page_start()`; `vaddr` and `file_offset` are
    /// congruent modulo the page size in a well-formed image.
    pub fn file_page_offset(&self) -> u64 {
        self.file_offset - (self.vaddr - self.page_start())
    }
}

/// `PT_TLS` template: the initialization image plus the zero-filled tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsTemplate {
    pub size: u64,
    pub align: u64,
    pub init_image: Vec<u8>,
}

#[derive(Debug, Clone)]
enum ExportIndex {
    Gnu(Vec<u8>),
    Sysv(Vec<u8>),
    None,
}

/// A validated, not-yet-mapped foreign image.
#[derive(Debug, Clone)]
pub struct ForeignImage {
    pub arch: Arch,
    pub header: Elf64Header,
    pub segments: Vec<LoadSegment>,
    pub dynamic: DynamicInfo,
    pub dynsym: Vec<Elf64Symbol>,
    pub dynstr: Vec<u8>,
    pub relocations: Vec<Elf64Rela>,
    /// Count of leading entries in `relocations` that came from `DT_RELA`.
    pub rela_count: usize,
    pub tls: Option<TlsTemplate>,
    pub needed: Vec<String>,
    pub soname: Option<String>,
    pub runpath: Vec<String>,
    pub interp: Option<String>,
    pub relro: Option<(u64, u64)>,
    pub init_array: Vec<u64>,
    pub fini_array: Vec<u64>,
    pub is_pie: bool,
    pub is_static: bool,
    pub digest: [u8; 32],
    export_index: ExportIndex,
}

impl ForeignImage {
    /// Parse and validate an image for `arch`.
    pub fn parse(data: &[u8], arch: Arch) -> ElfResult<Self> {
        let header = Elf64Header::parse(data)?;
        header.validate_for(arch)?;
        let phdrs = parse_program_headers(data, header.e_phoff, header.e_phentsize, header.e_phnum)?;

        let segments = collect_segments(&phdrs)?;
        for seg in &segments {
            slice_at(data, "PT_LOAD", seg.file_offset, seg.filesz)?;
        }
        let loads: Vec<&Elf64ProgramHeader> = phdrs.iter().filter(|p| p.is_load()).collect();

        let interp = phdrs
            .iter()
            .find(|p| matches!(p.p_type, super::ProgramType::Interp))
            .map(|p| slice_at(data, "PT_INTERP", p.p_offset, p.p_filesz))
            .transpose()?
            .map(|raw| String::from_utf8_lossy(raw.split(|&b| b == 0).next().unwrap_or(&[])).into_owned());

        let tls = phdrs
            .iter()
            .find(|p| p.is_tls())
            .map(|p| -> ElfResult<TlsTemplate> {
                let align = p.p_align.max(1);
                if !align.is_power_of_two() {
                    return Err(ElfError::InvalidTls("alignment is not a power of two"));
                }
                if align > MAX_TLS_ALIGN {
                    return Err(ElfError::InvalidTls("alignment exceeds the arena alignment"));
                }
                if p.p_filesz > p.p_memsz {
                    return Err(ElfError::InvalidTls("initialization image larger than the block"));
                }
                if p.p_memsz > MAX_TLS_SIZE {
                    return Err(ElfError::InvalidTls("block larger than any arena"));
                }
                Ok(TlsTemplate {
                    size: p.p_memsz,
                    align,
                    init_image: slice_at(data, "PT_TLS", p.p_offset, p.p_filesz)?.to_vec(),
                })
            })
            .transpose()?;

        let relro = phdrs
            .iter()
            .find(|p| p.is_relro())
            .map(|p| (p.p_vaddr, p.p_memsz));

        let dyn_phdr = phdrs.iter().find(|p| p.is_dynamic());
        let is_static = dyn_phdr.is_none();
        let dynamic = match dyn_phdr {
            Some(p) => DynamicInfo::parse(slice_at(data, "PT_DYNAMIC", p.p_offset, p.p_filesz)?)?,
            None => DynamicInfo::default(),
        };
        if dynamic.textrel {
            return Err(ElfError::TextRelocations);
        }

        let to_off = |kind: &'static str, vaddr: u64, len: u64| vaddr_to_offset(&loads, kind, vaddr, len);

        let dynstr = match dynamic.strtab {
            Some(vaddr) => {
                let off = to_off("DT_STRTAB", vaddr, dynamic.strsz)?;
                slice_at(data, "DT_STRTAB", off, dynamic.strsz)?.to_vec()
            }
            None => Vec::new(),
        };

        let (export_index, hashed_count) = build_export_index(data, &loads, &dynamic)?;

        let dynsym = match dynamic.symtab {
            Some(vaddr) => {
                let count = match hashed_count {
                    Some(n) => n,
                    // No hash table: the linker places .dynstr right after .dynsym.
                    None => match dynamic.strtab {
                        Some(strtab) if strtab > vaddr => ((strtab - vaddr) / 24) as usize,
                        _ => return Err(ElfError::InvalidDynamic("cannot size DT_SYMTAB")),
                    },
                };
                let len = count as u64 * 24;
                let off = to_off("DT_SYMTAB", vaddr, len)?;
                parse_symbols(slice_at(data, "DT_SYMTAB", off, len)?, count)?
            }
            None => Vec::new(),
        };

        let mut relocations = Vec::new();
        if let Some(vaddr) = dynamic.rela {
            let off = to_off("DT_RELA", vaddr, dynamic.relasz)?;
            relocations = parse_relocations(slice_at(data, "DT_RELA", off, dynamic.relasz)?)?;
        }
        let rela_count = relocations.len();
        if let Some(vaddr) = dynamic.jmprel {
            let off = to_off("DT_JMPREL", vaddr, dynamic.pltrelsz)?;
            relocations.extend(parse_relocations(slice_at(
                data,
                "DT_JMPREL",
                off,
                dynamic.pltrelsz,
            )?)?);
        }
        for rela in &relocations {
            let sym = rela.symbol_index();
            if sym as usize >= dynsym.len() && sym != 0 {
                return Err(ElfError::InvalidSymbolIndex(sym));
            }
        }

        let read_array = |kind: &'static str, vaddr: Option<u64>, size: u64| -> ElfResult<Vec<u64>> {
            let Some(vaddr) = vaddr else {
                return Ok(Vec::new());
            };
            if size % 8 != 0 {
                return Err(ElfError::InvalidDynamic("function array size is not a multiple of 8"));
            }
            let off = to_off(kind, vaddr, size)?;
            let raw = slice_at(data, kind, off, size)?;
            (0..raw.len() / 8).map(|i| read_u64(raw, i * 8)).collect()
        };
        let init_array = read_array("DT_INIT_ARRAY", dynamic.init_array, dynamic.init_arraysz)?;
        let fini_array = read_array("DT_FINI_ARRAY", dynamic.fini_array, dynamic.fini_arraysz)?;

        let name = |off: u32| get_string(&dynstr, off).map(str::to_owned);
        let needed = dynamic.needed.iter().map(|&o| name(o)).collect::<ElfResult<Vec<_>>>()?;
        let soname = dynamic.soname.map(name).transpose()?;
        let runpath = match dynamic.runpath {
            Some(off) => name(off)?
                .split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            None => Vec::new(),
        };

        Ok(Self {
            arch,
            is_pie: dynamic.is_pie(),
            header,
            segments,
            dynamic,
            dynsym,
            dynstr,
            relocations,
            rela_count,
            tls,
            needed,
            soname,
            runpath,
            interp,
            relro,
            init_array,
            fini_array,
            is_static,
            digest: *blake3::hash(data).as_bytes(),
            export_index,
        })
    }

    /// Page-aligned lowest link-time address.
    pub fn min_vaddr(&self) -> u64 {
        self.segments.first().map_or(0, LoadSegment::page_start)
    }

    /// Bytes of address space the image needs.
    pub fn map_size(&self) -> u64 {
        let end = self.segments.iter().map(LoadSegment::page_end).max().unwrap_or(0);
        end - self.min_vaddr()
    }

    pub fn symbol_name(&self, index: u32) -> Option<&str> {
        let sym = self.dynsym.get(index as usize)?;
        get_string(&self.dynstr, sym.st_name).ok()
    }

    /// Find an exported symbol by name. Uses the GNU or SysV hash table when
    /// present, otherwise scans `.dynsym`.
    pub fn find_export(&self, name: &str) -> Option<(u32, &Elf64Symbol)> {
        let name_of = |i: u32| self.symbol_name(i);
        let hit = match &self.export_index {
            ExportIndex::Gnu(raw) => GnuHashTable::parse(raw).ok().and_then(|t| t.lookup(name, name_of)),
            ExportIndex::Sysv(raw) => SysvHashTable::parse(raw).ok().and_then(|t| t.lookup(name, name_of)),
            ExportIndex::None => self
                .dynsym
                .iter()
                .enumerate()
                .skip(1)
                .find(|(i, _)| self.symbol_name(*i as u32) == Some(name))
                .map(|(i, _)| i as u32),
        }?;
        let sym = &self.dynsym[hit as usize];
        sym.is_exported().then_some((hit, sym))
    }

    /// All exported symbol names and link-time values.
    pub fn exports(&self) -> HashMap<&str, u64> {
        self.dynsym
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_exported())
            .filter_map(|(i, s)| Some((self.symbol_name(i as u32)?, s.st_value)))
            .collect()
    }

    /// Hex form of the blake3 digest of the file bytes.
    pub fn digest_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn collect_segments(phdrs: &[Elf64ProgramHeader]) -> ElfResult<Vec<LoadSegment>> {
    let mut segments: Vec<LoadSegment> = phdrs
        .iter()
        .filter(|p| p.is_load() && p.p_memsz > 0)
        .map(|p| LoadSegment {
            vaddr: p.p_vaddr,
            memsz: p.p_memsz,
            filesz: p.p_filesz,
            file_offset: p.p_offset,
            flags: p.p_flags,
        })
        .collect();
    if segments.is_empty() {
        return Err(ElfError::NoLoadableSegments);
    }
    segments.sort_by_key(|s| s.vaddr);
    for seg in &segments {
        if seg.filesz > seg.memsz
            || seg.vaddr.checked_add(seg.memsz).is_none()
            || seg.vaddr % PAGE_SIZE != seg.file_offset % PAGE_SIZE
        {
            return Err(ElfError::InvalidOffset {
                kind: "PT_LOAD",
                offset: seg.file_offset,
            });
        }
    }
    for pair in segments.windows(2) {
        if pair[0].vaddr + pair[0].memsz > pair[1].vaddr {
            return Err(ElfError::OverlappingSegments {
                first: pair[0].vaddr,
                second: pair[1].vaddr,
            });
        }
    }
    Ok(segments)
}

fn vaddr_to_offset(
    loads: &[&Elf64ProgramHeader],
    kind: &'static str,
    vaddr: u64,
    len: u64,
) -> ElfResult<u64> {
    loads
        .iter()
        .find(|p| p.contains_file_range(vaddr, len))
        .map(|p| vaddr - p.p_vaddr + p.p_offset)
        .ok_or(ElfError::UnmappedAddress { kind, vaddr })
}

/// Copy the hash table bytes (to the end of their segment) and derive the
/// dynamic symbol count from them.
fn build_export_index(
    data: &[u8],
    loads: &[&Elf64ProgramHeader],
    dynamic: &DynamicInfo,
) -> ElfResult<(ExportIndex, Option<usize>)> {
    let tail = |kind: &'static str, vaddr: u64| -> ElfResult<Vec<u8>> {
        let seg = loads
            .iter()
            .find(|p| p.contains_file_range(vaddr, 16))
            .ok_or(ElfError::UnmappedAddress { kind, vaddr })?;
        let off = vaddr - seg.p_vaddr + seg.p_offset;
        let len = seg.p_offset + seg.p_filesz - off;
        Ok(slice_at(data, kind, off, len)?.to_vec())
    };

    if let Some(vaddr) = dynamic.gnu_hash {
        let raw = tail("DT_GNU_HASH", vaddr)?;
        let count = GnuHashTable::parse(&raw)?.symbol_count();
        // DT_HASH, when present too, sizes .dynsym exactly.
        let count = match dynamic.hash {
            Some(h) => Some(SysvHashTable::parse(&tail("DT_HASH", h)?)?.symbol_count()),
            None => count,
        };
        return Ok((ExportIndex::Gnu(raw), count));
    }
    if let Some(vaddr) = dynamic.hash {
        let raw = tail("DT_HASH", vaddr)?;
        let count = SysvHashTable::parse(&raw)?.symbol_count();
        return Ok((ExportIndex::Sysv(raw), Some(count)));
    }
    Ok((ExportIndex::None, None))
}
