//! Static inspection of a foreign image: what it needs and how each import
//! would be bound, without mapping anything.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use glibcshim_core::elf::{Arch, ForeignImage};
use glibcshim_core::{Origin, ShimError};

use crate::error::{HarnessError, HarnessResult};
use crate::report::origin_label;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentReport {
    pub vaddr: String,
    pub memsz: u64,
    pub filesz: u64,
    /// `rwx` with dashes for missing permissions.
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub name: String,
    pub weak: bool,
    /// Origin label, or `unresolved`.
    pub binding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsReport {
    pub size: u64,
    pub align: u64,
    pub init_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReport {
    pub path: String,
    pub arch: String,
    pub pie: bool,
    pub soname: Option<String>,
    pub needed: Vec<String>,
    pub runpath: Vec<String>,
    pub segments: Vec<SegmentReport>,
    pub tls: Option<TlsReport>,
    pub exports: usize,
    pub imports: Vec<ImportReport>,
    /// Relocation count per kind name.
    pub relocations: BTreeMap<String, usize>,
    /// Mandatory imports nothing defines; loading would fail.
    pub unresolved: usize,
    pub blake3: String,
}

fn flag_string(image_flags: glibcshim_core::elf::program::ProgramFlags) -> String {
    [
        (image_flags.is_readable(), 'r'),
        (image_flags.is_writable(), 'w'),
        (image_flags.is_executable(), 'x'),
    ]
    .iter()
    .map(|&(on, c)| if on { c } else { '-' })
    .collect()
}

impl ImageReport {
    /// Describe `image`, binding each import through `resolve`.
    pub fn new<F>(path: &Path, image: &ForeignImage, resolve: F) -> Self
    where
        F: Fn(&str) -> Result<Origin, ShimError>,
    {
        let mut imports: Vec<ImportReport> = image
            .dynsym
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, s)| s.is_undefined())
            .filter_map(|(i, s)| {
                let name = image.symbol_name(i as u32).filter(|n| !n.is_empty())?;
                Some(ImportReport {
                    name: name.to_string(),
                    weak: s.is_weak(),
                    binding: resolve(name).map_or_else(|_| "unresolved".to_string(), origin_label),
                })
            })
            .collect();
        imports.sort_by(|a, b| a.name.cmp(&b.name));
        imports.dedup_by(|a, b| a.name == b.name);
        let unresolved = imports
            .iter()
            .filter(|i| !i.weak && i.binding == "unresolved")
            .count();

        let mut relocations = BTreeMap::new();
        for r in &image.relocations {
            *relocations
                .entry(r.kind(image.arch).name().to_string())
                .or_insert(0) += 1;
        }

        Self {
            path: path.display().to_string(),
            arch: match image.arch {
                Arch::X86_64 => "x86_64".to_string(),
                Arch::Aarch64 => "aarch64".to_string(),
            },
            pie: image.is_pie,
            soname: image.soname.clone(),
            needed: image.needed.clone(),
            runpath: image.runpath.clone(),
            segments: image
                .segments
                .iter()
                .map(|s| SegmentReport {
                    vaddr: format!("{:#x}", s.vaddr),
                    memsz: s.memsz,
                    filesz: s.filesz,
                    flags: flag_string(s.flags),
                })
                .collect(),
            tls: image.tls.as_ref().map(|t| TlsReport {
                size: t.size,
                align: t.align,
                init_bytes: t.init_image.len(),
            }),
            exports: image.exports().len(),
            imports,
            relocations,
            unresolved,
            blake3: image.digest_hex(),
        }
    }
}

/// Read and parse `path` for the host architecture.
pub fn read_image(path: &Path) -> HarnessResult<ForeignImage> {
    let arch = Arch::host().ok_or(HarnessError::UnsupportedHost)?;
    let data = std::fs::read(path).map_err(|source| HarnessError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    ForeignImage::parse(&data, arch).map_err(|source| HarnessError::Image {
        path: path.to_path_buf(),
        source,
    })
}
