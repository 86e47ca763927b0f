//! Relocation planning.
//!
//! Every relocation of an image is turned into a [`PatchOp`] against the
//! mapped span (offsets are relative to `load_bias + min_vaddr`). Planning
//! does all symbol resolution and range checking up front, so a plan either
//! builds completely or the load is abandoned before a single byte of the
//! image is patched.
//!
//! Plain writes are applied by [`RelocationPlan::apply_writes`]. The other
//! operations need the live process (copying from a host object, calling an
//! IFUNC resolver, allocating a TLS descriptor) and are carried out by the
//! ABI crate after the writes, in plan order.

use std::collections::HashMap;

use thiserror::Error;

use super::image::ForeignImage;
use super::relocation::RelocKind;
use super::symbol::Elf64Symbol;

/// Where a TLS symbol lives: module id plus offset within its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsBinding {
    pub module_id: u64,
    pub offset: u64,
}

/// A symbol definition found outside the image being relocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub addr: u64,
    /// Set when the definition is a TLS variable of a foreign module.
    pub tls: Option<TlsBinding>,
}

impl ResolvedSymbol {
    pub fn at(addr: u64) -> Self {
        Self { addr, tls: None }
    }
}

/// Symbol resolution callback used while planning.
pub trait SymbolLookup {
    fn lookup(&self, name: &str) -> Option<ResolvedSymbol>;
}

/// Resolves nothing; every import is missing.
pub struct NullSymbolLookup;

impl SymbolLookup for NullSymbolLookup {
    fn lookup(&self, _name: &str) -> Option<ResolvedSymbol> {
        None
    }
}

impl<F> SymbolLookup for F
where
    F: Fn(&str) -> Option<ResolvedSymbol>,
{
    fn lookup(&self, name: &str) -> Option<ResolvedSymbol> {
        self(name)
    }
}

/// One patch against the mapped span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOp {
    /// Store `value` little-endian in `size` (4 or 8) bytes.
    Write { offset: u64, value: u64, size: u8 },
    /// Copy `size` bytes from absolute address `src`.
    Copy { offset: u64, src: u64, size: u64 },
    /// Call the IFUNC resolver at `resolver` and store its result plus `addend`.
    IRelative { offset: u64, resolver: u64, addend: i64 },
    /// Install a TLS descriptor (thunk, argument) pair at `offset`.
    TlsDescriptor {
        offset: u64,
        module_id: u64,
        sym_offset: u64,
    },
}

impl PatchOp {
    pub fn offset(&self) -> u64 {
        match *self {
            Self::Write { offset, .. }
            | Self::Copy { offset, .. }
            | Self::IRelative { offset, .. }
            | Self::TlsDescriptor { offset, .. } => offset,
        }
    }
}

/// Statistics about relocation processing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelocationStats {
    /// Total relocations processed
    pub total: usize,
    /// Resolved to a plain write
    pub applied: usize,
    /// `NONE` entries
    pub skipped: usize,
    /// COPY, IRELATIVE and TLSDESC, finished by the ABI crate
    pub deferred: usize,
    /// Weak references with no definition, written as zero
    pub weak_unresolved: usize,
}

/// Why a plan could not be built. `index` is the relocation's position in
/// file order; it is not part of the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("undefined symbol `{symbol}`")]
    MissingSymbol { index: usize, symbol: String },
    #[error("unsupported kind {kind}")]
    Unsupported { index: usize, kind: &'static str },
    #[error("{kind} value does not fit")]
    Overflow { index: usize, kind: &'static str },
    #[error("target {offset:#x} outside the mapped image")]
    OutOfBounds { index: usize, offset: u64 },
    #[error("bad symbol index {symbol_index}")]
    InvalidSymbol { index: usize, symbol_index: u32 },
    #[error("`{symbol}` is not a thread-local definition")]
    NotThreadLocal { index: usize, symbol: String },
}

impl PlanError {
    pub fn index(&self) -> usize {
        match self {
            Self::MissingSymbol { index, .. }
            | Self::Unsupported { index, .. }
            | Self::Overflow { index, .. }
            | Self::OutOfBounds { index, .. }
            | Self::InvalidSymbol { index, .. }
            | Self::NotThreadLocal { index, .. } => *index,
        }
    }
}

/// Load-time facts the planner needs beyond the image itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanContext {
    /// Difference between runtime and link-time addresses.
    pub load_bias: u64,
    /// TLS module id assigned to this image, if it has `PT_TLS`.
    pub tls_module: Option<u64>,
}

/// Ordered patch list for one image.
#[derive(Debug, Clone, Default)]
pub struct RelocationPlan {
    pub ops: Vec<PatchOp>,
    pub stats: RelocationStats,
    /// Weak imports nothing defined.
    pub weak_unresolved: Vec<String>,
}

/// Resolved value of the symbol a relocation refers to.
#[derive(Debug, Clone, Copy)]
enum SymbolValue {
    Absent,
    Address(u64),
    LocalIfunc(u64),
    Tls(TlsBinding),
}

impl RelocationPlan {
    /// Resolve and range-check every relocation of `image`.
    pub fn build(
        image: &ForeignImage,
        ctx: PlanContext,
        lookup: &dyn SymbolLookup,
    ) -> Result<Self, PlanError> {
        let mut plan = Self {
            stats: RelocationStats {
                total: image.relocations.len(),
                ..RelocationStats::default()
            },
            ..Self::default()
        };
        let span_start = image.min_vaddr();
        let span_len = image.map_size();
        let bias = ctx.load_bias;
        let mut cache: HashMap<u32, SymbolValue> = HashMap::new();
        let null_sym = Elf64Symbol::default();

        for (index, rela) in image.relocations.iter().enumerate() {
            let kind = rela.kind(image.arch);
            if kind == RelocKind::None {
                plan.stats.skipped += 1;
                continue;
            }

            let width: u64 = match kind {
                RelocKind::Abs32 | RelocKind::Abs32Signed | RelocKind::Pc32 => 4,
                RelocKind::TlsDesc => 16,
                _ => 8,
            };
            let offset = rela
                .r_offset
                .checked_sub(span_start)
                .filter(|off| off.checked_add(width).is_some_and(|end| end <= span_len))
                .ok_or(PlanError::OutOfBounds {
                    index,
                    offset: rela.r_offset,
                })?;

            let sym_index = rela.symbol_index();
            let sym = match sym_index {
                0 => &null_sym,
                i => image
                    .dynsym
                    .get(i as usize)
                    .ok_or(PlanError::InvalidSymbol {
                        index,
                        symbol_index: i,
                    })?,
            };
            let value = match cache.get(&sym_index) {
                Some(v) => *v,
                None => {
                    let v = resolve_symbol(image, ctx, lookup, sym_index, sym, index)?;
                    if matches!(v, SymbolValue::Absent) && sym_index != 0 {
                        let name = image.symbol_name(sym_index).unwrap_or_default().to_owned();
                        plan.weak_unresolved.push(name);
                        plan.stats.weak_unresolved += 1;
                    }
                    cache.insert(sym_index, v);
                    v
                }
            };

            let a = rela.r_addend;
            let place = bias.wrapping_add(rela.r_offset);
            let s = match value {
                SymbolValue::Address(addr) | SymbolValue::LocalIfunc(addr) => addr,
                SymbolValue::Absent | SymbolValue::Tls(_) => 0,
            };

            let op = match kind {
                RelocKind::None => continue,
                RelocKind::Relative => write8(offset, bias.wrapping_add_signed(a)),
                RelocKind::IRelative => PatchOp::IRelative {
                    offset,
                    resolver: bias.wrapping_add_signed(a),
                    addend: 0,
                },
                RelocKind::Abs64 | RelocKind::GlobDat | RelocKind::JumpSlot => match value {
                    SymbolValue::LocalIfunc(resolver) => PatchOp::IRelative {
                        offset,
                        resolver,
                        addend: a,
                    },
                    _ => write8(offset, s.wrapping_add_signed(a)),
                },
                RelocKind::Pc64 => write8(offset, s.wrapping_add_signed(a).wrapping_sub(place)),
                RelocKind::Pc32 => {
                    let v = s.wrapping_add_signed(a).wrapping_sub(place) as i64;
                    let v = i32::try_from(v).map_err(|_| PlanError::Overflow {
                        index,
                        kind: kind.name(),
                    })?;
                    write4(offset, v as u32)
                }
                RelocKind::Abs32 => {
                    let v = s.wrapping_add_signed(a);
                    let v = u32::try_from(v).map_err(|_| PlanError::Overflow {
                        index,
                        kind: kind.name(),
                    })?;
                    write4(offset, v)
                }
                RelocKind::Abs32Signed => {
                    let v = s.wrapping_add_signed(a) as i64;
                    let v = i32::try_from(v).map_err(|_| PlanError::Overflow {
                        index,
                        kind: kind.name(),
                    })?;
                    write4(offset, v as u32)
                }
                RelocKind::Copy => {
                    if matches!(value, SymbolValue::Absent) {
                        // A weak COPY source has nothing to copy.
                        plan.stats.skipped += 1;
                        continue;
                    }
                    PatchOp::Copy {
                        offset,
                        src: s,
                        size: sym.st_size,
                    }
                }
                RelocKind::DtpMod64 => {
                    let module = tls_binding(image, ctx, value, sym_index, index)?.module_id;
                    write8(offset, module)
                }
                RelocKind::DtpOff64 => {
                    let binding = tls_binding(image, ctx, value, sym_index, index)?;
                    write8(offset, binding.offset.wrapping_add_signed(a))
                }
                RelocKind::TlsDesc => {
                    let binding = tls_binding(image, ctx, value, sym_index, index)?;
                    PatchOp::TlsDescriptor {
                        offset,
                        module_id: binding.module_id,
                        sym_offset: binding.offset.wrapping_add_signed(a),
                    }
                }
                RelocKind::TpOff64 | RelocKind::Unknown(_) => {
                    return Err(PlanError::Unsupported {
                        index,
                        kind: kind.name(),
                    });
                }
            };

            match op {
                PatchOp::Write { .. } => plan.stats.applied += 1,
                _ => plan.stats.deferred += 1,
            }
            plan.ops.push(op);
        }
        Ok(plan)
    }

    /// Apply the plain writes to `span`, the mapped image starting at
    /// `load_bias + min_vaddr`. Returns the number of writes.
    pub fn apply_writes(&self, span: &mut [u8]) -> Result<usize, PlanError> {
        let mut written = 0;
        for (index, op) in self.ops.iter().enumerate() {
            let PatchOp::Write {
                offset,
                value,
                size,
            } = *op
            else {
                continue;
            };
            let start = offset as usize;
            let bytes = value.to_le_bytes();
            let target = start
                .checked_add(usize::from(size))
                .and_then(|end| span.get_mut(start..end))
                .ok_or(PlanError::OutOfBounds { index, offset })?;
            target.copy_from_slice(&bytes[..usize::from(size)]);
            written += 1;
        }
        Ok(written)
    }

    /// Operations the ABI crate must finish against the live process.
    pub fn deferred(&self) -> impl Iterator<Item = &PatchOp> {
        self.ops
            .iter()
            .filter(|op| !matches!(op, PatchOp::Write { .. }))
    }
}

fn write8(offset: u64, value: u64) -> PatchOp {
    PatchOp::Write {
        offset,
        value,
        size: 8,
    }
}

fn write4(offset: u64, value: u32) -> PatchOp {
    PatchOp::Write {
        offset,
        value: u64::from(value),
        size: 4,
    }
}

fn resolve_symbol(
    image: &ForeignImage,
    ctx: PlanContext,
    lookup: &dyn SymbolLookup,
    sym_index: u32,
    sym: &Elf64Symbol,
    index: usize,
) -> Result<SymbolValue, PlanError> {
    if sym_index == 0 {
        return Ok(SymbolValue::Absent);
    }
    if sym.is_defined() {
        if sym.is_tls() {
            return Ok(match ctx.tls_module {
                Some(module_id) => SymbolValue::Tls(TlsBinding {
                    module_id,
                    offset: sym.st_value,
                }),
                None => SymbolValue::Absent,
            });
        }
        let addr = ctx.load_bias.wrapping_add(sym.st_value);
        return Ok(if sym.is_ifunc() {
            SymbolValue::LocalIfunc(addr)
        } else {
            SymbolValue::Address(addr)
        });
    }

    let name = image
        .symbol_name(sym_index)
        .ok_or(PlanError::InvalidSymbol {
            index,
            symbol_index: sym_index,
        })?;
    match lookup.lookup(name) {
        Some(ResolvedSymbol { tls: Some(b), .. }) => Ok(SymbolValue::Tls(b)),
        Some(found) => Ok(SymbolValue::Address(found.addr)),
        None if sym.is_weak() => Ok(SymbolValue::Absent),
        None => Err(PlanError::MissingSymbol {
            index,
            symbol: name.to_owned(),
        }),
    }
}

/// TLS relocations with symbol index 0 refer to the image's own block.
fn tls_binding(
    image: &ForeignImage,
    ctx: PlanContext,
    value: SymbolValue,
    sym_index: u32,
    index: usize,
) -> Result<TlsBinding, PlanError> {
    let symbol = || image.symbol_name(sym_index).unwrap_or_default().to_owned();
    match value {
        SymbolValue::Tls(binding) => Ok(binding),
        SymbolValue::Absent if sym_index == 0 => ctx
            .tls_module
            .map(|module_id| TlsBinding {
                module_id,
                offset: 0,
            })
            .ok_or_else(|| PlanError::NotThreadLocal {
                index,
                symbol: symbol(),
            }),
        _ => Err(PlanError::NotThreadLocal {
            index,
            symbol: symbol(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::Arch;
    use crate::elf::testing::ImageBuilder;

    const BIAS: u64 = 0x7f00_0000_0000;

    fn host_lookup(name: &str) -> Option<ResolvedSymbol> {
        match name {
            "memcpy" => Some(ResolvedSymbol::at(0x1111_0000)),
            "strftime" => Some(ResolvedSymbol::at(0x2222_0000)),
            _ => None,
        }
    }

    fn ctx(tls_module: Option<u64>) -> PlanContext {
        PlanContext {
            load_bias: BIAS,
            tls_module,
        }
    }

    #[test]
    fn plans_got_and_relative_writes() {
        let bytes = ImageBuilder::new(Arch::X86_64)
            .import("memcpy")
            .import("strftime")
            .got_reloc("memcpy", RelocKind::GlobDat)
            .got_reloc("strftime", RelocKind::JumpSlot)
            .relative_reloc(0x40)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::X86_64).unwrap();
        let plan = RelocationPlan::build(&image, ctx(None), &host_lookup).unwrap();

        assert_eq!(plan.stats.total, 3);
        assert_eq!(plan.stats.applied, 3);
        let values: Vec<u64> = plan
            .ops
            .iter()
            .map(|op| match op {
                PatchOp::Write { value, .. } => *value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert!(values.contains(&0x1111_0000));
        assert!(values.contains(&0x2222_0000));
        assert!(values.contains(&(BIAS + 0x40)));

        let mut span = vec![0u8; image.map_size() as usize];
        assert_eq!(plan.apply_writes(&mut span).unwrap(), 3);
        let first = plan.ops[0].offset() as usize;
        assert_eq!(
            u64::from_le_bytes(span[first..first + 8].try_into().unwrap()),
            values[0]
        );
    }

    #[test]
    fn missing_mandatory_symbol_fails_the_plan() {
        let bytes = ImageBuilder::new(Arch::X86_64)
            .import("no_such_function")
            .got_reloc("no_such_function", RelocKind::GlobDat)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::X86_64).unwrap();
        let err = RelocationPlan::build(&image, ctx(None), &host_lookup).unwrap_err();
        assert_eq!(
            err,
            PlanError::MissingSymbol {
                index: 0,
                symbol: "no_such_function".into()
            }
        );
    }

    #[test]
    fn weak_miss_is_recorded_and_zeroed() {
        let bytes = ImageBuilder::new(Arch::X86_64)
            .import_weak("__gmon_start__")
            .got_reloc("__gmon_start__", RelocKind::GlobDat)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::X86_64).unwrap();
        let plan = RelocationPlan::build(&image, ctx(None), &NullSymbolLookup).unwrap();
        assert_eq!(plan.weak_unresolved, vec!["__gmon_start__".to_string()]);
        assert_eq!(plan.stats.weak_unresolved, 1);
        assert!(matches!(plan.ops[0], PatchOp::Write { value: 0, .. }));
    }

    #[test]
    fn initial_exec_tls_is_rejected() {
        let bytes = ImageBuilder::new(Arch::X86_64)
            .tls(8, 8, &[])
            .raw_reloc(RelocKind::TpOff64, None, 0)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::X86_64).unwrap();
        let err = RelocationPlan::build(&image, ctx(Some(3)), &NullSymbolLookup).unwrap_err();
        assert!(matches!(err, PlanError::Unsupported { kind: "TPOFF64", .. }));
    }

    #[test]
    fn tls_relocations_bind_to_own_module() {
        let bytes = ImageBuilder::new(Arch::X86_64)
            .tls(32, 16, &[7; 8])
            .raw_reloc(RelocKind::DtpMod64, None, 0)
            .raw_reloc(RelocKind::DtpOff64, None, 16)
            .raw_reloc(RelocKind::TlsDesc, None, 8)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::X86_64).unwrap();
        let plan = RelocationPlan::build(&image, ctx(Some(5)), &NullSymbolLookup).unwrap();
        assert!(matches!(plan.ops[0], PatchOp::Write { value: 5, .. }));
        assert!(matches!(plan.ops[1], PatchOp::Write { value: 16, .. }));
        assert!(matches!(
            plan.ops[2],
            PatchOp::TlsDescriptor {
                module_id: 5,
                sym_offset: 8,
                ..
            }
        ));
        assert_eq!(plan.deferred().count(), 1);
    }

    #[test]
    fn tls_relocation_without_tls_segment_fails() {
        let bytes = ImageBuilder::new(Arch::X86_64)
            .raw_reloc(RelocKind::DtpMod64, None, 0)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::X86_64).unwrap();
        let err = RelocationPlan::build(&image, ctx(None), &NullSymbolLookup).unwrap_err();
        assert!(matches!(err, PlanError::NotThreadLocal { index: 0, .. }));
    }

    #[test]
    fn aarch64_numbering_plans_the_same() {
        let bytes = ImageBuilder::new(Arch::Aarch64)
            .import("memcpy")
            .got_reloc("memcpy", RelocKind::GlobDat)
            .build();
        let image = ForeignImage::parse(&bytes, Arch::Aarch64).unwrap();
        let plan = RelocationPlan::build(&image, ctx(None), &host_lookup).unwrap();
        assert!(matches!(plan.ops[0], PatchOp::Write { value: 0x1111_0000, size: 8, .. }));
    }
}
