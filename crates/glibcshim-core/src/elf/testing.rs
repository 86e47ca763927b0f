//! Synthetic shared-object builder for tests.
//!
//! Produces a minimal but well-formed `ET_DYN` image for either supported
//! architecture: three `PT_LOAD` segments (headers and dynamic tables, text,
//! writable data), `PT_DYNAMIC`, an optional `PT_TLS`, SysV and GNU hash
//! tables, and RELA / JMPREL tables. Link-time addresses equal file offsets.
//!
//! ```text
//! page 0   R    ELF header, phdrs, .dynsym, .dynstr, .hash, .gnu.hash, .rela.dyn, .rela.plt
//! page 1.. R X  text
//! next..   RW   .dynamic, GOT slots, data slots, exported data, TLS init image
//! ```

use super::hash::{elf_hash, gnu_hash};
use super::relocation::{Elf64Rela, RelocKind};
use super::{Arch, ELF_MAGIC, PAGE_SIZE};

const PT_LOAD: u32 = 1;
const PT_DYNAMIC: u32 = 2;
const PT_TLS: u32 = 7;
const PF_X: u32 = 1;
const PF_W: u32 = 2;
const PF_R: u32 = 4;

#[derive(Debug, Clone)]
enum SymbolDef {
    Import { weak: bool },
    Data { size: u64 },
    Func { code: Vec<u8> },
    Tls { offset: u64, size: u64 },
}

#[derive(Debug, Clone)]
struct SymbolSpec {
    name: String,
    def: SymbolDef,
}

#[derive(Debug, Clone)]
enum Slot {
    Got,
    Data,
}

#[derive(Debug, Clone)]
struct RelocSpec {
    kind: RelocKind,
    symbol: Option<String>,
    addend: i64,
    slot: Slot,
    /// Patch the slot at this link-time address instead of a fresh one.
    fixed_target: Option<u64>,
}

/// Output of [`ImageBuilder::build_image`].
#[derive(Debug, Clone)]
pub struct SyntheticImage {
    pub bytes: Vec<u8>,
    /// Link-time address of each GOT slot, keyed by symbol name.
    pub got: Vec<(String, u64)>,
    /// Link-time addresses of data slots, in the order they were requested.
    pub slots: Vec<u64>,
    /// Link-time value of every defined symbol.
    pub symbols: Vec<(String, u64)>,
}

impl SyntheticImage {
    pub fn got_slot(&self, name: &str) -> Option<u64> {
        self.got.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }

    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Builder for a minimal foreign shared object.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    arch: Arch,
    soname: Option<String>,
    needed: Vec<String>,
    symbols: Vec<SymbolSpec>,
    relocs: Vec<RelocSpec>,
    tls: Option<(u64, u64, Vec<u8>)>,
    extra_dynamic: Vec<(u64, u64)>,
}

impl ImageBuilder {
    pub fn new(arch: Arch) -> Self {
        Self {
            arch,
            soname: None,
            needed: Vec::new(),
            symbols: Vec::new(),
            relocs: Vec::new(),
            tls: None,
            extra_dynamic: Vec::new(),
        }
    }

    /// Builder for the architecture the tests run on.
    pub fn for_host() -> Self {
        Self::new(Arch::host().unwrap_or(Arch::X86_64))
    }

    pub fn soname(mut self, name: &str) -> Self {
        self.soname = Some(name.to_owned());
        self
    }

    pub fn needed(mut self, name: &str) -> Self {
        self.needed.push(name.to_owned());
        self
    }

    pub fn import(self, name: &str) -> Self {
        self.symbol(name, SymbolDef::Import { weak: false })
    }

    pub fn import_weak(self, name: &str) -> Self {
        self.symbol(name, SymbolDef::Import { weak: true })
    }

    /// Exported zero-initialized object of `size` bytes.
    pub fn export_data(self, name: &str, size: u64) -> Self {
        self.symbol(name, SymbolDef::Data { size })
    }

    /// Exported function whose body is `code`.
    pub fn export_func(self, name: &str, code: &[u8]) -> Self {
        self.symbol(
            name,
            SymbolDef::Func {
                code: code.to_vec(),
            },
        )
    }

    /// Exported thread-local variable at `offset` in this image's TLS block.
    pub fn export_tls(self, name: &str, offset: u64, size: u64) -> Self {
        self.symbol(name, SymbolDef::Tls { offset, size })
    }

    /// GOT slot for `name`. `JumpSlot` entries go to `DT_JMPREL`, everything
    /// else to `DT_RELA`.
    pub fn got_reloc(mut self, name: &str, kind: RelocKind) -> Self {
        self.relocs.push(RelocSpec {
            kind,
            symbol: Some(name.to_owned()),
            addend: 0,
            slot: Slot::Got,
            fixed_target: None,
        });
        self
    }

    /// `RELATIVE` relocation of a fresh data slot with the given addend.
    pub fn relative_reloc(self, addend: i64) -> Self {
        self.raw_reloc(RelocKind::Relative, None, addend)
    }

    /// Any relocation kind against a fresh 16-byte data slot.
    pub fn raw_reloc(mut self, kind: RelocKind, symbol: Option<&str>, addend: i64) -> Self {
        self.relocs.push(RelocSpec {
            kind,
            symbol: symbol.map(str::to_owned),
            addend,
            slot: Slot::Data,
            fixed_target: None,
        });
        self
    }

    /// Relocation at an explicit link-time address (may lie outside the image).
    pub fn reloc_at(mut self, kind: RelocKind, target: u64, addend: i64) -> Self {
        self.relocs.push(RelocSpec {
            kind,
            symbol: None,
            addend,
            slot: Slot::Data,
            fixed_target: Some(target),
        });
        self
    }

    /// `PT_TLS` of `size` bytes whose first bytes are `init`. `size` and
    /// `align` are written to the header as given, so malformed values
    /// produce a malformed image.
    pub fn tls(mut self, size: u64, align: u64, init: &[u8]) -> Self {
        self.tls = Some((size, align.max(1), init.to_vec()));
        self
    }

    /// Raw `.dynamic` entry, placed before the terminating `DT_NULL`.
    pub fn dynamic_entry(mut self, tag: u64, val: u64) -> Self {
        self.extra_dynamic.push((tag, val));
        self
    }

    fn symbol(mut self, name: &str, def: SymbolDef) -> Self {
        self.symbols.push(SymbolSpec {
            name: name.to_owned(),
            def,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.build_image().bytes
    }

    pub fn build_image(self) -> SyntheticImage {
        // Imports first: GNU hash covers only the exported tail.
        let mut ordered: Vec<SymbolSpec> = self
            .symbols
            .iter()
            .filter(|s| matches!(s.def, SymbolDef::Import { .. }))
            .cloned()
            .collect();
        let symoffset = ordered.len() as u32 + 1;
        ordered.extend(
            self.symbols
                .iter()
                .filter(|s| !matches!(s.def, SymbolDef::Import { .. }))
                .cloned(),
        );
        let nsyms = ordered.len() + 1;
        let sym_index = |name: &str| -> u32 {
            ordered
                .iter()
                .position(|s| s.name == name)
                .map(|p| p as u32 + 1)
                .unwrap_or_else(|| panic!("relocation against undeclared symbol `{name}`"))
        };

        let mut dynstr = vec![0u8];
        let mut add_str = |s: &str| -> u32 {
            let off = dynstr.len() as u32;
            dynstr.extend_from_slice(s.as_bytes());
            dynstr.push(0);
            off
        };
        let name_offs: Vec<u32> = ordered.iter().map(|s| add_str(&s.name)).collect();
        let needed_offs: Vec<u32> = self.needed.iter().map(|n| add_str(n)).collect();
        let soname_off = self.soname.as_deref().map(&mut add_str);

        let sysv = sysv_hash_table(&ordered);
        let gnu = gnu_hash_table(&ordered, symoffset);

        let (jmprel_specs, rela_specs): (Vec<&RelocSpec>, Vec<&RelocSpec>) = self
            .relocs
            .iter()
            .partition(|r| r.kind == RelocKind::JumpSlot);

        let has_tls = self.tls.is_some();
        let phnum = 4 + usize::from(has_tls);
        let dynsym_off = align8(64 + phnum as u64 * 56);
        let dynstr_off = dynsym_off + nsyms as u64 * 24;
        let hash_off = align8(dynstr_off + dynstr.len() as u64);
        let gnu_off = align8(hash_off + sysv.len() as u64);
        let rela_off = align8(gnu_off + gnu.len() as u64);
        let rela_len = rela_specs.len() as u64 * 24;
        let jmprel_off = rela_off + rela_len;
        let jmprel_len = jmprel_specs.len() as u64 * 24;
        let page0_len = (jmprel_off + jmprel_len).next_multiple_of(PAGE_SIZE);

        let text_vaddr = page0_len;
        let mut text = Vec::new();
        let mut func_addrs = Vec::new();
        for s in &ordered {
            if let SymbolDef::Func { code } = &s.def {
                func_addrs.push((s.name.clone(), text_vaddr + text.len() as u64));
                text.extend_from_slice(code);
                while text.len() % 16 != 0 {
                    text.push(0);
                }
            }
        }
        if text.is_empty() {
            text.resize(16, 0);
        }
        let rw_vaddr = text_vaddr + (text.len() as u64).next_multiple_of(PAGE_SIZE);

        let ndyn = self.needed.len()
            + usize::from(soname_off.is_some())
            + 6
            + if rela_specs.is_empty() { 0 } else { 3 }
            + if jmprel_specs.is_empty() { 0 } else { 3 }
            + self.extra_dynamic.len()
            + 1;
        let dyn_vaddr = rw_vaddr;
        let mut cursor = dyn_vaddr + ndyn as u64 * 16;

        let mut got = Vec::new();
        let mut slots = Vec::new();
        let mut targets = Vec::new();
        for spec in &self.relocs {
            let target = match (spec.fixed_target, &spec.slot) {
                (Some(t), _) => t,
                (None, Slot::Got) => {
                    let t = cursor;
                    cursor += 8;
                    got.push((spec.symbol.clone().unwrap_or_default(), t));
                    t
                }
                (None, Slot::Data) => {
                    let t = cursor;
                    cursor += 16;
                    slots.push(t);
                    t
                }
            };
            targets.push(target);
        }

        let mut symbols = Vec::new();
        let mut sym_values = vec![0u64; nsyms];
        for (i, s) in ordered.iter().enumerate() {
            let value = match &s.def {
                SymbolDef::Import { .. } => continue,
                SymbolDef::Data { size } => {
                    let v = cursor;
                    cursor = align8(cursor + size);
                    v
                }
                SymbolDef::Func { .. } => func_addrs
                    .iter()
                    .find(|(n, _)| *n == s.name)
                    .map_or(0, |(_, a)| *a),
                SymbolDef::Tls { offset, .. } => *offset,
            };
            sym_values[i + 1] = value;
            symbols.push((s.name.clone(), value));
        }

        let tls_vaddr = match &self.tls {
            Some((_, align, _)) => cursor.next_multiple_of((*align).min(PAGE_SIZE)),
            None => cursor,
        };
        let rw_end = match &self.tls {
            Some((_, _, init)) => tls_vaddr + init.len() as u64,
            None => cursor,
        }
        .max(dyn_vaddr + 8);
        let rw_len = rw_end - rw_vaddr;

        let mut out = vec![0u8; (rw_end) as usize];

        // ELF header
        out[..4].copy_from_slice(&ELF_MAGIC);
        out[4] = 2;
        out[5] = 1;
        out[6] = 1;
        put16(&mut out, 16, 3);
        put16(&mut out, 18, self.arch.machine().to_u16());
        put32(&mut out, 20, 1);
        put64(&mut out, 32, 64);
        put16(&mut out, 52, 64);
        put16(&mut out, 54, 56);
        put16(&mut out, 56, phnum as u16);

        // Program headers
        let mut ph = 64usize;
        let mut phdr = |out: &mut Vec<u8>, p_type, flags, vaddr: u64, filesz: u64, memsz: u64, align| {
            put32(out, ph, p_type);
            put32(out, ph + 4, flags);
            put64(out, ph + 8, vaddr);
            put64(out, ph + 16, vaddr);
            put64(out, ph + 24, vaddr);
            put64(out, ph + 32, filesz);
            put64(out, ph + 40, memsz);
            put64(out, ph + 48, align);
            ph += 56;
        };
        phdr(&mut out, PT_LOAD, PF_R, 0, page0_len, page0_len, PAGE_SIZE);
        phdr(&mut out, PT_LOAD, PF_R | PF_X, text_vaddr, text.len() as u64, text.len() as u64, PAGE_SIZE);
        phdr(&mut out, PT_LOAD, PF_R | PF_W, rw_vaddr, rw_len, rw_len, PAGE_SIZE);
        phdr(&mut out, PT_DYNAMIC, PF_R | PF_W, dyn_vaddr, ndyn as u64 * 16, ndyn as u64 * 16, 8);
        if let Some((size, align, init)) = &self.tls {
            phdr(&mut out, PT_TLS, PF_R, tls_vaddr, init.len() as u64, *size, *align);
        }

        // .dynsym
        for (i, s) in ordered.iter().enumerate() {
            let at = dynsym_off as usize + (i + 1) * 24;
            let (bind, ty, shndx, size) = match &s.def {
                SymbolDef::Import { weak } => (if *weak { 2 } else { 1 }, 2, 0, 0),
                SymbolDef::Data { size } => (1, 1, 1, *size),
                SymbolDef::Func { code } => (1, 2, 1, code.len() as u64),
                SymbolDef::Tls { size, .. } => (1, 6, 1, *size),
            };
            put32(&mut out, at, name_offs[i]);
            out[at + 4] = (bind << 4) | ty;
            put16(&mut out, at + 6, shndx);
            put64(&mut out, at + 8, sym_values[i + 1]);
            put64(&mut out, at + 16, size);
        }
        write_at(&mut out, dynstr_off, &dynstr);
        write_at(&mut out, hash_off, &sysv);
        write_at(&mut out, gnu_off, &gnu);

        // Relocation tables, each in request order.
        let mut rela_at = rela_off;
        let mut jmprel_at = jmprel_off;
        for (spec, target) in self.relocs.iter().zip(&targets) {
            let raw = spec
                .kind
                .encode(self.arch)
                .unwrap_or_else(|| panic!("{:?} has no {:?} encoding", spec.kind, self.arch));
            let sym = spec.symbol.as_deref().map_or(0, sym_index);
            let entry = Elf64Rela::new(*target, raw, sym, spec.addend).to_bytes();
            let at = if spec.kind == RelocKind::JumpSlot {
                &mut jmprel_at
            } else {
                &mut rela_at
            };
            write_at(&mut out, *at, &entry);
            *at += 24;
        }

        // Text
        write_at(&mut out, text_vaddr, &text);

        // .dynamic
        let mut dyn_entries: Vec<(u64, u64)> = Vec::new();
        dyn_entries.extend(needed_offs.iter().map(|&o| (1, u64::from(o))));
        if let Some(o) = soname_off {
            dyn_entries.push((14, u64::from(o)));
        }
        dyn_entries.extend([
            (5, dynstr_off),
            (10, dynstr.len() as u64),
            (6, dynsym_off),
            (11, 24),
            (4, hash_off),
            (0x6fff_fef5, gnu_off),
        ]);
        if !rela_specs.is_empty() {
            dyn_entries.extend([(7, rela_off), (8, rela_len), (9, 24)]);
        }
        if !jmprel_specs.is_empty() {
            dyn_entries.extend([(23, jmprel_off), (2, jmprel_len), (20, 7)]);
        }
        dyn_entries.extend(self.extra_dynamic.iter().copied());
        dyn_entries.push((0, 0));
        for (i, (tag, val)) in dyn_entries.iter().enumerate() {
            let at = dyn_vaddr as usize + i * 16;
            put64(&mut out, at, *tag);
            put64(&mut out, at + 8, *val);
        }

        if let Some((_, _, init)) = &self.tls {
            write_at(&mut out, tls_vaddr, init);
        }

        SyntheticImage {
            bytes: out,
            got,
            slots,
            symbols,
        }
    }
}

fn sysv_hash_table(ordered: &[SymbolSpec]) -> Vec<u8> {
    let nchain = ordered.len() as u32 + 1;
    let nbucket = nchain.max(1);
    let mut buckets = vec![0u32; nbucket as usize];
    let mut chains = vec![0u32; nchain as usize];
    for (i, s) in ordered.iter().enumerate() {
        let idx = i as u32 + 1;
        let b = (elf_hash(s.name.as_bytes()) % nbucket) as usize;
        chains[idx as usize] = buckets[b];
        buckets[b] = idx;
    }
    [nbucket, nchain]
        .into_iter()
        .chain(buckets)
        .chain(chains)
        .flat_map(u32::to_le_bytes)
        .collect()
}

/// Single bucket, single bloom word: every exported symbol chains from
/// `symoffset` in order.
fn gnu_hash_table(ordered: &[SymbolSpec], symoffset: u32) -> Vec<u8> {
    const BLOOM_SHIFT: u32 = 6;
    let exports: Vec<u32> = ordered
        .iter()
        .filter(|s| !matches!(s.def, SymbolDef::Import { .. }))
        .map(|s| gnu_hash(s.name.as_bytes()))
        .collect();
    let bloom = exports.iter().fold(0u64, |w, h| {
        w | (1u64 << (h % 64)) | (1u64 << ((h >> BLOOM_SHIFT) % 64))
    });
    let bucket = if exports.is_empty() { 0 } else { symoffset };

    let mut out = Vec::new();
    for w in [1u32, symoffset, 1, BLOOM_SHIFT] {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out.extend_from_slice(&bloom.to_le_bytes());
    out.extend_from_slice(&bucket.to_le_bytes());
    for (i, h) in exports.iter().enumerate() {
        let last = i + 1 == exports.len();
        let v = if last { h | 1 } else { h & !1 };
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn align8(v: u64) -> u64 {
    v.next_multiple_of(8)
}

fn write_at(out: &mut [u8], at: u64, bytes: &[u8]) {
    let at = at as usize;
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

fn put16(out: &mut [u8], at: usize, v: u16) {
    out[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut [u8], at: usize, v: u64) {
    out[at..at + 8].copy_from_slice(&v.to_le_bytes());
}
