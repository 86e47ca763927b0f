//! ELF symbol hash tables.
//!
//! Two formats exist in the wild:
//! - System V (`DT_HASH`): bucket/chain arrays; `nchain` equals the number of
//!   dynamic symbols, which is the only reliable way to size `.dynsym`
//!   without section headers.
//! - GNU (`DT_GNU_HASH`): bloom filter + buckets + chains over the hashed
//!   tail of `.dynsym`. Used for exported-symbol lookup when present.

use super::{ElfError, ElfResult, read_u32, read_u64};

/// System V ELF hash.
pub fn elf_hash(name: &[u8]) -> u32 {
    let mut h: u32 = 0;
    for &c in name {
        h = h.wrapping_shl(4).wrapping_add(u32::from(c));
        let g = h & 0xf000_0000;
        if g != 0 {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/// GNU hash (djb2: `h * 33 + c`, seeded with 5381).
pub fn gnu_hash(name: &[u8]) -> u32 {
    name.iter()
        .fold(5381u32, |h, &c| h.wrapping_mul(33).wrapping_add(u32::from(c)))
}

/// `DT_HASH` table view.
#[derive(Debug, Clone, Copy)]
pub struct SysvHashTable<'a> {
    data: &'a [u8],
    pub nbucket: u32,
    pub nchain: u32,
}

impl<'a> SysvHashTable<'a> {
    pub fn parse(data: &'a [u8]) -> ElfResult<Self> {
        let nbucket = read_u32(data, 0)?;
        let nchain = read_u32(data, 4)?;
        let needed = 8 + (nbucket as usize + nchain as usize) * 4;
        if data.len() < needed {
            return Err(ElfError::BufferTooSmall {
                needed,
                available: data.len(),
            });
        }
        Ok(Self {
            data,
            nbucket,
            nchain,
        })
    }

    /// Number of entries in `.dynsym`.
    pub fn symbol_count(&self) -> usize {
        self.nchain as usize
    }

    /// Find the symbol index whose name (via `name_of`) equals `name`.
    pub fn lookup<'n>(&self, name: &str, name_of: impl Fn(u32) -> Option<&'n str>) -> Option<u32> {
        if self.nbucket == 0 {
            return None;
        }
        let bucket = elf_hash(name.as_bytes()) % self.nbucket;
        let mut idx = read_u32(self.data, 8 + bucket as usize * 4).ok()?;
        let chain_base = 8 + self.nbucket as usize * 4;
        // Bounded walk: a corrupt chain cannot loop forever.
        for _ in 0..self.nchain {
            if idx == 0 {
                return None;
            }
            if name_of(idx) == Some(name) {
                return Some(idx);
            }
            idx = read_u32(self.data, chain_base + idx as usize * 4).ok()?;
        }
        None
    }
}

/// `DT_GNU_HASH` table view.
#[derive(Debug, Clone, Copy)]
pub struct GnuHashTable<'a> {
    data: &'a [u8],
    pub nbuckets: u32,
    pub symoffset: u32,
    pub bloom_size: u32,
    pub bloom_shift: u32,
}

impl<'a> GnuHashTable<'a> {
    const HEADER: usize = 16;

    /// `data` starts at the table and may extend past it (chains have no
    /// recorded length).
    pub fn parse(data: &'a [u8]) -> ElfResult<Self> {
        let table = Self {
            data,
            nbuckets: read_u32(data, 0)?,
            symoffset: read_u32(data, 4)?,
            bloom_size: read_u32(data, 8)?,
            bloom_shift: read_u32(data, 12)?,
        };
        if table.nbuckets == 0 || table.bloom_size == 0 {
            return Err(ElfError::InvalidDynamic("empty GNU hash table"));
        }
        let fixed = table.chains_start();
        if data.len() < fixed {
            return Err(ElfError::BufferTooSmall {
                needed: fixed,
                available: data.len(),
            });
        }
        Ok(table)
    }

    fn buckets_start(&self) -> usize {
        Self::HEADER + self.bloom_size as usize * 8
    }

    fn chains_start(&self) -> usize {
        self.buckets_start() + self.nbuckets as usize * 4
    }

    fn bucket(&self, i: u32) -> Option<u32> {
        read_u32(self.data, self.buckets_start() + i as usize * 4).ok()
    }

    fn chain(&self, sym_index: u32) -> Option<u32> {
        let slot = sym_index.checked_sub(self.symoffset)? as usize;
        read_u32(self.data, self.chains_start() + slot * 4).ok()
    }

    /// Bloom filter test; `false` means definitely absent.
    pub fn may_contain(&self, hash: u32) -> bool {
        let word_idx = (hash / 64) % self.bloom_size;
        let Ok(word) = read_u64(self.data, Self::HEADER + word_idx as usize * 8) else {
            return false;
        };
        let mask = (1u64 << (hash % 64)) | (1u64 << ((hash >> self.bloom_shift) % 64));
        word & mask == mask
    }

    /// Find the symbol index whose name (via `name_of`) equals `name`.
    pub fn lookup<'n>(&self, name: &str, name_of: impl Fn(u32) -> Option<&'n str>) -> Option<u32> {
        let hash = gnu_hash(name.as_bytes());
        if !self.may_contain(hash) {
            return None;
        }
        let mut idx = self.bucket(hash % self.nbuckets)?;
        if idx == 0 {
            return None;
        }
        loop {
            let chain_hash = self.chain(idx)?;
            if (chain_hash | 1) == (hash | 1) && name_of(idx) == Some(name) {
                return Some(idx);
            }
            if chain_hash & 1 != 0 {
                return None;
            }
            idx += 1;
        }
    }

    /// Number of entries in `.dynsym`: one past the last chained index.
    pub fn symbol_count(&self) -> Option<usize> {
        let last_start = (0..self.nbuckets).filter_map(|b| self.bucket(b)).max()?;
        if last_start < self.symoffset {
            return Some(self.symoffset as usize);
        }
        let mut idx = last_start;
        loop {
            if self.chain(idx)? & 1 != 0 {
                return Some(idx as usize + 1);
            }
            idx += 1;
        }
    }
}
