//! Wrapper catalog: the table of symbols the shim answers for.
//!
//! Each entry names a glibc symbol and either carries the address of a
//! translating handler or none, which marks a pass-through satisfied by the
//! host's own implementation. The table is assembled once at start-up and
//! indexed into a hash map; afterwards it is read without locking.

use std::collections::HashMap;

/// One catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapperEntry {
    pub name: &'static str,
    /// Handler address, or `None` for a pass-through.
    pub handler: Option<usize>,
}

impl WrapperEntry {
    pub const fn passthrough(name: &'static str) -> Self {
        Self {
            name,
            handler: None,
        }
    }

    pub const fn wrapper(name: &'static str, handler: usize) -> Self {
        Self {
            name,
            handler: Some(handler),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.handler.is_none()
    }
}

/// Entry counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub total: usize,
    pub wrappers: usize,
    pub passthrough: usize,
}

impl std::fmt::Display for CatalogStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} total, {} wrappers, {} pass-through",
            self.total, self.wrappers, self.passthrough
        )
    }
}

/// Immutable, indexed catalog.
#[derive(Debug)]
pub struct Catalog {
    entries: Vec<WrapperEntry>,
    index: HashMap<&'static str, usize>,
}

impl Catalog {
    /// Index `entries`. When a name repeats, the first row wins; the
    /// duplicates are reported by [`Catalog::duplicates`].
    pub fn new(entries: Vec<WrapperEntry>) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            index.entry(entry.name).or_insert(i);
        }
        Self { entries, index }
    }

    pub fn lookup(&self, name: &str) -> Option<&WrapperEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Rows in declaration order.
    pub fn entries(&self) -> &[WrapperEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names declared more than once.
    pub fn duplicates(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(i, e)| self.index.get(e.name) != Some(i))
            .map(|(_, e)| e.name)
            .collect()
    }

    pub fn stats(&self) -> CatalogStats {
        let wrappers = self.entries.iter().filter(|e| !e.is_passthrough()).count();
        CatalogStats {
            total: self.entries.len(),
            wrappers,
            passthrough: self.entries.len() - wrappers,
        }
    }
}
