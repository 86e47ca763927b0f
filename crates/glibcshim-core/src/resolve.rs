//! Symbol resolution order.
//!
//! 1. Catalog entry with a handler: the handler.
//! 2. Catalog pass-through: the host's definition of the same name.
//! 3. Exports of loaded foreign modules.
//! 4. The host's global symbol scope.
//!
//! The resolver is generic over [`SymbolSource`], which the ABI crate backs
//! with `dlsym` and the module registry. Resolution has no side effects
//! besides trace logging.

use std::fmt;

use glibcshim_runtime::shim_trace;

use crate::catalog::Catalog;
use crate::elf::plan::{ResolvedSymbol, SymbolLookup, TlsBinding};
use crate::error::{ShimError, ShimResult};

/// Where a definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Wrapper,
    PassThrough,
    /// Export of the foreign module with this handle.
    Foreign(u64),
    Host,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrapper => f.write_str("wrapper"),
            Self::PassThrough => f.write_str("pass-through"),
            Self::Foreign(handle) => write!(f, "foreign module {handle:#x}"),
            Self::Host => f.write_str("host"),
        }
    }
}

/// A successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub addr: u64,
    pub origin: Origin,
    /// Present for thread-local exports of foreign modules.
    pub tls: Option<TlsBinding>,
}

/// A foreign module's export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignExport {
    pub handle: u64,
    pub symbol: ResolvedSymbol,
}

/// Backing symbol tables.
pub trait SymbolSource {
    /// The host's definition of `name` (global scope, excluding the shim's
    /// own foreign modules).
    fn host_symbol(&self, name: &str) -> Option<u64>;

    /// An export of an already-loaded foreign module.
    fn foreign_symbol(&self, name: &str) -> Option<ForeignExport>;
}

/// Resolver over a catalog and a symbol source.
pub struct Resolver<'a, S: ?Sized> {
    catalog: &'a Catalog,
    source: &'a S,
}

impl<'a, S: SymbolSource + ?Sized> Resolver<'a, S> {
    pub fn new(catalog: &'a Catalog, source: &'a S) -> Self {
        Self { catalog, source }
    }

    /// Resolve `name` or fail with [`ShimError::Resolution`].
    pub fn resolve(&self, name: &str) -> ShimResult<Resolution> {
        let found = self.find(name);
        match &found {
            Some(r) => shim_trace!("resolve", "{name} -> {:#x} ({})", r.addr, r.origin),
            None => shim_trace!("resolve", "{name} -> not found"),
        }
        found.ok_or_else(|| ShimError::resolution(name))
    }

    fn find(&self, name: &str) -> Option<Resolution> {
        let plain = |addr, origin| Resolution {
            addr,
            origin,
            tls: None,
        };
        if let Some(entry) = self.catalog.lookup(name) {
            match entry.handler {
                Some(handler) => return Some(plain(handler as u64, Origin::Wrapper)),
                None => {
                    if let Some(addr) = self.source.host_symbol(name) {
                        return Some(plain(addr, Origin::PassThrough));
                    }
                }
            }
        }
        if let Some(export) = self.source.foreign_symbol(name) {
            return Some(Resolution {
                addr: export.symbol.addr,
                origin: Origin::Foreign(export.handle),
                tls: export.symbol.tls,
            });
        }
        self.source
            .host_symbol(name)
            .map(|addr| plain(addr, Origin::Host))
    }
}

impl<S: SymbolSource + ?Sized> SymbolLookup for Resolver<'_, S> {
    fn lookup(&self, name: &str) -> Option<ResolvedSymbol> {
        self.resolve(name).ok().map(|r| ResolvedSymbol {
            addr: r.addr,
            tls: r.tls,
        })
    }
}
