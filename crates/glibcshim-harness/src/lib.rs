//! Introspection harness for the glibc compatibility shim.
//!
//! This crate provides:
//! - Catalog statistics: wrapper and pass-through counts, optionally every row
//! - Resolution reports: where each symbol would bind and from which origin
//! - Image inspection: needed modules, segments, relocation kinds and import
//!   bindings of a foreign image, without mapping it
//! - Load runs: map an image through the real loader and report the registry
//!
//! Reports are JSON envelopes carrying a SHA-256 of their payload.

#![forbid(unsafe_code)]

pub mod error;
pub mod inspect;
pub mod report;

pub use error::{HarnessError, HarnessResult};
pub use inspect::{ImageReport, read_image};
pub use report::{CatalogReport, LoadReport, ModuleReport, ResolveReport, Report, SymbolReport};
