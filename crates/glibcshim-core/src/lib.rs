//! # glibcshim-core
//!
//! Safe logic of the glibc compatibility shim.
//!
//! Everything here operates on plain Rust values: ELF images are parsed from
//! byte slices and relocated into a patch plan, the resolver works over a
//! trait instead of `dlsym`, and the emulated IPC tables hold their state in
//! ordinary collections. The `glibcshim-abi` crate owns every raw pointer and
//! host call. No `unsafe` code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod catalog;
pub mod elf;
pub mod error;
pub mod exit;
pub mod ipc;
pub mod resolve;
pub mod string;
pub mod time;
pub mod tls;
pub mod translate;

pub use catalog::{Catalog, CatalogStats, WrapperEntry};
pub use error::{ShimError, ShimResult};
pub use resolve::{Origin, Resolution, Resolver, SymbolSource};
