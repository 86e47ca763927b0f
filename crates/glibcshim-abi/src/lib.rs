// Handlers accept raw pointers from foreign callers and validate them inline,
// so per-function safety docs would be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # glibcshim-abi
//!
//! The `extern "C"` side of the glibc compatibility shim.
//!
//! This crate owns everything that touches raw memory: mapping foreign
//! images and applying their relocation plans, the per-thread foreign TLS
//! block and dynamic-module arena, the thread-pointer primitives, the
//! wrapper catalog with every translating handler, and the C API exported
//! to collaborators.
//!
//! ```text
//! glibcshim_load(path) -> ShimContext -> parse + plan (core) -> map, patch, protect -> publish
//! foreign call -> catalog handler (this crate) -> translate -> host libc -> sync errno -> return
//! ```
//!
//! Handlers are reached only through addresses handed out by the resolver.
//! None of them is exported under its glibc name, so linking this crate
//! (including into its own test binaries) never interposes on the host C
//! library. Only the `glibcshim_*` entry points in [`api`] carry
//! `#[no_mangle]`.

#[macro_use]
mod macros;

mod util;

pub mod api;
pub mod catalog;
pub mod context;
pub mod foreign_tls;
pub mod host;
pub mod mapping;
pub mod primitives;

// Wrapper handlers, one module per header family.
pub mod ctype_abi;
pub mod dlfcn_abi;
pub mod errno_abi;
pub mod io_abi;
pub mod mqueue_abi;
pub mod pthread_abi;
pub mod signal_abi;
pub mod socket_abi;
pub mod stdlib_abi;
pub mod string_abi;
pub mod sysv_ipc_abi;
pub mod time_abi;
pub mod tls_abi;
pub mod unistd_abi;

pub use catalog::catalog;
pub use context::{ModuleInfo, ShimContext, context};
