//! Thread-local storage compatibility: the foreign-visible per-thread block,
//! glibc classification tables, the dynamic TLS arena layout and the
//! per-thread readiness state machine.
//!
//! The hardware thread pointer always addresses the host's own block. The
//! foreign block described here is a separate per-thread structure that
//! wrappers read and write; the ABI crate owns the actual storage.

pub mod arena;
pub mod ctype;
pub mod layout;
pub mod state;

pub use arena::{ArenaLayout, Locate, ThreadArenaState, TlsSlot};
pub use layout::{ForeignTlsBlock, STACK_GUARD_OFFSET};
pub use state::TlsState;
