//! # glibcshim-runtime
//!
//! Process-wide state shared by every other shim crate: the environment-driven
//! configuration (read once, cached) and the logging facility that forwards
//! `(level, tag, message)` triples to a pluggable sink.

pub mod config;
pub mod log;

pub use config::{ShimConfig, config, log_level, set_log_level};
pub use log::{LogFormat, LogLevel, LogRecord, clear_sink, log, set_sink};
