//! Environment-driven configuration.
//!
//! | variable | meaning |
//! |---|---|
//! | `GLIBCSHIM_LOG_LEVEL` | `0`..`5` or a level name; default `3` (info) |
//! | `GLIBCSHIM_LOG_FORMAT` | `text` (default) or `json` |
//! | `GLIBCSHIM_TLS_ARENA_KIB` | per-thread dynamic TLS arena, default 64, clamped to 4..=4096 |
//! | `GLIBCSHIM_LIBRARY_PATH` | `:`-separated search path for needed foreign modules |
//!
//! The log level is consulted on every log call, so it is cached in an atomic
//! rather than behind the [`ShimConfig`] `OnceLock`; it can also be forced
//! at runtime with [`set_log_level`].

use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::log::{LogFormat, LogLevel};

pub const ENV_LOG_LEVEL: &str = "GLIBCSHIM_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "GLIBCSHIM_LOG_FORMAT";
pub const ENV_TLS_ARENA_KIB: &str = "GLIBCSHIM_TLS_ARENA_KIB";
pub const ENV_LIBRARY_PATH: &str = "GLIBCSHIM_LIBRARY_PATH";

pub const DEFAULT_TLS_ARENA_KIB: usize = 64;
const MIN_TLS_ARENA_KIB: usize = 4;
const MAX_TLS_ARENA_KIB: usize = 4096;

/// Snapshot of every setting except the log level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    pub log_format: LogFormat,
    /// Capacity in bytes of each thread's dynamic-module TLS arena.
    pub tls_arena_bytes: usize,
    pub library_path: Vec<PathBuf>,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            tls_arena_bytes: DEFAULT_TLS_ARENA_KIB * 1024,
            library_path: Vec::new(),
        }
    }
}

impl ShimConfig {
    /// Build from an arbitrary variable lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            cfg.log_format = LogFormat::from_str_loose(&raw);
        }
        if let Some(kib) = lookup(ENV_TLS_ARENA_KIB).and_then(|raw| raw.trim().parse::<usize>().ok())
        {
            cfg.tls_arena_bytes = kib.clamp(MIN_TLS_ARENA_KIB, MAX_TLS_ARENA_KIB) * 1024;
        }
        if let Some(raw) = lookup(ENV_LIBRARY_PATH) {
            cfg.library_path = raw
                .split(':')
                .filter(|part| !part.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        cfg
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Process-wide configuration, read from the environment on first use.
pub fn config() -> &'static ShimConfig {
    static CONFIG: OnceLock<ShimConfig> = OnceLock::new();
    CONFIG.get_or_init(ShimConfig::from_env)
}

// 0..=5 = resolved level, 254 = unresolved, 255 = resolving.
static CACHED_LEVEL: AtomicU8 = AtomicU8::new(LEVEL_UNRESOLVED);

const LEVEL_UNRESOLVED: u8 = 254;
const LEVEL_RESOLVING: u8 = 255;

fn parse_level_env(raw: Option<String>) -> LogLevel {
    raw.as_deref()
        .and_then(LogLevel::parse_loose)
        .unwrap_or_default()
}

/// Current log level. Reads `GLIBCSHIM_LOG_LEVEL` on the first call only.
///
/// A call that races the first resolution (another thread, or a sink that
/// logs while the environment is being read) gets the default level.
#[must_use]
pub fn log_level() -> LogLevel {
    let cached = CACHED_LEVEL.load(Ordering::Acquire);
    if cached <= LogLevel::Trace as u8 {
        return LogLevel::from_numeric(cached);
    }
    if cached == LEVEL_RESOLVING {
        return LogLevel::default();
    }
    if CACHED_LEVEL
        .compare_exchange(
            LEVEL_UNRESOLVED,
            LEVEL_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_LEVEL.load(Ordering::Acquire);
        return if v <= LogLevel::Trace as u8 {
            LogLevel::from_numeric(v)
        } else {
            LogLevel::default()
        };
    }

    let level = parse_level_env(std::env::var(ENV_LOG_LEVEL).ok());
    // A concurrent set_log_level wins over the environment.
    let _ = CACHED_LEVEL.compare_exchange(
        LEVEL_RESOLVING,
        level as u8,
        Ordering::AcqRel,
        Ordering::Relaxed,
    );
    LogLevel::from_numeric(CACHED_LEVEL.load(Ordering::Acquire))
}

/// Force the log level, overriding the environment.
pub fn set_log_level(level: LogLevel) {
    CACHED_LEVEL.store(level as u8, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let cfg = ShimConfig::from_lookup(|_| None);
        assert_eq!(cfg, ShimConfig::default());
        assert_eq!(cfg.tls_arena_bytes, 64 * 1024);
    }

    #[test]
    fn arena_size_is_clamped() {
        let small = ShimConfig::from_lookup(lookup_from(&[(ENV_TLS_ARENA_KIB, "1")]));
        assert_eq!(small.tls_arena_bytes, 4 * 1024);
        let large = ShimConfig::from_lookup(lookup_from(&[(ENV_TLS_ARENA_KIB, "99999")]));
        assert_eq!(large.tls_arena_bytes, 4096 * 1024);
        let bogus = ShimConfig::from_lookup(lookup_from(&[(ENV_TLS_ARENA_KIB, "lots")]));
        assert_eq!(bogus.tls_arena_bytes, 64 * 1024);
    }

    #[test]
    fn library_path_skips_empty_components() {
        let cfg = ShimConfig::from_lookup(lookup_from(&[(ENV_LIBRARY_PATH, "/a::/b/c:")]));
        assert_eq!(
            cfg.library_path,
            vec![PathBuf::from("/a"), PathBuf::from("/b/c")]
        );
    }

    #[test]
    fn json_format_selected() {
        let cfg = ShimConfig::from_lookup(lookup_from(&[(ENV_LOG_FORMAT, "JSON")]));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn env_level_parsing_falls_back_to_info() {
        assert_eq!(parse_level_env(None), LogLevel::Info);
        assert_eq!(parse_level_env(Some("5".into())), LogLevel::Trace);
        assert_eq!(parse_level_env(Some("garbage".into())), LogLevel::Info);
    }
}
