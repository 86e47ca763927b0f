//! Leveled logging with a pluggable sink.
//!
//! Every message is a `(level, tag, message)` triple. The shim never depends
//! on what the sink does with it: sink panics are swallowed and there is no
//! return channel. Without an installed sink, records go to stderr either as
//! a single text line or as one JSONL [`LogRecord`] per line.
//!
//! The numeric level scale is fixed:
//!
//! | value | level |
//! |---|---|
//! | 0 | none |
//! | 1 | error |
//! | 2 | warn |
//! | 3 | info (default) |
//! | 4 | debug |
//! | 5 | trace (includes every symbol resolution) |

use std::io::Write;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config;

/// Verbosity level. Ordering follows the numeric scale, so `a <= b` means
/// "`a` is at least as severe as `b`".
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Error = 1,
    Warn = 2,
    #[default]
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    /// Map a numeric level; values above 5 saturate to `Trace`.
    #[must_use]
    pub const fn from_numeric(value: u8) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Error,
            2 => Self::Warn,
            3 => Self::Info,
            4 => Self::Debug,
            _ => Self::Trace,
        }
    }

    /// Parse either a number or a level name (case-insensitive).
    #[must_use]
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<u8>() {
            return Some(Self::from_numeric(n));
        }
        match raw.to_ascii_lowercase().as_str() {
            "none" | "off" | "silent" => Some(Self::None),
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" | "all" => Some(Self::Trace),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }
}

/// Output format of the default stderr sink.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn from_str_loose(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// One structured log line as written by the JSON sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub tag: String,
    pub message: String,
}

impl LogRecord {
    #[must_use]
    pub fn new(level: LogLevel, tag: &str, message: &str) -> Self {
        Self {
            timestamp: now_utc(),
            level,
            tag: tag.to_string(),
            message: message.to_string(),
        }
    }

    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

type SinkFn = dyn Fn(LogLevel, &str, &str) + Send + Sync;

static SINK: RwLock<Option<Arc<SinkFn>>> = parking_lot::const_rwlock(None);

/// Install a sink, replacing any previous one.
pub fn set_sink<F>(sink: F)
where
    F: Fn(LogLevel, &str, &str) + Send + Sync + 'static,
{
    *SINK.write() = Some(Arc::new(sink));
}

/// Remove the installed sink and fall back to stderr.
pub fn clear_sink() {
    *SINK.write() = None;
}

/// True when a record at `level` would be delivered.
#[inline]
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    level != LogLevel::None && level <= config::log_level()
}

/// Deliver one record. Fire-and-forget.
pub fn log(level: LogLevel, tag: &str, message: &str) {
    if !enabled(level) {
        return;
    }
    // Clone out of the lock so a sink that logs (or swaps sinks) cannot deadlock.
    let sink = SINK.read().clone();
    let _ = match sink {
        Some(sink) => catch_unwind(AssertUnwindSafe(|| sink(level, tag, message))),
        None => catch_unwind(AssertUnwindSafe(|| write_stderr(level, tag, message))),
    };
}

fn write_stderr(level: LogLevel, tag: &str, message: &str) {
    let line = match config::config().log_format {
        LogFormat::Json => match LogRecord::new(level, tag, message).to_jsonl() {
            Ok(line) => line,
            Err(_) => return,
        },
        LogFormat::Text => format!("[glibcshim/{}] {tag}: {message}", level.as_str()),
    };
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "{line}");
}

#[macro_export]
macro_rules! shim_log {
    ($level:expr, $tag:expr, $($arg:tt)+) => {
        if $crate::log::enabled($level) {
            $crate::log::log($level, $tag, &::std::format!($($arg)+));
        }
    };
}

#[macro_export]
macro_rules! shim_error {
    ($tag:expr, $($arg:tt)+) => { $crate::shim_log!($crate::log::LogLevel::Error, $tag, $($arg)+) };
}

#[macro_export]
macro_rules! shim_warn {
    ($tag:expr, $($arg:tt)+) => { $crate::shim_log!($crate::log::LogLevel::Warn, $tag, $($arg)+) };
}

#[macro_export]
macro_rules! shim_info {
    ($tag:expr, $($arg:tt)+) => { $crate::shim_log!($crate::log::LogLevel::Info, $tag, $($arg)+) };
}

#[macro_export]
macro_rules! shim_debug {
    ($tag:expr, $($arg:tt)+) => { $crate::shim_log!($crate::log::LogLevel::Debug, $tag, $($arg)+) };
}

#[macro_export]
macro_rules! shim_trace {
    ($tag:expr, $($arg:tt)+) => { $crate::shim_log!($crate::log::LogLevel::Trace, $tag, $($arg)+) };
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn now_utc() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = since_epoch.as_secs() as i64;
    let (year, month, day) = civil_from_days(secs.div_euclid(86_400));
    let rem = secs.rem_euclid(86_400);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
        since_epoch.subsec_millis()
    )
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Sink and level are process-wide; serialize the tests that touch them.
    static GUARD: Mutex<()> = parking_lot::const_mutex(());

    #[test]
    fn numeric_levels_saturate() {
        assert_eq!(LogLevel::from_numeric(0), LogLevel::None);
        assert_eq!(LogLevel::from_numeric(3), LogLevel::Info);
        assert_eq!(LogLevel::from_numeric(5), LogLevel::Trace);
        assert_eq!(LogLevel::from_numeric(42), LogLevel::Trace);
    }

    #[test]
    fn parse_loose_accepts_names_and_numbers() {
        assert_eq!(LogLevel::parse_loose("4"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse_loose(" WARN "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse_loose("silent"), Some(LogLevel::None));
        assert_eq!(LogLevel::parse_loose("chatty"), None);
    }

    #[test]
    fn level_ordering_matches_scale() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn record_serializes_lowercase_level() {
        let rec = LogRecord::new(LogLevel::Warn, "loader", "hello");
        let parsed: serde_json::Value = serde_json::from_str(&rec.to_jsonl().unwrap()).unwrap();
        assert_eq!(parsed["level"], "warn");
        assert_eq!(parsed["tag"], "loader");
        assert_eq!(parsed["message"], "hello");
        assert!(parsed["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn civil_conversion_known_dates() {
        assert_eq!(civil_from_days(0), (1970, 1, 1));
        assert_eq!(civil_from_days(11_016), (2000, 2, 29));
        assert_eq!(civil_from_days(-1), (1969, 12, 31));
    }

    #[test]
    fn sink_receives_enabled_records_only() {
        let _g = GUARD.lock();
        let seen: Arc<Mutex<Vec<(LogLevel, String, String)>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);
        set_sink(move |level, tag, msg| {
            sink_seen.lock().push((level, tag.to_string(), msg.to_string()));
        });
        let previous = config::log_level();
        config::set_log_level(LogLevel::Warn);

        log(LogLevel::Error, "t", "kept");
        log(LogLevel::Debug, "t", "dropped");
        shim_warn!("t", "formatted {}", 7);

        config::set_log_level(previous);
        clear_sink();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].2, "kept");
        assert_eq!(seen[1], (LogLevel::Warn, "t".to_string(), "formatted 7".to_string()));
    }

    #[test]
    fn panicking_sink_is_contained() {
        let _g = GUARD.lock();
        set_sink(|_, _, _| panic!("sink exploded"));
        let previous = config::log_level();
        config::set_log_level(LogLevel::Info);
        log(LogLevel::Error, "t", "still returns");
        config::set_log_level(previous);
        clear_sink();
    }
}
