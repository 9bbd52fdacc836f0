//! Runtime configuration.
//!
//! Two environment variables are read on first use and cached:
//! - `RAMCOMPAT_LOG`: threshold for structured log events
//!   (`off`, `error`, `warn` (default), `info`, `debug`, `trace`).
//! - `RAMCOMPAT_REPORT`: format used by the default failure reporter
//!   (`text` (default) or `json`).
//!
//! Resolution uses a non-blocking atomic state machine rather than `OnceLock`:
//! under an override build `std::env::var` may allocate, re-entering the shim
//! while the value is still being resolved. Reentrant readers see the
//! resolving state and get the default.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::log::LogLevel;

/// Output format of the default failure reporter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    /// `FAIL <code> in <function>, at <file>, line <line>: <expr>`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl ReportFormat {
    /// Parse from string (case-insensitive). Unknown values map to `Text`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" | "structured" => Self::Json,
            _ => Self::Text,
        }
    }
}

impl LogLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Warn`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Self::Off,
            "error" | "err" => Self::Error,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "trace" | "all" => Self::Trace,
            _ => Self::Warn,
        }
    }
}

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 255;

static CACHED_LOG: AtomicU8 = AtomicU8::new(UNRESOLVED);
static CACHED_REPORT: AtomicU8 = AtomicU8::new(UNRESOLVED);

fn log_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Off => 1,
        LogLevel::Error => 2,
        LogLevel::Warn => 3,
        LogLevel::Info => 4,
        LogLevel::Debug => 5,
        LogLevel::Trace => 6,
    }
}

fn u8_to_log(v: u8) -> LogLevel {
    match v {
        1 => LogLevel::Off,
        2 => LogLevel::Error,
        4 => LogLevel::Info,
        5 => LogLevel::Debug,
        6 => LogLevel::Trace,
        _ => LogLevel::Warn,
    }
}

fn report_to_u8(format: ReportFormat) -> u8 {
    match format {
        ReportFormat::Text => 1,
        ReportFormat::Json => 2,
    }
}

fn u8_to_report(v: u8) -> ReportFormat {
    match v {
        2 => ReportFormat::Json,
        _ => ReportFormat::Text,
    }
}

/// Resolve `var` into `cache` once. Returns the raw cached byte, or `None`
/// while another (possibly reentrant) caller is resolving.
fn resolve(cache: &AtomicU8, var: &str, parse: impl FnOnce(Option<String>) -> u8) -> Option<u8> {
    let cached = cache.load(Ordering::Acquire);
    if cached != UNRESOLVED && cached != RESOLVING {
        return Some(cached);
    }
    if cached == RESOLVING {
        return None;
    }
    if cache
        .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::Relaxed)
        .is_err()
    {
        let v = cache.load(Ordering::Acquire);
        return (v != UNRESOLVED && v != RESOLVING).then_some(v);
    }
    let value = parse(std::env::var(var).ok());
    cache.store(value, Ordering::Release);
    Some(value)
}

/// Threshold for structured log events.
#[must_use]
pub fn log_threshold() -> LogLevel {
    resolve(&CACHED_LOG, "RAMCOMPAT_LOG", |raw| {
        log_to_u8(raw.map_or(LogLevel::Warn, |v| LogLevel::from_str_loose(&v)))
    })
    .map_or(LogLevel::Warn, u8_to_log)
}

/// Replace the log threshold, overriding the environment.
pub fn set_log_threshold(level: LogLevel) {
    CACHED_LOG.store(log_to_u8(level), Ordering::Release);
}

/// Format of the default failure reporter.
#[must_use]
pub fn report_format() -> ReportFormat {
    resolve(&CACHED_REPORT, "RAMCOMPAT_REPORT", |raw| {
        report_to_u8(raw.map_or(ReportFormat::Text, |v| ReportFormat::from_str_loose(&v)))
    })
    .map_or(ReportFormat::Text, u8_to_report)
}

/// Replace the report format, overriding the environment.
pub fn set_report_format(format: ReportFormat) {
    CACHED_REPORT.store(report_to_u8(format), Ordering::Release);
}
