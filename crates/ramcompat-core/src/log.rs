//! Structured JSONL event log.
//!
//! Events are serialized with `serde_json` and written to stderr, one object
//! per line, when their level passes [`crate::config::log_threshold`]. Writing
//! may allocate; under an override build that re-enters the shim, so a
//! thread-local guard drops events raised while an event is being written.

use std::cell::{Cell, RefCell};
use std::io::Write;

use serde::Serialize;

use crate::config;
use crate::reply::ReplyCode;

/// Severity of a structured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// True when an event at `level` would be written.
#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    let threshold = config::log_threshold();
    level != LogLevel::Off && threshold != LogLevel::Off && level <= threshold
}

/// One structured event.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: LogLevel,
    pub event: &'a str,
    pub symbol: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<&'a str>,
}

impl<'a> LogEvent<'a> {
    #[must_use]
    pub fn new(level: LogLevel, symbol: &'a str, event: &'a str) -> Self {
        Self {
            level,
            event,
            symbol,
            addr: None,
            size: None,
            reply: None,
            details: None,
        }
    }

    #[must_use]
    pub fn addr(mut self, ptr: *const u8) -> Self {
        self.addr = Some(ptr as usize);
        self
    }

    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn reply(mut self, code: ReplyCode) -> Self {
        self.reply = Some(code.name());
        self
    }

    #[must_use]
    pub fn details(mut self, details: &'a str) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize as a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Write the event if its level is enabled.
    pub fn emit(&self) {
        if enabled(self.level) {
            self.write();
        }
    }

    /// Write the event regardless of the configured threshold.
    pub fn emit_always(&self) {
        self.write();
    }

    fn write(&self) {
        let Some(_guard) = enter_log_guard() else {
            return;
        };
        let Ok(line) = self.to_json_line() else {
            return;
        };
        let captured = CAPTURE.with(|cap| {
            cap.borrow_mut()
                .as_mut()
                .map(|lines| lines.push(line.clone()))
                .is_some()
        });
        if !captured {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{line}");
        }
    }
}

thread_local! {
    static LOG_DEPTH: Cell<u32> = const { Cell::new(0) };
    static CAPTURE: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

struct LogGuard;

impl Drop for LogGuard {
    fn drop(&mut self) {
        LOG_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn enter_log_guard() -> Option<LogGuard> {
    LOG_DEPTH.with(|depth| {
        if depth.get() > 0 {
            None
        } else {
            depth.set(1);
            Some(LogGuard)
        }
    })
}

/// Run `f`, collecting the lines this thread would have written to stderr.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    let previous = CAPTURE.with(|cap| cap.borrow_mut().replace(Vec::new()));
    let out = f();
    let lines = CAPTURE.with(|cap| {
        let mut slot = cap.borrow_mut();
        let lines = slot.take().unwrap_or_default();
        *slot = previous;
        lines
    });
    (out, lines)
}
