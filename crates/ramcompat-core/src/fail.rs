//! Failure discipline: contract reporting, fatal abort, first-error accumulation.
//!
//! Contract assertions ([`ram_check!`]) hand a [`FailReport`] to the
//! process-wide reporter and return the failing [`ReplyCode`]. The reporter is
//! replaceable with [`set_reporter`]; `None` restores the default, which writes
//! to stderr in the format chosen by [`crate::config::report_format`].
//!
//! [`fatal`] is reserved for states the allocator cannot continue from. It is
//! not a reply code and cannot be caught: it prints a diagnostic and aborts.

use std::io::Write;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{self, ReportFormat};
use crate::log::{LogEvent, LogLevel};
use crate::reply::{Reply, ReplyCode};

/// A failed contract assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailReport<'a> {
    #[serde(serialize_with = "serialize_code")]
    pub code: ReplyCode,
    pub expr: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<&'a str>,
    pub file: &'a str,
    pub line: u32,
}

fn serialize_code<S: serde::Serializer>(code: &ReplyCode, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_i32(code.code())
}

/// Reporter hook signature.
pub type Reporter = fn(&FailReport<'_>);

static REPORTER: RwLock<Option<Reporter>> = parking_lot::const_rwlock(None);

/// Install `reporter`, or restore the default with `None`.
pub fn set_reporter(reporter: Option<Reporter>) {
    *REPORTER.write() = reporter;
}

/// The currently installed reporter.
#[must_use]
pub fn current_reporter() -> Reporter {
    REPORTER.read().unwrap_or(default_reporter)
}

/// Pass `report` to the installed reporter.
pub fn report(report: &FailReport<'_>) {
    let reporter = current_reporter();
    reporter(report);
}

/// Render `report` in the default text format.
pub fn write_text(out: &mut impl Write, report: &FailReport<'_>) -> std::io::Result<()> {
    match report.function {
        Some(function) => writeln!(
            out,
            "FAIL {} in {}, at {}, line {}: {}",
            report.code.code(),
            function,
            report.file,
            report.line,
            report.expr
        ),
        None => writeln!(
            out,
            "FAIL {} at {}, line {}: {}",
            report.code.code(),
            report.file,
            report.line,
            report.expr
        ),
    }
}

/// Default reporter: one line on stderr.
pub fn default_reporter(report: &FailReport<'_>) {
    let mut err = std::io::stderr().lock();
    match config::report_format() {
        ReportFormat::Text => {
            let _ = write_text(&mut err, report);
        }
        ReportFormat::Json => {
            if let Ok(line) = serde_json::to_string(report) {
                let _ = writeln!(err, "{line}");
            }
        }
    }
}

/// Report a failed contract assertion and return its code.
///
/// `ram_check!(cond, code)` returns `Err(code)` from the enclosing function
/// when `cond` is false. `ram_check!(fail code, "what")` reports unconditionally.
#[macro_export]
macro_rules! ram_check {
    (fail $code:expr, $what:expr $(,)?) => {{
        let code: $crate::reply::ReplyCode = $code;
        $crate::fail::report(&$crate::fail::FailReport {
            code,
            expr: $what,
            function: Some(module_path!()),
            file: file!(),
            line: line!(),
        });
        return Err(code);
    }};
    ($cond:expr, $code:expr $(,)?) => {
        if !($cond) {
            let code: $crate::reply::ReplyCode = $code;
            $crate::fail::report(&$crate::fail::FailReport {
                code,
                expr: stringify!($cond),
                function: Some(module_path!()),
                file: file!(),
                line: line!(),
            });
            return Err(code);
        }
    };
}

/// Print `fatal: <why>` to stderr and abort the process.
pub fn fatal(why: &str) -> ! {
    let why = fatal_reason(why);
    fatal_with(
        LogEvent::new(LogLevel::Error, "ramcompat", "fatal").details(why),
        why,
    )
}

/// [`fatal`], with `event` as the one structured event recorded for the abort.
pub fn fatal_with(event: LogEvent<'_>, why: &str) -> ! {
    event.emit();
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "fatal: {}", fatal_reason(why));
    let _ = err.flush();
    std::process::abort()
}

fn fatal_reason(why: &str) -> &str {
    if why.is_empty() { "*unspecified*" } else { why }
}

/// Record `next` into `current` only if `current` is still `Ok`.
pub fn accumulate(current: &mut Reply<()>, next: Reply<()>) {
    if current.is_ok() {
        *current = next;
    }
}

/// Keeps the first failure across a sequence of fallible cleanup steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirstError {
    result: Reply<()>,
}

impl Default for FirstError {
    fn default() -> Self {
        Self::new()
    }
}

impl FirstError {
    #[must_use]
    pub const fn new() -> Self {
        Self { result: Ok(()) }
    }

    /// Feed one step's result; the value is passed through on success.
    pub fn step<T>(&mut self, result: Reply<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(code) => {
                accumulate(&mut self.result, Err(code));
                None
            }
        }
    }

    #[must_use]
    pub fn first(&self) -> Option<ReplyCode> {
        self.result.err()
    }

    /// `Err` with the first recorded failure, otherwise `Ok(())`.
    pub fn finish(self) -> Reply<()> {
        self.result
    }
}
