//! Bootstrap entry points: initialization, reporter hook, page geometry.
//!
//! The geometry accessors return `Inconsistent` until `ramcompat_initialize`
//! has succeeded.

use std::ffi::{CString, c_char, c_int, c_void};

use parking_lot::RwLock;
use ramcompat_core::fail::{FailReport, set_reporter};
use ramcompat_core::supplemental::{AllocFn, FreeFn, SizeFn};
use ramcompat_core::reply::reply_to_code;
use ramcompat_core::{PageGeometry, ReplyCode};

use crate::state::{enter_allocator_reentry_guard, initialize, shim};

/// C reporter hook: `(code, expression, function-or-null, file, line)`.
pub type ReporterFn = unsafe extern "C" fn(
    code: c_int,
    expr: *const c_char,
    function: *const c_char,
    file: *const c_char,
    line: c_int,
);

static C_REPORTER: RwLock<Option<ReporterFn>> = parking_lot::const_rwlock(None);

fn to_cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| c"?".to_owned())
}

fn forward_to_c(report: &FailReport<'_>) {
    let Some(hook) = *C_REPORTER.read() else {
        ramcompat_core::fail::default_reporter(report);
        return;
    };
    let expr = to_cstring(report.expr);
    let file = to_cstring(report.file);
    let function = report.function.map(to_cstring);
    let function_ptr = function.as_ref().map_or(std::ptr::null(), |f| f.as_ptr());
    // SAFETY: every string stays alive for the duration of the call.
    unsafe {
        hook(
            report.code.code(),
            expr.as_ptr(),
            function_ptr,
            file.as_ptr(),
            c_int::try_from(report.line).unwrap_or(c_int::MAX),
        );
    }
}

/// Build the process-wide shim. Null entry points default to the native
/// allocator. Returns 0, `Unsupported` when already initialized, or the
/// bootstrap failure.
///
/// Must be called once, during single-threaded start-up.
#[unsafe(no_mangle)]
pub extern "C" fn ramcompat_initialize(
    alloc: Option<AllocFn>,
    free: Option<FreeFn>,
    size: Option<SizeFn>,
) -> c_int {
    let _guard = enter_allocator_reentry_guard();
    reply_to_code(&initialize(alloc, free, size))
}

/// Install a C reporter, or restore the default with null.
#[unsafe(no_mangle)]
pub extern "C" fn ramcompat_set_reporter(reporter: Option<ReporterFn>) {
    *C_REPORTER.write() = reporter;
    set_reporter(reporter.map(|_| forward_to_c as fn(&FailReport<'_>)));
}

fn with_geometry<T>(out: *mut T, f: impl FnOnce(&PageGeometry) -> Result<T, ReplyCode>) -> c_int {
    if out.is_null() {
        return ReplyCode::Disallowed.code();
    }
    let Some(shim) = shim() else {
        return ReplyCode::Inconsistent.code();
    };
    let result = f(shim.platform().geometry()).map(|v| {
        // SAFETY: `out` is non-null and writable per the caller's contract.
        unsafe { out.write(v) };
    });
    reply_to_code(&result)
}

/// # Safety
/// `out` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_pagesize(out: *mut usize) -> c_int {
    with_geometry(out, |g| Ok(g.page_size()))
}

/// # Safety
/// `out` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_mmapgran(out: *mut usize) -> c_int {
    with_geometry(out, |g| Ok(g.mmap_granularity()))
}

/// Store 1 in `*out` when `ptr` is page aligned, else 0.
///
/// # Safety
/// `out` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_ispage(out: *mut c_int, ptr: *const c_void) -> c_int {
    with_geometry(out, |g| Ok(c_int::from(g.is_page_aligned(ptr))))
}

/// Store the start of the page holding `ptr` in `*out`. Null is `Disallowed`.
///
/// # Safety
/// `out` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_getpage(out: *mut *mut c_void, ptr: *const c_void) -> c_int {
    with_geometry(out, |g| {
        g.containing_page(ptr).map(|page| page.cast_mut().cast())
    })
}
