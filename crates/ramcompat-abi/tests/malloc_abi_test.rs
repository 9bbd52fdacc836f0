use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use ramcompat_abi::bootstrap_abi::{
    ramcompat_getpage, ramcompat_initialize, ramcompat_ispage, ramcompat_pagesize,
    ramcompat_set_reporter,
};
use ramcompat_abi::errno::{get_errno, set_errno};
use ramcompat_abi::malloc_abi::{
    ramcompat_calloc, ramcompat_free, ramcompat_malloc, ramcompat_msize, ramcompat_realloc,
};
use ramcompat_abi::tag_abi::ramcompat_tag;
use ramcompat_core::ReplyCode;

fn ensure_initialized() {
    let rc = ramcompat_initialize(None, None, None);
    assert!(
        rc == 0 || rc == ReplyCode::Unsupported.code(),
        "unexpected initialize reply {rc}"
    );
}

#[test]
fn scenario_write_resize_release() {
    ensure_initialized();
    let mut size = 0usize;
    // SAFETY: each pointer is live when touched and released once.
    unsafe {
        let p = ramcompat_malloc(8);
        assert!(!p.is_null());
        assert_eq!(ramcompat_msize(&mut size, p), 0);
        assert!(size >= 8);
        p.cast::<u8>().write_bytes(0x2A, 8);
        let q = ramcompat_realloc(p, 16);
        assert!(!q.is_null());
        let head = std::slice::from_raw_parts(q.cast::<u8>(), 8);
        assert_eq!(head, &[0x2A; 8]);
        ramcompat_free(q);
    }
}

#[test]
fn zero_size_and_null_conventions() {
    ensure_initialized();
    let mut size = 99usize;
    // SAFETY: null and fresh pointers only.
    unsafe {
        ramcompat_free(ptr::null_mut());
        assert_eq!(ramcompat_msize(&mut size, ptr::null()), 0);
        assert_eq!(size, 0);
        let z = ramcompat_malloc(0);
        assert!(!z.is_null());
        assert_eq!(ramcompat_realloc(z, 0), ptr::null_mut());
        let fresh = ramcompat_realloc(ptr::null_mut(), 24);
        assert!(!fresh.is_null());
        ramcompat_free(fresh);
        assert_eq!(
            ramcompat_msize(ptr::null_mut(), ptr::null()),
            ReplyCode::Disallowed.code()
        );
    }
}

#[test]
fn failures_return_null_and_set_errno() {
    ensure_initialized();
    set_errno(0);
    assert!(ramcompat_calloc(usize::MAX, 16).is_null());
    assert_eq!(get_errno(), ReplyCode::ResourceFail.code());

    set_errno(0);
    assert!(ramcompat_malloc(usize::MAX).is_null());
    assert_eq!(get_errno(), ReplyCode::ResourceFail.code());

    // SAFETY: `p` stays live across the failed resize and is released once.
    unsafe {
        let p = ramcompat_malloc(32);
        p.cast::<u8>().write_bytes(7, 32);
        set_errno(0);
        assert!(ramcompat_realloc(p, usize::MAX).is_null());
        assert_eq!(get_errno(), ReplyCode::ResourceFail.code());
        assert_eq!(*p.cast::<u8>(), 7);
        ramcompat_free(p);
    }
}

#[test]
fn calloc_zeroes_large_and_small() {
    ensure_initialized();
    for (count, size) in [(4, 8), (1, 1), (512, 64), (3, 1000)] {
        let p = ramcompat_calloc(count, size);
        assert!(!p.is_null());
        // SAFETY: `p` holds `count * size` bytes.
        unsafe {
            let bytes = std::slice::from_raw_parts(p.cast::<u8>(), count * size);
            assert!(bytes.iter().all(|&b| b == 0), "{count}x{size}");
            ramcompat_free(p);
        }
    }
}

static FACTORY_RUNS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn length_factory(
    out: *mut *mut c_void,
    _bytes: *const c_void,
    len: usize,
    ctx: *mut c_void,
) -> c_int {
    FACTORY_RUNS.fetch_add(1, Ordering::SeqCst);
    // SAFETY: `out` is provided by the shim and writable.
    unsafe { *out = (ctx as usize + len) as *mut c_void };
    0
}

unsafe extern "C" fn failing_factory(
    _out: *mut *mut c_void,
    _bytes: *const c_void,
    _len: usize,
    _ctx: *mut c_void,
) -> c_int {
    ReplyCode::ResourceFail.code()
}

unsafe extern "C" fn bogus_factory(
    _out: *mut *mut c_void,
    _bytes: *const c_void,
    _len: usize,
    _ctx: *mut c_void,
) -> c_int {
    -77
}

#[test]
fn tag_factory_runs_once_and_failures_are_retryable() {
    ensure_initialized();
    let mut a: *mut c_void = ptr::null_mut();
    let mut b: *mut c_void = ptr::null_mut();
    // SAFETY: `p` is live until freed; out-pointers are locals.
    unsafe {
        let p = ramcompat_malloc(48);
        assert_eq!(
            ramcompat_tag(&mut a, p, Some(failing_factory), ptr::null_mut()),
            ReplyCode::ResourceFail.code()
        );
        assert!(a.is_null());
        assert_eq!(
            ramcompat_tag(&mut a, p, Some(bogus_factory), ptr::null_mut()),
            ReplyCode::Insane.code()
        );

        let before = FACTORY_RUNS.load(Ordering::SeqCst);
        assert_eq!(ramcompat_tag(&mut a, p, Some(length_factory), 0x1000 as *mut c_void), 0);
        assert_eq!(ramcompat_tag(&mut b, p, Some(length_factory), 0x2000 as *mut c_void), 0);
        assert_eq!(FACTORY_RUNS.load(Ordering::SeqCst) - before, 1);
        assert_eq!(a, b);
        assert_eq!(a as usize, 0x1000 + 48);

        assert_eq!(
            ramcompat_tag(ptr::null_mut(), p, Some(length_factory), ptr::null_mut()),
            ReplyCode::Disallowed.code()
        );
        assert_eq!(
            ramcompat_tag(&mut a, p, None, ptr::null_mut()),
            ReplyCode::Disallowed.code()
        );
        ramcompat_free(p);
    }
}

static REPORTS: Mutex<Vec<(c_int, String, bool)>> = parking_lot::const_mutex(Vec::new());

unsafe extern "C" fn recording_reporter(
    code: c_int,
    expr: *const c_char,
    function: *const c_char,
    _file: *const c_char,
    _line: c_int,
) {
    // SAFETY: the shim passes NUL-terminated strings valid for this call.
    let expr = unsafe { CStr::from_ptr(expr) }.to_string_lossy().into_owned();
    REPORTS.lock().push((code, expr, !function.is_null()));
}

#[test]
fn reporter_hook_sees_contract_failures() {
    ensure_initialized();
    ramcompat_set_reporter(Some(recording_reporter));
    let mut out: *mut c_void = ptr::null_mut();
    // SAFETY: null pointer is rejected before use.
    let rc = unsafe { ramcompat_tag(&mut out, ptr::null_mut(), Some(length_factory), ptr::null_mut()) };
    ramcompat_set_reporter(None);
    assert_eq!(rc, ReplyCode::Disallowed.code());
    let reports = REPORTS.lock();
    assert!(
        reports
            .iter()
            .any(|(code, expr, has_fn)| *code == rc && expr.contains("null") && *has_fn),
        "missing report: {reports:?}"
    );
}

#[test]
fn page_accessors_after_initialize() {
    ensure_initialized();
    let mut page_size = 0usize;
    let mut flag: c_int = -1;
    let mut page: *mut c_void = ptr::null_mut();
    // SAFETY: out-pointers are valid locals.
    unsafe {
        assert_eq!(ramcompat_pagesize(&mut page_size), 0);
        let aligned = (page_size * 3) as *const c_void;
        let inside = (page_size * 3 + 17) as *const c_void;
        assert_eq!(ramcompat_ispage(&mut flag, aligned), 0);
        assert_eq!(flag, 1);
        assert_eq!(ramcompat_ispage(&mut flag, inside), 0);
        assert_eq!(flag, 0);
        assert_eq!(ramcompat_getpage(&mut page, inside), 0);
        assert_eq!(page as usize, page_size * 3);
        assert_eq!(
            ramcompat_getpage(&mut page, ptr::null()),
            ReplyCode::Disallowed.code()
        );
    }
}

unsafe extern "C" fn ctx_factory(
    out: *mut *mut c_void,
    _bytes: *const c_void,
    _len: usize,
    ctx: *mut c_void,
) -> c_int {
    // SAFETY: `out` is provided by the shim and writable.
    unsafe { *out = ctx };
    0
}

unsafe extern "C" fn freeing_factory(
    out: *mut *mut c_void,
    _bytes: *const c_void,
    _len: usize,
    ctx: *mut c_void,
) -> c_int {
    // SAFETY: `ctx` is a live allocation handed over by the test.
    unsafe {
        ramcompat_free(ctx);
        *out = 0x3333 as *mut c_void;
    }
    0
}

#[test]
fn free_inside_factory_drops_tag_of_freed_pointer() {
    ensure_initialized();
    let mut value: *mut c_void = ptr::null_mut();
    // SAFETY: `p` is freed exactly once by the factory; `q` and `r` are live
    // until freed below.
    unsafe {
        let p = ramcompat_malloc(32);
        assert_eq!(ramcompat_tag(&mut value, p, Some(ctx_factory), 0x1111 as *mut c_void), 0);
        assert_eq!(value as usize, 0x1111);

        let q = ramcompat_malloc(32);
        assert_eq!(ramcompat_tag(&mut value, q, Some(freeing_factory), p), 0);
        assert_eq!(value as usize, 0x3333);

        let r = ramcompat_malloc(32);
        let recycled = r == p;
        assert_eq!(
            ramcompat_tag(&mut value, r, Some(ctx_factory), 0x2222 as *mut c_void),
            0
        );
        assert_eq!(value as usize, 0x2222, "recycled={recycled}");
        ramcompat_free(r);
        ramcompat_free(q);
    }
}
