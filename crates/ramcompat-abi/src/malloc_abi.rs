//! malloc-family entry points (`ramcompat_malloc`, `ramcompat_free`,
//! `ramcompat_calloc`, `ramcompat_realloc`, `ramcompat_msize`).
//!
//! Before `ramcompat_initialize` every call goes to the native allocator.
//! A call that arrives while the same thread is already inside the shim
//! (bookkeeping allocations under an override build) allocates from the
//! supplemental allocator directly. Reentrant releases still drop the
//! pointer's tag unless the thread is inside the tag table itself, so no
//! shim lock is ever taken twice by one thread.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use ramcompat_core::reply::reply_to_code;
use ramcompat_core::supplemental::{native_alloc, native_free, native_size_query};
use ramcompat_core::{ReplyCode, SupplementalAllocator};

use crate::errno::set_reply;
use crate::state::{Shim, enter_allocator_reentry_guard, shim};

#[inline]
fn null_with(code: ReplyCode) -> *mut c_void {
    set_reply(code);
    ptr::null_mut()
}

/// Zero-size answer: whatever the backend returned, null included, with
/// errno untouched.
#[inline]
fn empty_out(ptr: Option<NonNull<u8>>) -> *mut c_void {
    ptr.map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

#[inline]
fn out_ptr(result: ramcompat_core::Reply<NonNull<u8>>) -> *mut c_void {
    match result {
        Ok(p) => p.as_ptr().cast(),
        Err(code) => null_with(code),
    }
}

fn native_usable_size(ptr: *mut c_void) -> usize {
    match native_size_query() {
        // SAFETY: `ptr` is a live native allocation per the caller's contract.
        Ok(query) => unsafe { query(ptr) },
        Err(_) => 0,
    }
}

/// Resize using only the native allocator (pre-initialization path).
///
/// # Safety
/// `ptr` must be null or a live native allocation.
unsafe fn native_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        return native_alloc(size).cast();
    }
    if size == 0 {
        // SAFETY: forwarded caller contract.
        unsafe { native_free(ptr.cast()) };
        return ptr::null_mut();
    }
    let fresh = native_alloc(size);
    if fresh.is_null() {
        return null_with(ReplyCode::ResourceFail);
    }
    let keep = native_usable_size(ptr).min(size);
    // SAFETY: both regions are live for `keep` bytes.
    unsafe {
        ptr::copy(ptr.cast::<u8>(), fresh, keep);
        native_free(ptr.cast());
    }
    fresh.cast()
}

fn bypass_alloc(shim: &Shim, size: usize) -> *mut c_void {
    let p = shim.platform().supplemental().alloc(size);
    if p.is_null() && size != 0 {
        return null_with(ReplyCode::ResourceFail);
    }
    p.cast()
}

/// Resize on the reentrant path: never touches the primary pool's locks
/// for allocation. The old pointer's tag goes with it.
///
/// # Safety
/// `ptr` must be null or a live pointer from this shim.
unsafe fn bypass_realloc(shim: &Shim, ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        return bypass_alloc(shim, size);
    }
    if size == 0 {
        // SAFETY: forwarded caller contract.
        unsafe { shim.release_reentrant(ptr.cast()) };
        return ptr::null_mut();
    }
    // SAFETY: forwarded caller contract.
    let old = match unsafe { shim.size_of(ptr.cast()) } {
        Ok(n) => n,
        Err(code) => return null_with(code),
    };
    let fresh = bypass_alloc(shim, size);
    if fresh.is_null() {
        return fresh;
    }
    // SAFETY: both regions are live for `min(old, size)` bytes.
    unsafe {
        ptr::copy(ptr.cast::<u8>(), fresh.cast::<u8>(), old.min(size));
        shim.release_reentrant(ptr.cast());
    }
    fresh
}

/// Allocate `size` bytes. Null with errno set on failure.
#[unsafe(no_mangle)]
pub extern "C" fn ramcompat_malloc(size: usize) -> *mut c_void {
    let Some(shim) = shim() else {
        return native_alloc(size).cast();
    };
    let Some(_guard) = enter_allocator_reentry_guard() else {
        return bypass_alloc(shim, size);
    };
    if size == 0 {
        return empty_out(shim.allocate_empty());
    }
    out_ptr(shim.allocate(size))
}

/// Release `ptr`. Null is a no-op.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_free(ptr: *mut c_void) {
    let Some(shim) = shim() else {
        // SAFETY: forwarded caller contract.
        unsafe { native_free(ptr.cast()) };
        return;
    };
    let Some(_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: forwarded caller contract.
        unsafe { shim.release_reentrant(ptr.cast()) };
        return;
    };
    // SAFETY: forwarded caller contract.
    unsafe { shim.release(ptr.cast()) }
}

/// Allocate `count * size` zeroed bytes. An overflowing product fails.
#[unsafe(no_mangle)]
pub extern "C" fn ramcompat_calloc(count: usize, size: usize) -> *mut c_void {
    let Some(total) = count.checked_mul(size) else {
        return null_with(ReplyCode::ResourceFail);
    };
    let Some(shim) = shim() else {
        let p = native_alloc(total);
        if p.is_null() {
            return if total == 0 {
                ptr::null_mut()
            } else {
                null_with(ReplyCode::ResourceFail)
            };
        }
        // SAFETY: `p` holds `total` writable bytes.
        unsafe { p.write_bytes(0, total) };
        return p.cast();
    };
    let Some(_guard) = enter_allocator_reentry_guard() else {
        let p = bypass_alloc(shim, total);
        if !p.is_null() {
            // SAFETY: `p` holds `total` writable bytes.
            unsafe { p.cast::<u8>().write_bytes(0, total) };
        }
        return p;
    };
    if total == 0 {
        return empty_out(shim.allocate_empty());
    }
    out_ptr(shim.zeroed_allocate(count, size))
}

/// Resize `ptr` to `size` bytes. `size == 0` frees and returns null; on
/// failure `ptr` stays valid and null is returned with errno set.
///
/// # Safety
/// `ptr` must be null or a live pointer returned by this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(shim) = shim() else {
        // SAFETY: forwarded caller contract.
        return unsafe { native_realloc(ptr, size) };
    };
    let Some(_guard) = enter_allocator_reentry_guard() else {
        // SAFETY: forwarded caller contract.
        return unsafe { bypass_realloc(shim, ptr, size) };
    };
    if ptr.is_null() && size == 0 {
        return empty_out(shim.allocate_empty());
    }
    // SAFETY: forwarded caller contract.
    match unsafe { shim.reallocate(ptr.cast(), size) } {
        Ok(Some(p)) => p.as_ptr().cast(),
        Ok(None) => ptr::null_mut(),
        Err(code) => null_with(code),
    }
}

/// Store the usable size of `ptr` in `*out`. Returns 0 or a reply code.
///
/// # Safety
/// `out` must be writable; `ptr` must be null or a live pointer returned by
/// this library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ramcompat_msize(out: *mut usize, ptr: *const c_void) -> c_int {
    if out.is_null() {
        return ReplyCode::Disallowed.code();
    }
    let result = match shim() {
        None if ptr.is_null() => Ok(0),
        None => match native_usable_size(ptr.cast_mut()) {
            0 => Err(ReplyCode::CrtFail),
            n => Ok(n),
        },
        Some(shim) => {
            let _guard = enter_allocator_reentry_guard();
            // SAFETY: forwarded caller contract.
            unsafe { shim.size_of(ptr.cast()) }
        }
    };
    if let Ok(n) = result {
        // SAFETY: `out` is non-null and writable per the contract.
        unsafe { *out = n };
    }
    reply_to_code(&result)
}
