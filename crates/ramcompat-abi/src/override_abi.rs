//! Process allocator override (`override` feature).
//!
//! Exports the platform's malloc family names and forwards them to the shim.
//! Gated out of test builds: a test binary exporting `malloc` would route its
//! own allocator through the code under test.

use std::ffi::c_void;

use crate::malloc_abi::{ramcompat_calloc, ramcompat_free, ramcompat_malloc, ramcompat_realloc};

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    ramcompat_malloc(size)
}

/// # Safety
/// `ptr` must be null or a live pointer returned by this allocator.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    // SAFETY: forwarded caller contract.
    unsafe { ramcompat_free(ptr) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    ramcompat_calloc(count, size)
}

/// # Safety
/// `ptr` must be null or a live pointer returned by this allocator.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    unsafe { ramcompat_realloc(ptr, size) }
}
