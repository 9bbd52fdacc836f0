//! Supplemental (fallback) allocator strategy.
//!
//! The router hands every request the primary pool refuses to a
//! [`SupplementalAllocator`]. [`SupplementalFns`] adapts three C entry points
//! to the trait; any entry point not supplied is replaced by the platform's
//! native one of the same kind.
//!
//! On GNU targets the native allocator binds to `__libc_malloc` and
//! `__libc_free`, which stay on glibc even when an override build exports
//! `malloc`/`free` itself. The native size query is probed once through
//! `dlsym(RTLD_NEXT, "malloc_usable_size")`.

use std::ffi::c_void;
use std::sync::OnceLock;

use crate::reply::{Reply, ReplyCode};

/// C allocation entry point.
pub type AllocFn = unsafe extern "C" fn(usize) -> *mut c_void;
/// C release entry point.
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
/// C usable-size entry point.
pub type SizeFn = unsafe extern "C" fn(*mut c_void) -> usize;

/// General purpose allocator used whenever the primary pool cannot serve.
pub trait SupplementalAllocator: Send + Sync {
    /// Allocate `size` bytes. Null on failure. `size == 0` follows the
    /// backend's own semantics.
    fn alloc(&self, size: usize) -> *mut u8;

    /// Release `ptr`. Null is a no-op.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by [`Self::alloc`] and not
    /// released since.
    unsafe fn free(&self, ptr: *mut u8);

    /// Usable size of a live allocation. Fails with `CrtFail` when the
    /// backend cannot tell.
    ///
    /// # Safety
    /// `ptr` must be a live allocation of this allocator.
    unsafe fn usable_size(&self, ptr: *const u8) -> Reply<usize>;
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
unsafe extern "C" {
    fn __libc_malloc(size: usize) -> *mut c_void;
    fn __libc_free(ptr: *mut c_void);
}

unsafe extern "C" fn native_malloc_entry(size: usize) -> *mut c_void {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: direct call to the glibc allocator.
        unsafe { __libc_malloc(size) }
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        // SAFETY: direct call to the platform allocator.
        unsafe { libc::malloc(size) }
    }
}

unsafe extern "C" fn native_free_entry(ptr: *mut c_void) {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: caller passes null or a pointer from `native_malloc_entry`.
        unsafe { __libc_free(ptr) }
    }
    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        // SAFETY: caller passes null or a pointer from `native_malloc_entry`.
        unsafe { libc::free(ptr) }
    }
}

/// Allocate from the native allocator, bypassing any override.
#[must_use]
pub fn native_alloc(size: usize) -> *mut u8 {
    // SAFETY: plain allocation call; a null result is the failure signal.
    unsafe { native_malloc_entry(size).cast() }
}

/// Release memory obtained from [`native_alloc`].
///
/// # Safety
/// `ptr` must be null or come from [`native_alloc`] and not be released yet.
pub unsafe fn native_free(ptr: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { native_free_entry(ptr.cast()) }
}

static NATIVE_SIZE_QUERY: OnceLock<Option<SizeFn>> = OnceLock::new();

fn lookup_symbol(handle: *mut c_void, name: &std::ffi::CStr) -> Option<SizeFn> {
    // SAFETY: `name` is NUL-terminated; `handle` is a pseudo-handle.
    let sym = unsafe { libc::dlsym(handle, name.as_ptr()) };
    if sym.is_null() {
        None
    } else {
        // SAFETY: the resolved symbol is `size_t malloc_usable_size(void *)`.
        Some(unsafe { std::mem::transmute::<*mut c_void, SizeFn>(sym) })
    }
}

/// Resolve the native usable-size primitive (cached after the first probe).
pub fn native_size_query() -> Reply<SizeFn> {
    let resolved = NATIVE_SIZE_QUERY.get_or_init(|| {
        lookup_symbol(libc::RTLD_NEXT, c"malloc_usable_size")
            .or_else(|| lookup_symbol(libc::RTLD_DEFAULT, c"malloc_usable_size"))
    });
    match resolved {
        Some(f) => Ok(*f),
        None => crate::ram_check!(fail ReplyCode::CrtFail, "dlsym(malloc_usable_size)"),
    }
}

/// Supplemental allocator backed by three C entry points.
#[derive(Debug, Clone, Copy)]
pub struct SupplementalFns {
    alloc: AllocFn,
    free: FreeFn,
    size: SizeFn,
}

impl SupplementalFns {
    /// Fill any missing entry point with its native counterpart.
    ///
    /// The native size query is only probed when `size` is `None`; a failed
    /// probe fails with `CrtFail`.
    pub fn resolve(
        alloc: Option<AllocFn>,
        free: Option<FreeFn>,
        size: Option<SizeFn>,
    ) -> Reply<Self> {
        let size = match size {
            Some(f) => f,
            None => native_size_query()?,
        };
        Ok(Self {
            alloc: alloc.unwrap_or(native_malloc_entry),
            free: free.unwrap_or(native_free_entry),
            size,
        })
    }

    /// The platform's native allocator.
    pub fn native() -> Reply<Self> {
        Self::resolve(None, None, None)
    }
}

impl SupplementalAllocator for SupplementalFns {
    fn alloc(&self, size: usize) -> *mut u8 {
        // SAFETY: the entry point follows malloc's contract.
        unsafe { (self.alloc)(size).cast() }
    }

    unsafe fn free(&self, ptr: *mut u8) {
        // SAFETY: forwarded caller contract.
        unsafe { (self.free)(ptr.cast()) }
    }

    unsafe fn usable_size(&self, ptr: *const u8) -> Reply<usize> {
        // SAFETY: forwarded caller contract; the query does not write.
        let size = unsafe { (self.size)(ptr.cast_mut().cast()) };
        crate::ram_check!(size != 0, ReplyCode::CrtFail);
        Ok(size)
    }
}
