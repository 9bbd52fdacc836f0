//! Compatibility router: malloc-family semantics over two backends.
//!
//! Each call is a one-shot routing decision. Allocation asks the primary pool
//! first and falls back to the supplemental allocator on `RangeFail`.
//! Release, resize and size queries decide provenance after the fact by
//! asking the primary pool about the pointer: `NotFound` means the
//! supplemental allocator owns it.
//!
//! Replies other than `RangeFail`/`NotFound` from a provenance test or from
//! discarding a pointer the pool just claimed mean the pool's bookkeeping is
//! corrupt, and end the process through [`crate::fail::fatal`].

use std::ptr::NonNull;

use crate::fail::fatal_with;
use crate::log::{LogEvent, LogLevel};
use crate::metrics::RouterMetrics;
use crate::platform::Platform;
use crate::primary::PrimaryAllocator;
use crate::reply::{Reply, ReplyCode};
use crate::supplemental::{SupplementalAllocator, SupplementalFns};

/// Which backend owns a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Produced by the primary pool; carries its usable size.
    Primary(usize),
    Supplemental,
}

/// Routes malloc-family calls between a primary pool and a supplemental allocator.
#[derive(Debug)]
pub struct Router<P, S = SupplementalFns> {
    platform: Platform<S>,
    primary: P,
    metrics: RouterMetrics,
}

impl<P: PrimaryAllocator, S: SupplementalAllocator> Router<P, S> {
    pub fn new(platform: Platform<S>, primary: P) -> Self {
        Self {
            platform,
            primary,
            metrics: RouterMetrics::new(),
        }
    }

    #[must_use]
    pub const fn platform(&self) -> &Platform<S> {
        &self.platform
    }

    #[must_use]
    pub const fn primary(&self) -> &P {
        &self.primary
    }

    #[must_use]
    pub const fn metrics(&self) -> &RouterMetrics {
        &self.metrics
    }

    fn supplemental_alloc(&self, size: usize) -> Reply<NonNull<u8>> {
        let ptr = self.platform.supplemental().alloc(size);
        match NonNull::new(ptr) {
            Some(ptr) => {
                RouterMetrics::inc(&self.metrics.supplemental_acquires);
                Ok(ptr)
            }
            None => {
                LogEvent::new(LogLevel::Warn, "allocate", "supplemental_exhausted")
                    .size(size)
                    .reply(ReplyCode::ResourceFail)
                    .emit();
                Err(ReplyCode::ResourceFail)
            }
        }
    }

    /// Zero-size request, answered by the supplemental allocator as it sees
    /// fit. `None` is the backend returning null, which is not a failure.
    pub fn allocate_empty(&self) -> Option<NonNull<u8>> {
        RouterMetrics::inc(&self.metrics.zero_size_routes);
        LogEvent::new(LogLevel::Trace, "allocate", "zero_size_route").emit();
        let ptr = NonNull::new(self.platform.supplemental().alloc(0));
        if ptr.is_some() {
            RouterMetrics::inc(&self.metrics.supplemental_acquires);
        }
        ptr
    }

    /// Allocate `size` bytes.
    ///
    /// Zero-size requests go straight to the supplemental allocator; a null
    /// answer there has no pointer to return and reads as `ResourceFail`
    /// (see [`Self::allocate_empty`]).
    pub fn allocate(&self, size: usize) -> Reply<NonNull<u8>> {
        if size == 0 {
            return self.allocate_empty().ok_or(ReplyCode::ResourceFail);
        }
        match self.primary.acquire(size) {
            Ok(ptr) => {
                RouterMetrics::inc(&self.metrics.primary_acquires);
                Ok(ptr)
            }
            Err(ReplyCode::RangeFail) => {
                RouterMetrics::inc(&self.metrics.range_fallbacks);
                LogEvent::new(LogLevel::Debug, "allocate", "range_fallback")
                    .size(size)
                    .reply(ReplyCode::RangeFail)
                    .emit();
                self.supplemental_alloc(size)
            }
            Err(code) => {
                LogEvent::new(LogLevel::Warn, "allocate", "primary_failed")
                    .size(size)
                    .reply(code)
                    .emit();
                Err(code)
            }
        }
    }

    fn corrupt(&self, symbol: &str, ptr: *const u8, code: ReplyCode, why: &str) -> ! {
        fatal_with(
            LogEvent::new(LogLevel::Error, symbol, "primary_corrupt")
                .addr(ptr)
                .reply(code)
                .details(why),
            why,
        )
    }

    /// Decide which backend owns `ptr`.
    ///
    /// Any primary reply other than success or `NotFound` is fatal.
    pub fn provenance(&self, ptr: NonNull<u8>, symbol: &str) -> Provenance {
        match self.primary.query(ptr) {
            Ok(size) => Provenance::Primary(size),
            Err(ReplyCode::NotFound) => Provenance::Supplemental,
            Err(code) => self.corrupt(
                symbol,
                ptr.as_ptr(),
                code,
                "primary allocator rejected a provenance query",
            ),
        }
    }

    /// Release `ptr`. Null is forwarded to the supplemental allocator.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this router, and no
    /// other thread may be operating on it.
    pub unsafe fn release(&self, ptr: *mut u8) {
        let Some(nn) = NonNull::new(ptr) else {
            // SAFETY: freeing null is always permitted.
            unsafe { self.platform.supplemental().free(ptr) };
            return;
        };
        match self.provenance(nn, "release") {
            Provenance::Primary(_) => {
                if let Err(code) = self.primary.discard(nn) {
                    self.corrupt(
                        "release",
                        ptr,
                        code,
                        "primary allocator failed to discard a pointer it owns",
                    );
                }
                RouterMetrics::inc(&self.metrics.primary_releases);
            }
            Provenance::Supplemental => {
                LogEvent::new(LogLevel::Trace, "release", "supplemental_release")
                    .addr(ptr)
                    .emit();
                // SAFETY: the primary pool disowns `ptr`, so the caller's
                // contract makes it a live supplemental allocation.
                unsafe { self.platform.supplemental().free(ptr) };
                RouterMetrics::inc(&self.metrics.supplemental_releases);
            }
        }
    }

    /// Usable size of `ptr`; zero for null.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer returned by this router.
    pub unsafe fn size_of(&self, ptr: *const u8) -> Reply<usize> {
        RouterMetrics::inc(&self.metrics.size_queries);
        let Some(nn) = NonNull::new(ptr.cast_mut()) else {
            return Ok(0);
        };
        match self.provenance(nn, "size_of") {
            Provenance::Primary(size) => Ok(size),
            // SAFETY: forwarded caller contract.
            Provenance::Supplemental => unsafe { self.platform.supplemental().usable_size(ptr) },
        }
    }

    /// Resize `ptr` to `new_size` bytes, preserving the common prefix.
    ///
    /// Null degenerates to [`Self::allocate`]; `new_size == 0` releases `ptr`
    /// and yields `None`. On failure `ptr` is left untouched.
    ///
    /// # Safety
    /// Same contract as [`Self::release`].
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Reply<Option<NonNull<u8>>> {
        if ptr.is_null() {
            return self.allocate(new_size).map(Some);
        }
        if new_size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.release(ptr) };
            return Ok(None);
        }
        RouterMetrics::inc(&self.metrics.resizes);
        // SAFETY: forwarded caller contract.
        let old_size = unsafe { self.size_of(ptr) }?;
        let fresh = self.allocate(new_size)?;
        // SAFETY: both regions are live for at least `min(old, new)` bytes;
        // `copy` tolerates overlap.
        unsafe {
            std::ptr::copy(ptr, fresh.as_ptr(), old_size.min(new_size));
            self.release(ptr);
        }
        Ok(Some(fresh))
    }

    /// Allocate `count * size` zeroed bytes.
    ///
    /// An overflowing product fails with `ResourceFail` without allocating.
    pub fn zeroed_allocate(&self, count: usize, size: usize) -> Reply<NonNull<u8>> {
        let Some(total) = count.checked_mul(size) else {
            LogEvent::new(LogLevel::Warn, "zeroed_allocate", "size_overflow")
                .size(count)
                .reply(ReplyCode::ResourceFail)
                .emit();
            return Err(ReplyCode::ResourceFail);
        };
        let ptr = self.allocate(total)?;
        // SAFETY: `ptr` is a fresh allocation of at least `total` bytes.
        unsafe { ptr.as_ptr().write_bytes(0, total) };
        Ok(ptr)
    }
}
