//! The shim context: bootstrap state, router and tag table in one value.
//!
//! Built once and shared by reference. Releasing or moving an allocation
//! through the context also drops its tag, so a recycled address never
//! inherits a stale tag.

use std::ptr::NonNull;

use crate::log::{LogEvent, LogLevel};
use crate::metrics::RouterMetrics;
use crate::platform::Platform;
use crate::primary::PrimaryAllocator;
use crate::primary::slab::SlabPool;
use crate::reply::{Reply, ReplyCode};
use crate::router::Router;
use crate::supplemental::{SupplementalAllocator, SupplementalFns};
use crate::tag::{TagSource, TagTable};

/// Allocation shim context.
#[derive(Debug)]
pub struct Compat<P = SlabPool, S = SupplementalFns, V = usize> {
    router: Router<P, S>,
    tags: TagTable<V>,
}

impl<S: SupplementalAllocator, V> Compat<SlabPool, S, V> {
    /// Bootstrap with `supplemental` and a fresh slab pool sized for the
    /// running system.
    pub fn with_supplemental(supplemental: S) -> Reply<Self> {
        let platform = Platform::initialize(supplemental)?;
        let pool = SlabPool::new(platform.geometry())?;
        Ok(Self::new(Router::new(platform, pool)))
    }
}

impl<V> Compat<SlabPool, SupplementalFns, V> {
    /// Bootstrap with the native allocator as the supplemental backend.
    pub fn native() -> Reply<Self> {
        Self::with_supplemental(SupplementalFns::native()?)
    }
}

impl<P, S, V> Compat<P, S, V> {
    pub fn new(router: Router<P, S>) -> Self {
        Self {
            router,
            tags: TagTable::new(),
        }
    }

    #[must_use]
    pub const fn router(&self) -> &Router<P, S> {
        &self.router
    }

    #[must_use]
    pub const fn tags(&self) -> &TagTable<V> {
        &self.tags
    }
}

impl<P: PrimaryAllocator, S: SupplementalAllocator, V: Clone> Compat<P, S, V> {
    #[must_use]
    pub const fn platform(&self) -> &Platform<S> {
        self.router.platform()
    }

    #[must_use]
    pub const fn metrics(&self) -> &RouterMetrics {
        self.router.metrics()
    }

    pub fn allocate(&self, size: usize) -> Reply<NonNull<u8>> {
        self.router.allocate(size)
    }

    pub fn allocate_empty(&self) -> Option<NonNull<u8>> {
        self.router.allocate_empty()
    }

    pub fn zeroed_allocate(&self, count: usize, size: usize) -> Reply<NonNull<u8>> {
        self.router.zeroed_allocate(count, size)
    }

    /// Drop the tag of `ptr`, then release it.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer from this context, not in use by
    /// another thread.
    pub unsafe fn release(&self, ptr: *mut u8) {
        if self.tags.remove(ptr).is_some() {
            RouterMetrics::inc(&self.metrics().tags_released);
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.router.release(ptr) }
    }

    /// [`Self::release`] for a call made while the thread is already inside
    /// the shim. The tag is dropped unless this thread holds the tag table,
    /// in which case `ptr` is table storage and carries none.
    ///
    /// # Safety
    /// Same contract as [`Self::release`].
    pub unsafe fn release_reentrant(&self, ptr: *mut u8) {
        if self.tags.remove_if_unlocked(ptr).is_some() {
            RouterMetrics::inc(&self.metrics().tags_released);
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.router.release(ptr) }
    }

    /// Resize `ptr`. The old pointer's tag is dropped on success and kept
    /// when the resize fails.
    ///
    /// # Safety
    /// Same contract as [`Self::release`].
    pub unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Reply<Option<NonNull<u8>>> {
        let saved = if ptr.is_null() { None } else { self.tags.remove(ptr) };
        // SAFETY: forwarded caller contract.
        match unsafe { self.router.reallocate(ptr, new_size) } {
            Ok(out) => {
                if saved.is_some() {
                    RouterMetrics::inc(&self.metrics().tags_released);
                }
                Ok(out)
            }
            Err(code) => {
                if let Some(tag) = saved {
                    self.tags.restore(tag);
                }
                Err(code)
            }
        }
    }

    /// Usable size of `ptr`; zero for null.
    ///
    /// # Safety
    /// `ptr` must be null or a live pointer from this context.
    pub unsafe fn size_of(&self, ptr: *const u8) -> Reply<usize> {
        // SAFETY: forwarded caller contract.
        unsafe { self.router.size_of(ptr) }
    }

    /// Return the tag of `ptr`, running `factory` on the allocation's bytes
    /// if it has none yet.
    ///
    /// Null is `Disallowed`. A size that cannot be determined is `CrtFail`.
    /// Factory failures are returned as-is and create no tag.
    ///
    /// # Safety
    /// `ptr` must be a live pointer from this context.
    pub unsafe fn get_or_create_tag<F>(&self, ptr: *mut u8, factory: F) -> Reply<V>
    where
        F: FnOnce(NonNull<u8>, usize) -> Reply<V>,
    {
        let Some(nn) = NonNull::new(ptr) else {
            crate::ram_check!(fail ReplyCode::Disallowed, "tagged pointer is null");
        };
        let metrics = self.metrics();
        let length = || {
            // SAFETY: forwarded caller contract.
            unsafe { self.router.size_of(ptr) }.map_err(|_| ReplyCode::CrtFail)
        };
        let counted_factory = |p: NonNull<u8>, len: usize| {
            factory(p, len).inspect_err(|code| {
                RouterMetrics::inc(&metrics.factory_failures);
                LogEvent::new(LogLevel::Debug, "get_or_create_tag", "factory_failed")
                    .addr(p.as_ptr())
                    .size(len)
                    .reply(*code)
                    .emit();
            })
        };
        let (value, source) = self.tags.get_or_create(nn, length, counted_factory)?;
        match source {
            TagSource::Cached => RouterMetrics::inc(&metrics.tag_hits),
            TagSource::Created => RouterMetrics::inc(&metrics.tags_created),
            TagSource::LostRace => RouterMetrics::inc(&metrics.tag_races_lost),
        }
        Ok(value)
    }
}
