//! Process-wide shim instance and the allocator reentry guard.
//!
//! The shim is built once by [`initialize`]; a second call fails with
//! `Unsupported`. Initialization is not arbitrated between threads: it must
//! run during single-threaded start-up, before any other thread allocates.

use std::cell::Cell;
use std::ffi::c_void;
use std::sync::OnceLock;

use ramcompat_core::log::{LogEvent, LogLevel};
use ramcompat_core::supplemental::{AllocFn, FreeFn, SizeFn};
use ramcompat_core::{Compat, Reply, ReplyCode, SlabPool, SupplementalFns};

/// Opaque tag value handed back to C callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagValue(pub *mut c_void);

// SAFETY: the shim never dereferences tag values; they are stored and
// returned as plain addresses.
unsafe impl Send for TagValue {}
// SAFETY: see above.
unsafe impl Sync for TagValue {}

/// The concrete shim behind the C entry points.
pub type Shim = Compat<SlabPool, SupplementalFns, TagValue>;

static SHIM: OnceLock<Shim> = OnceLock::new();

/// The initialized shim, if any.
#[inline]
#[must_use]
pub fn shim() -> Option<&'static Shim> {
    SHIM.get()
}

/// Build the process-wide shim. Missing entry points default to the native
/// allocator.
pub fn initialize(
    alloc: Option<AllocFn>,
    free: Option<FreeFn>,
    size: Option<SizeFn>,
) -> Reply<&'static Shim> {
    if SHIM.get().is_some() {
        ramcompat_core::ram_check!(fail ReplyCode::Unsupported, "shim already initialized");
    }
    let supplemental = SupplementalFns::resolve(alloc, free, size)?;
    let built = Shim::with_supplemental(supplemental)?;
    let geometry = *built.platform().geometry();
    if SHIM.set(built).is_err() {
        ramcompat_core::ram_check!(fail ReplyCode::Unsupported, "shim initialized concurrently");
    }
    LogEvent::new(LogLevel::Info, "ramcompat_initialize", "initialized")
        .size(geometry.page_size())
        .emit();
    SHIM.get().ok_or(ReplyCode::Insane)
}

thread_local! {
    static ALLOCATOR_REENTRY_DEPTH: Cell<u32> = const { Cell::new(0) };
}

pub(crate) struct AllocatorReentryGuard;

impl Drop for AllocatorReentryGuard {
    fn drop(&mut self) {
        ALLOCATOR_REENTRY_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

/// `None` when the calling thread is already inside a shim entry point.
#[inline]
pub(crate) fn enter_allocator_reentry_guard() -> Option<AllocatorReentryGuard> {
    ALLOCATOR_REENTRY_DEPTH.with(|depth| {
        let current = depth.get();
        if current > 0 {
            None
        } else {
            depth.set(current + 1);
            Some(AllocatorReentryGuard)
        }
    })
}

/// Run `f` as if the calling thread were outside the shim, restoring the
/// reentry depth afterwards. Only valid while the thread holds no shim lock.
pub(crate) fn outside_reentry_guard<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(u32);

    impl Drop for Restore {
        fn drop(&mut self) {
            ALLOCATOR_REENTRY_DEPTH.with(|depth| depth.set(self.0));
        }
    }

    let _restore = Restore(ALLOCATOR_REENTRY_DEPTH.with(|depth| depth.replace(0)));
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_guard_nests_once() {
        let outer = enter_allocator_reentry_guard();
        assert!(outer.is_some());
        assert!(enter_allocator_reentry_guard().is_none());
        drop(outer);
        assert!(enter_allocator_reentry_guard().is_some());
    }

    #[test]
    fn suspended_guard_is_restored() {
        let outer = enter_allocator_reentry_guard();
        assert!(outer.is_some());
        let inner_entered = outside_reentry_guard(|| enter_allocator_reentry_guard().is_some());
        assert!(inner_entered);
        assert!(enter_allocator_reentry_guard().is_none());
        drop(outer);
        assert!(enter_allocator_reentry_guard().is_some());
    }

    #[test]
    fn second_initialize_is_unsupported() {
        let _ = initialize(None, None, None);
        assert!(shim().is_some());
        assert_eq!(
            initialize(None, None, None).err(),
            Some(ReplyCode::Unsupported)
        );
    }
}
