//! Primary allocator contract and the bundled size-class pool.
//!
//! The router consumes a primary allocator only through three operations.
//! `RangeFail` from [`PrimaryAllocator::acquire`] and `NotFound` from
//! [`PrimaryAllocator::query`] are routing signals; any other failure from a
//! primary allocator is treated as corruption by the router.

pub mod size_class;
pub mod slab;

use std::ptr::NonNull;

use crate::reply::Reply;

/// Size-class limited pool allocator.
pub trait PrimaryAllocator: Send + Sync {
    /// Allocate at least `size` bytes, or `RangeFail` when no size class fits.
    fn acquire(&self, size: usize) -> Reply<NonNull<u8>>;

    /// Usable size of `ptr`, or `NotFound` if this allocator did not produce it.
    fn query(&self, ptr: NonNull<u8>) -> Reply<usize>;

    /// Return `ptr` to the pool, or `NotFound` if this allocator did not produce it.
    fn discard(&self, ptr: NonNull<u8>) -> Reply<()>;
}

impl<P: PrimaryAllocator + ?Sized> PrimaryAllocator for &P {
    fn acquire(&self, size: usize) -> Reply<NonNull<u8>> {
        (**self).acquire(size)
    }

    fn query(&self, ptr: NonNull<u8>) -> Reply<usize> {
        (**self).query(ptr)
    }

    fn discard(&self, ptr: NonNull<u8>) -> Reply<()> {
        (**self).discard(ptr)
    }
}
