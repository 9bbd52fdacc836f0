//! Size-class slab pool.
//!
//! Each class owns slabs of `mmap`'d memory carved into equal slots. A slab
//! registry keyed by base address answers "which slab holds this pointer"
//! for `query`/`discard`, so provenance is decided from the pointer alone.
//! Slabs are never returned to the system while the pool is alive.
//!
//! Lock order: class lock, then registry. `query` and `discard` drop the
//! registry read lock before taking a class lock.

use std::collections::{BTreeMap, HashSet};
use std::ptr::NonNull;

use parking_lot::{Mutex, RwLock};

use super::PrimaryAllocator;
use super::size_class::{NUM_CLASSES, class_index, class_size};
use crate::fail::FirstError;
use crate::log::{LogEvent, LogLevel};
use crate::platform::PageGeometry;
use crate::reply::{Reply, ReplyCode};

/// Target slab length before rounding to the mmap granularity.
pub const SLAB_TARGET_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
struct SlabInfo {
    len: usize,
    class: usize,
}

#[derive(Debug, Default)]
struct ClassPool {
    free: Vec<usize>,
    live: HashSet<usize>,
}

/// Primary allocator serving 16 B to 2 KiB requests from per-class slabs.
#[derive(Debug)]
pub struct SlabPool {
    slab_len: usize,
    classes: [Mutex<ClassPool>; NUM_CLASSES],
    slabs: RwLock<BTreeMap<usize, SlabInfo>>,
}

impl SlabPool {
    /// Create an empty pool whose slabs are sized for `geometry`.
    pub fn new(geometry: &PageGeometry) -> Reply<Self> {
        let Some(slab_len) = geometry.round_to_granularity(SLAB_TARGET_BYTES) else {
            crate::ram_check!(fail ReplyCode::Insane, "slab length overflows");
        };
        Ok(Self {
            slab_len,
            classes: std::array::from_fn(|_| Mutex::new(ClassPool::default())),
            slabs: RwLock::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub const fn slab_len(&self) -> usize {
        self.slab_len
    }

    /// Number of slabs mapped so far.
    #[must_use]
    pub fn slab_count(&self) -> usize {
        self.slabs.read().len()
    }

    /// Number of slots currently handed out.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.classes.iter().map(|c| c.lock().live.len()).sum()
    }

    fn grow(&self, class: usize, pool: &mut ClassPool) -> Reply<()> {
        let slot = class_size(class);
        // SAFETY: anonymous private mapping with no address hint.
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                self.slab_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(ReplyCode::ResourceFail);
        }
        let base = base as usize;
        let slots = self.slab_len / slot;
        pool.free.reserve(slots);
        pool.free
            .extend((0..slots).rev().map(|i| base + i * slot));
        self.slabs.write().insert(
            base,
            SlabInfo {
                len: self.slab_len,
                class,
            },
        );
        Ok(())
    }

    /// Find the class of `addr` and check it is a slot start.
    fn locate(&self, addr: usize) -> Reply<usize> {
        let (base, info) = {
            let slabs = self.slabs.read();
            match slabs.range(..=addr).next_back() {
                Some((&base, &info)) if addr < base + info.len => (base, info),
                _ => return Err(ReplyCode::NotFound),
            }
        };
        let slot = class_size(info.class);
        let offset = addr - base;
        crate::ram_check!(offset % slot == 0, ReplyCode::Disallowed);
        crate::ram_check!(offset / slot < info.len / slot, ReplyCode::Disallowed);
        Ok(info.class)
    }
}

impl PrimaryAllocator for SlabPool {
    fn acquire(&self, size: usize) -> Reply<NonNull<u8>> {
        let class = class_index(size).ok_or(ReplyCode::RangeFail)?;
        let mut pool = self.classes[class].lock();
        if pool.free.is_empty() {
            self.grow(class, &mut pool)?;
        }
        let Some(addr) = pool.free.pop() else {
            crate::ram_check!(fail ReplyCode::Corrupt, "fresh slab has no free slot");
        };
        pool.live.insert(addr);
        NonNull::new(addr as *mut u8).ok_or(ReplyCode::Corrupt)
    }

    fn query(&self, ptr: NonNull<u8>) -> Reply<usize> {
        let addr = ptr.as_ptr() as usize;
        let class = self.locate(addr)?;
        let live = self.classes[class].lock().live.contains(&addr);
        crate::ram_check!(live, ReplyCode::Disallowed);
        Ok(class_size(class))
    }

    fn discard(&self, ptr: NonNull<u8>) -> Reply<()> {
        let addr = ptr.as_ptr() as usize;
        let class = self.locate(addr)?;
        let mut pool = self.classes[class].lock();
        let was_live = pool.live.remove(&addr);
        crate::ram_check!(was_live, ReplyCode::Disallowed);
        pool.free.push(addr);
        Ok(())
    }
}

fn unmap(base: usize, len: usize) -> Reply<()> {
    // SAFETY: callers pass regions mapped by `grow`; munmap rejects anything
    // it cannot unmap without touching other mappings.
    let rc = unsafe { libc::munmap(base as *mut libc::c_void, len) };
    crate::ram_check!(rc == 0, ReplyCode::CrtFail);
    Ok(())
}

/// Unmap every `(base, len)` region, attempting all of them. Returns the
/// first failure.
fn unmap_slabs(slabs: impl IntoIterator<Item = (usize, usize)>) -> Reply<()> {
    let mut first = FirstError::new();
    for (base, len) in slabs {
        first.step(unmap(base, len));
    }
    first.finish()
}

impl Drop for SlabPool {
    fn drop(&mut self) {
        let slabs = self.slabs.get_mut().iter().map(|(&base, info)| (base, info.len));
        if let Err(code) = unmap_slabs(slabs) {
            LogEvent::new(LogLevel::Error, "slab_pool", "unmap_failed")
                .size(self.slab_len)
                .reply(code)
                .emit();
        }
    }
}
