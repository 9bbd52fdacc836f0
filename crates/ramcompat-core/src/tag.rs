//! Lazily materialized per-allocation tags.
//!
//! Tags live in an external table keyed by pointer address, so allocations
//! carry no header and either backend's pointers can be tagged. The table is
//! guarded by a mutex, but the caller's factory runs outside it: two threads
//! racing to tag the same new pointer may both run their factory, and the
//! second to reach the table discards its value and returns the first one.
//!
//! Table storage may allocate and free while the lock is held. Under an
//! override build those calls re-enter the shim; [`TagTable::remove_if_unlocked`]
//! lets such a reentrant release drop a tag without locking the table twice.

use std::cell::Cell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use parking_lot::{Mutex, MutexGuard};

use crate::reply::Reply;

/// Metadata attached to one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<V> {
    owner: usize,
    byte_length: usize,
    value: V,
}

impl<V> Tag<V> {
    /// Address of the allocation this tag describes.
    #[must_use]
    pub const fn owner(&self) -> usize {
        self.owner
    }

    /// Allocation size when the tag was created.
    #[must_use]
    pub const fn byte_length(&self) -> usize {
        self.byte_length
    }

    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }
}

/// How [`TagTable::get_or_create`] produced its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSource {
    /// An existing tag was returned; no factory ran.
    Cached,
    /// The factory ran and its value was stored.
    Created,
    /// The factory ran but another caller stored first; its value won.
    LostRace,
}

thread_local! {
    static TABLE_LOCKS_HELD: Cell<u32> = const { Cell::new(0) };
}

/// Table lock that records on the owning thread that it is held.
struct Locked<'a, V> {
    entries: MutexGuard<'a, HashMap<usize, Tag<V>>>,
}

impl<V> Deref for Locked<'_, V> {
    type Target = HashMap<usize, Tag<V>>;

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl<V> DerefMut for Locked<'_, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}

impl<V> Drop for Locked<'_, V> {
    fn drop(&mut self) {
        TABLE_LOCKS_HELD.with(|held| held.set(held.get().saturating_sub(1)));
    }
}

/// True while the calling thread holds some tag table's lock.
#[must_use]
pub fn table_lock_held() -> bool {
    TABLE_LOCKS_HELD.with(Cell::get) > 0
}

/// Pointer-keyed tag storage.
#[derive(Debug)]
pub struct TagTable<V> {
    entries: Mutex<HashMap<usize, Tag<V>>>,
}

impl<V> Default for TagTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TagTable<V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Locked<'_, V> {
        let entries = self.entries.lock();
        TABLE_LOCKS_HELD.with(|held| held.set(held.get() + 1));
        Locked { entries }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop the tag of `ptr`, returning it if one existed.
    pub fn remove(&self, ptr: *const u8) -> Option<Tag<V>> {
        self.lock().remove(&(ptr as usize))
    }

    /// [`Self::remove`], skipped when the calling thread already holds a
    /// table lock. Memory released from under the lock is table storage,
    /// which is never tagged.
    pub fn remove_if_unlocked(&self, ptr: *const u8) -> Option<Tag<V>> {
        if table_lock_held() {
            return None;
        }
        self.remove(ptr)
    }

    /// Put back a tag taken with [`Self::remove`], unless the slot was
    /// filled again in the meantime.
    pub fn restore(&self, tag: Tag<V>) {
        self.lock().entry(tag.owner).or_insert(tag);
    }
}

impl<V: Clone> TagTable<V> {
    /// Cached value for `ptr`, if tagged.
    #[must_use]
    pub fn lookup(&self, ptr: *const u8) -> Option<V> {
        self.lock()
            .get(&(ptr as usize))
            .map(|tag| tag.value.clone())
    }

    /// Return the tag value of `ptr`, materializing it on first use.
    ///
    /// `byte_length` is consulted only when no tag exists. A failure from it
    /// or from `factory` is returned unchanged and leaves no entry behind, so
    /// a later call may retry.
    pub fn get_or_create<L, F>(
        &self,
        ptr: NonNull<u8>,
        byte_length: L,
        factory: F,
    ) -> Reply<(V, TagSource)>
    where
        L: FnOnce() -> Reply<usize>,
        F: FnOnce(NonNull<u8>, usize) -> Reply<V>,
    {
        let addr = ptr.as_ptr() as usize;
        if let Some(tag) = self.lock().get(&addr) {
            return Ok((tag.value.clone(), TagSource::Cached));
        }

        let len = byte_length()?;
        let value = factory(ptr, len)?;

        match self.lock().entry(addr) {
            Entry::Occupied(winner) => Ok((winner.get().value.clone(), TagSource::LostRace)),
            Entry::Vacant(slot) => {
                slot.insert(Tag {
                    owner: addr,
                    byte_length: len,
                    value: value.clone(),
                });
                Ok((value, TagSource::Created))
            }
        }
    }
}
