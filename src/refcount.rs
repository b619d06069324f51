//! Cycle-collecting reference counts
//!
//! A `RefCount` is the per-object cell the collector cooperates with. Besides
//! the count itself it remembers whether the object is purple (its count
//! dropped since it was last looked at) and where its entry in the purple
//! buffer lives, so an object is buffered at most once.
//!
//! Decrementing never destroys the object directly. When the count drops, the
//! object is suspected; when it reaches zero it stays in the purple buffer as a
//! snow-white object until the collector deletes it.

use crate::collector::CycleCollector;
use crate::participant::ObjectRef;
use crate::purple::PurpleHandle;
use std::cell::Cell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Buffered {
    No,
    Yes(PurpleHandle),
    /// Being deleted by the snow-white killer; count changes are ignored
    Deleting,
}

/// Reference count of a cycle-collectable object
pub struct RefCount {
    count: Cell<usize>,
    purple: Cell<bool>,
    entry: Cell<Buffered>,
}

impl RefCount {
    pub const fn new(count: usize) -> Self {
        Self {
            count: Cell::new(count),
            purple: Cell::new(false),
            entry: Cell::new(Buffered::No),
        }
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.count.get()
    }

    /// Add a reference. Clears the purple mark.
    #[inline]
    pub fn incr(&self) -> usize {
        let count = self.count.get() + 1;
        self.count.set(count);
        self.purple.set(false);
        count
    }

    /// Drop a reference and suspect `obj` with `collector` unless it is
    /// already buffered
    ///
    /// `obj` must be the object owning this cell.
    pub fn decr(&self, obj: ObjectRef, collector: &CycleCollector) -> usize {
        let count = self.release();
        if self.entry.get() == Buffered::No {
            collector.suspect(obj);
        }
        count
    }

    /// Drop a reference without any collector involvement
    ///
    /// Used when no collector is around to hand the object to; the caller
    /// owns destruction once this returns zero.
    pub fn decr_untracked(&self) -> usize {
        self.release()
    }

    fn release(&self) -> usize {
        let count = self.count.get();
        debug_assert!(count > 0, "refcount underflow");
        let count = count.saturating_sub(1);
        self.count.set(count);
        if self.entry.get() != Buffered::Deleting {
            self.purple.set(true);
        }
        count
    }

    #[inline]
    pub fn is_purple(&self) -> bool {
        self.purple.get()
    }

    /// Whether the purple buffer (or the snow-white killer) currently owns an
    /// entry for this object
    #[inline]
    pub fn is_in_purple_buffer(&self) -> bool {
        self.entry.get() != Buffered::No
    }

    pub fn is_being_deleted(&self) -> bool {
        self.entry.get() == Buffered::Deleting
    }

    /// Clear the purple mark, keeping any buffer entry
    pub fn remove_purple(&self) {
        self.purple.set(false);
    }

    pub(crate) fn purple_entry(&self) -> Option<PurpleHandle> {
        match self.entry.get() {
            Buffered::Yes(handle) => Some(handle),
            _ => None,
        }
    }

    pub(crate) fn set_purple_entry(&self, handle: PurpleHandle) {
        self.entry.set(Buffered::Yes(handle));
        self.purple.set(true);
    }

    pub(crate) fn remove_from_purple_buffer(&self) {
        if self.entry.get() != Buffered::Deleting {
            self.entry.set(Buffered::No);
        }
        self.purple.set(false);
    }

    /// Pin the count so reference traffic during destruction cannot trigger a
    /// second deletion
    pub(crate) fn stabilize_for_deletion(&self) {
        self.count.set(1);
        self.purple.set(false);
        self.entry.set(Buffered::Deleting);
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for RefCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCount")
            .field("count", &self.count.get())
            .field("purple", &self.purple.get())
            .field("buffered", &self.is_in_purple_buffer())
            .finish()
    }
}
