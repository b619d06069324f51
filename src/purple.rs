//! The purple buffer
//!
//! Records objects whose reference count dropped since the last collection
//! ("purple" objects): candidates for being part of a garbage cycle, plus
//! objects whose count reached zero and wait for the snow-white killer.
//!
//! Entries live in fixed-size blocks threaded onto a free list, so `put` and
//! `remove` are O(1) and a buffer that has been drained is refilled without
//! allocating.

use crate::participant::ObjectRef;
use crate::refcount::RefCount;
use std::fmt;
use std::ptr::NonNull;

/// Entries per purple buffer block
pub const PURPLE_BLOCK_SIZE: usize = 1024;

/// Stable handle of a purple buffer entry
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PurpleHandle(u32);

impl fmt::Debug for PurpleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "purple#{}", self.0)
    }
}

/// A suspected object
#[derive(Clone, Copy)]
pub struct PurpleEntry {
    pub object: ObjectRef,
    refcount: NonNull<RefCount>,
}

impl PurpleEntry {
    /// The live reference count of the buffered object
    ///
    /// Objects notify the buffer before they are destroyed, so the cell is
    /// valid for as long as the entry exists.
    pub fn refcount(&self) -> &RefCount {
        unsafe { self.refcount.as_ref() }
    }
}

impl fmt::Debug for PurpleEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PurpleEntry")
            .field("object", &self.object)
            .field("refcount", self.refcount())
            .finish()
    }
}

enum Slot {
    Free { next: Option<u32> },
    Used(PurpleEntry),
}

/// What a visitor wants done with the entry it was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Keep,
    Remove,
}

/// Block-allocated free list of suspect entries
pub struct PurpleBuffer {
    blocks: Vec<Vec<Slot>>,
    /// Used slots per block
    block_live: Vec<u32>,
    free_head: Option<u32>,
    len: usize,
}

impl PurpleBuffer {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            block_live: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    #[inline]
    fn slot(&self, handle: PurpleHandle) -> &Slot {
        let index = handle.0 as usize;
        &self.blocks[index / PURPLE_BLOCK_SIZE][index % PURPLE_BLOCK_SIZE]
    }

    #[inline]
    fn slot_mut(&mut self, handle: PurpleHandle) -> &mut Slot {
        let index = handle.0 as usize;
        &mut self.blocks[index / PURPLE_BLOCK_SIZE][index % PURPLE_BLOCK_SIZE]
    }

    fn grow(&mut self) {
        let base = self.blocks.len() * PURPLE_BLOCK_SIZE;
        let block = (0..PURPLE_BLOCK_SIZE)
            .map(|i| Slot::Free {
                next: if i + 1 < PURPLE_BLOCK_SIZE {
                    Some((base + i + 1) as u32)
                } else {
                    self.free_head
                },
            })
            .collect();
        self.blocks.push(block);
        self.block_live.push(0);
        self.free_head = Some(base as u32);
    }

    /// Record `object` and point its reference count at the new entry
    pub fn put(&mut self, object: ObjectRef, refcount: &RefCount) -> PurpleHandle {
        if self.free_head.is_none() {
            self.grow();
        }
        let Some(index) = self.free_head else {
            unreachable!("purple buffer grew without free slots");
        };
        let handle = PurpleHandle(index);
        let entry = PurpleEntry {
            object,
            refcount: NonNull::from(refcount),
        };
        let slot = self.slot_mut(handle);
        let Slot::Free { next } = *slot else {
            unreachable!("free list points at a used slot");
        };
        *slot = Slot::Used(entry);
        self.free_head = next;
        self.len += 1;
        self.block_live[index as usize / PURPLE_BLOCK_SIZE] += 1;
        refcount.set_purple_entry(handle);
        handle
    }

    /// Return an entry to the free list and clear the object's back-reference
    pub fn remove(&mut self, handle: PurpleHandle) -> Option<PurpleEntry> {
        let free_head = self.free_head;
        let slot = self.slot_mut(handle);
        let Slot::Used(entry) = *slot else {
            return None;
        };
        *slot = Slot::Free { next: free_head };
        self.free_head = Some(handle.0);
        self.len -= 1;
        self.block_live[handle.0 as usize / PURPLE_BLOCK_SIZE] -= 1;
        entry.refcount().remove_from_purple_buffer();
        Some(entry)
    }

    pub fn get(&self, handle: PurpleHandle) -> Option<&PurpleEntry> {
        match self.slot(handle) {
            Slot::Used(entry) => Some(entry),
            Slot::Free { .. } => None,
        }
    }

    /// Show every live entry to `visitor`, removing those it rejects
    ///
    /// The visitor must not call back into the buffer; use [`handles`] and
    /// revisit entries one at a time when the visit runs object callbacks.
    ///
    /// [`handles`]: PurpleBuffer::handles
    pub fn visit_entries(&mut self, mut visitor: impl FnMut(&PurpleEntry) -> Visit) {
        for handle in self.handles() {
            let Some(entry) = self.get(handle).copied() else {
                continue;
            };
            if visitor(&entry) == Visit::Remove {
                self.remove(handle);
            }
        }
    }

    /// Snapshot of the handles of all live entries
    ///
    /// Empty blocks are skipped, and the walk stops once every live entry has
    /// been found.
    pub fn handles(&self) -> Vec<PurpleHandle> {
        let mut handles = Vec::with_capacity(self.len);
        for (b, block) in self.blocks.iter().enumerate() {
            if handles.len() == self.len {
                break;
            }
            if self.block_live[b] == 0 {
                continue;
            }
            for (i, slot) in block.iter().enumerate() {
                if matches!(slot, Slot::Used(_)) {
                    handles.push(PurpleHandle((b * PURPLE_BLOCK_SIZE + i) as u32));
                }
            }
        }
        handles
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots across all blocks
    pub fn capacity(&self) -> usize {
        self.blocks.len() * PURPLE_BLOCK_SIZE
    }

    /// Drop every entry, clearing the objects' purple state
    pub fn clear(&mut self) {
        self.visit_entries(|_| Visit::Remove);
        debug_assert_eq!(self.len, 0);
    }

    /// Release all blocks. Only valid when the buffer is empty.
    pub fn free_blocks(&mut self) {
        debug_assert!(self.is_empty(), "freeing purple blocks with live entries");
        if self.is_empty() {
            self.blocks = Vec::new();
            self.block_live = Vec::new();
            self.free_head = None;
        }
    }
}

impl Default for PurpleBuffer {
    fn default() -> Self {
        Self::new()
    }
}
