//! A short memory of recent releases, so that a bad `free()` can be pointed at
//! the `free()` that got there first.
//!
//! Entries age out silently. Nothing here is needed for correctness.

use serde::Serialize;

use crate::{serialize::serde_usize, site::Site};

/// Entries kept by default
pub const DEFAULT_FREE_HISTORY_LEN: usize = 256;

/// One past release: the pointer, the ledger slot it was tracked in, and who
/// released it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FreeHistoryEntry {
    #[serde(with = "serde_usize")]
    pub ptr: *mut u8,
    pub slot: usize,
    pub site: Site,
}

/// Fixed-capacity ring. The write position only ever increases; the slot
/// written is `pos % capacity`, so the oldest entry is overwritten first.
#[derive(Debug)]
pub struct FreeHistory {
    slots: Vec<Option<FreeHistoryEntry>>,
    write_pos: usize,
}

impl FreeHistory {
    /// # Panics
    ///
    /// If `capacity == 0`. The config is validated before we get here.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "free history needs at least one slot");
        Self {
            slots: vec![None; capacity],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Entries currently held
    pub fn len(&self) -> usize {
        self.write_pos.min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.write_pos == 0
    }

    pub fn push(&mut self, entry: FreeHistoryEntry) {
        let i = self.write_pos % self.capacity();
        self.slots[i] = Some(entry);
        self.write_pos += 1;
    }

    /// Newest to oldest
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &FreeHistoryEntry> + '_ {
        let cap = self.capacity();
        (0..self.len()).filter_map(move |back| {
            let pos = self.write_pos - 1 - back;
            self.slots[pos % cap].as_ref()
        })
    }

    /// The most recent release of `ptr` that is still remembered
    pub fn last_release_of(&self, ptr: *mut u8) -> Option<&FreeHistoryEntry> {
        self.iter_newest_first().find(|e| e.ptr == ptr)
    }
}
