//! The table of every allocation we know about, plus the permanent records of
//! everything that went wrong.

use std::ptr;

use serde::Serialize;

use crate::{error::FatalError, serialize::serde_usize, site::Site};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    /// Nothing here, can be handed out again
    FreeSlot,
    /// A live allocation
    Allocated,
    /// The canary was broken when the buffer was released or resized. Never
    /// recycled.
    Overrun,
    FreeNull,
    ReallocNull,
    FreeNotAlloc,
    ReallocNotAlloc,
}

impl SlotState {
    /// Records created by a bad call rather than by an allocation
    pub const fn is_misuse(self) -> bool {
        matches!(
            self,
            Self::FreeNull | Self::ReallocNull | Self::FreeNotAlloc | Self::ReallocNotAlloc
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AllocRecord {
    pub state: SlotState,
    #[serde(with = "serde_usize")]
    pub ptr: *mut u8,
    /// User-visible bytes. Never includes the canary.
    pub size: usize,
    pub site: Site,
}

impl AllocRecord {
    pub const fn new(state: SlotState, ptr: *mut u8, size: usize, site: Site) -> Self {
        Self {
            state,
            ptr,
            size,
            site,
        }
    }

    const fn free_slot() -> Self {
        Self::new(SlotState::FreeSlot, ptr::null_mut(), 0, Site::unknown())
    }
}

/// A bounded arena of [`AllocRecord`]s, addressed by slot index.
///
/// Slots are handed out lowest-index-first by a linear scan. That is `O(n)`,
/// but `n` is bounded by `capacity` and this only ever runs in debug builds.
#[derive(Debug)]
pub struct Ledger {
    slots: Vec<AllocRecord>,
    capacity: usize,
}

impl Ledger {
    /// The whole table is reserved up front, so the ledger itself never goes
    /// back to the heap once the tracker is running.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots ever put into use. Slots are recycled but never
    /// returned, so this is the high-water mark of the table.
    pub fn high_water(&self) -> usize {
        self.slots.len()
    }

    /// Find the lowest [`SlotState::FreeSlot`] that isn't `avoid`, or append a
    /// new one.
    pub fn acquire(&mut self, avoid: Option<usize>) -> Result<usize, FatalError> {
        let reusable = self
            .slots
            .iter()
            .enumerate()
            .position(|(i, r)| r.state == SlotState::FreeSlot && Some(i) != avoid);
        if let Some(i) = reusable {
            return Ok(i);
        }
        if self.slots.len() >= self.capacity {
            return Err(FatalError::LedgerFull {
                capacity: self.capacity,
            });
        }
        self.slots.push(AllocRecord::free_slot());
        Ok(self.slots.len() - 1)
    }

    /// [`Ledger::acquire()`] a slot and put `record` in it
    pub fn insert(&mut self, record: AllocRecord, avoid: Option<usize>) -> Result<usize, FatalError> {
        let i = self.acquire(avoid)?;
        self.slots[i] = record;
        Ok(i)
    }

    /// The slot holding the live allocation at `ptr`, if there is one
    pub fn find_allocated(&self, ptr: *mut u8) -> Option<usize> {
        self.slots
            .iter()
            .position(|r| r.state == SlotState::Allocated && r.ptr == ptr)
    }

    /// Put slot `i` back up for grabs
    pub fn recycle(&mut self, i: usize) {
        self.slots[i] = AllocRecord::free_slot();
    }

    pub fn get(&self, i: usize) -> Option<&AllocRecord> {
        self.slots.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut AllocRecord> {
        self.slots.get_mut(i)
    }

    pub fn records(&self) -> &[AllocRecord] {
        &self.slots
    }

    /// Sum of the sizes of every live allocation. This is recomputed from
    /// scratch, so it can be checked against the running counter.
    pub fn allocated_bytes(&self) -> usize {
        self.slots
            .iter()
            .filter(|r| r.state == SlotState::Allocated)
            .map(|r| r.size)
            .sum()
    }
}
