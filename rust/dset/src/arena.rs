//! Variable-length string storage shared by a dataset's string columns
//!
//! String cells do not hold their bytes inline. Each row of a string column
//! stores a fixed-size [`StrSlot`] descriptor pointing into a bump-allocated
//! [`StringArena`], so string columns keep the same uniform row stride as
//! numeric ones.
//!
//! Overwriting a slot reuses its storage when the new value fits, otherwise
//! it moves to fresh space at the end of the arena and the old region is
//! counted as free. Free space is only reclaimed by [`StringArena::compact`].

use crate::buffer::AlignedBuf;
use crate::error::{DatasetError, Result};
use crate::growth::{compact_capacity, GrowthPolicy};

/// Bytes occupied by one [`StrSlot`] in a column buffer.
pub const SLOT_WIDTH: usize = 16;

/// Smallest non-empty arena allocation.
const MIN_ARENA_BYTES: usize = 256;

/// Location of one string inside the arena.
///
/// The all-zero descriptor is the empty string with no storage, so freshly
/// zeroed column rows read back as `""`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StrSlot {
    pub offset: u64,
    pub len: u32,
    pub cap: u32,
}

impl StrSlot {
    pub const EMPTY: StrSlot = StrSlot {
        offset: 0,
        len: 0,
        cap: 0,
    };

    /// Decode a descriptor from its in-buffer representation.
    pub fn read(bytes: &[u8]) -> Self {
        let mut offset = [0u8; 8];
        let mut len = [0u8; 4];
        let mut cap = [0u8; 4];
        offset.copy_from_slice(&bytes[0..8]);
        len.copy_from_slice(&bytes[8..12]);
        cap.copy_from_slice(&bytes[12..16]);
        Self {
            offset: u64::from_ne_bytes(offset),
            len: u32::from_ne_bytes(len),
            cap: u32::from_ne_bytes(cap),
        }
    }

    pub fn write(self, bytes: &mut [u8]) {
        bytes[0..8].copy_from_slice(&self.offset.to_ne_bytes());
        bytes[8..12].copy_from_slice(&self.len.to_ne_bytes());
        bytes[12..16].copy_from_slice(&self.cap.to_ne_bytes());
    }

    fn range(self) -> std::ops::Range<usize> {
        let start = self.offset as usize;
        start..start + self.len as usize
    }
}

/// Outcome of rebinding a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub slot: StrSlot,
    /// The value moved to new storage instead of being written in place.
    pub relocated: bool,
}

#[derive(Debug, Default)]
pub struct StringArena {
    heap: AlignedBuf,
    used: usize,
    freed: usize,
}

impl StringArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocated bytes.
    pub fn capacity(&self) -> usize {
        self.heap.capacity()
    }

    /// Bytes handed out so far, live or freed.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Bytes previously handed out and no longer referenced.
    pub fn free_bytes(&self) -> usize {
        self.freed
    }

    /// Bytes reserved by live slots.
    pub fn live_bytes(&self) -> usize {
        self.used - self.freed
    }

    pub fn get(&self, slot: StrSlot) -> &str {
        if slot.len == 0 {
            return "";
        }
        // only whole `&str` values are ever copied in
        std::str::from_utf8(&self.heap.as_slice()[slot.range()]).unwrap_or_default()
    }

    /// Rebind `slot` to `value`.
    pub fn assign(&mut self, slot: StrSlot, value: &str, policy: &GrowthPolicy) -> Result<Assignment> {
        let len = u32::try_from(value.len()).map_err(|_| {
            DatasetError::AllocationFailure(format!(
                "string of {} bytes exceeds the per-cell limit",
                value.len()
            ))
        })?;

        if len <= slot.cap {
            let start = slot.offset as usize;
            let region = start..start + slot.cap as usize;
            let bytes = &mut self.heap.as_mut_slice()[region.clone()];
            bytes[..value.len()].copy_from_slice(value.as_bytes());
            self.heap.zero_range(start + value.len()..region.end);
            return Ok(Assignment {
                slot: StrSlot { len, ..slot },
                relocated: false,
            });
        }

        let offset = self.reserve(value.len(), policy)?;
        self.heap.as_mut_slice()[offset..offset + value.len()].copy_from_slice(value.as_bytes());
        self.release(slot);
        Ok(Assignment {
            slot: StrSlot {
                offset: offset as u64,
                len,
                cap: len,
            },
            relocated: true,
        })
    }

    /// Count a slot's storage as free (its owner no longer references it).
    pub fn release(&mut self, slot: StrSlot) {
        self.freed += slot.cap as usize;
    }

    fn reserve(&mut self, len: usize, policy: &GrowthPolicy) -> Result<usize> {
        let needed = self.used.checked_add(len).ok_or_else(|| {
            DatasetError::AllocationFailure("string arena size overflow".to_string())
        })?;
        if needed > self.heap.capacity() {
            let target = policy.grow(self.heap.capacity(), needed).max(MIN_ARENA_BYTES);
            self.heap.grow_to(target)?;
        }
        let offset = self.used;
        self.used = needed;
        Ok(offset)
    }

    /// Build a compacted copy of the arena holding only `slots`, in order.
    ///
    /// Returns the new arena together with the rebound descriptors (one per
    /// input slot, capacity trimmed to length). `self` is left untouched, so
    /// a failed allocation leaves the caller's state as it was.
    pub fn compact(&self, slots: &[StrSlot], shrink_to_fit: bool) -> Result<(StringArena, Vec<StrSlot>)> {
        let live: usize = slots.iter().map(|slot| slot.len as usize).sum();
        let capacity = compact_capacity(live, self.heap.capacity(), shrink_to_fit);

        let mut heap = AlignedBuf::with_capacity(capacity)?;
        let mut rebound = Vec::new();
        rebound.try_reserve_exact(slots.len())?;

        let mut cursor = 0usize;
        for slot in slots {
            if slot.len == 0 {
                rebound.push(StrSlot::EMPTY);
                continue;
            }
            let len = slot.len as usize;
            heap.as_mut_slice()[cursor..cursor + len]
                .copy_from_slice(&self.heap.as_slice()[slot.range()]);
            rebound.push(StrSlot {
                offset: cursor as u64,
                len: slot.len,
                cap: slot.len,
            });
            cursor += len;
        }

        Ok((
            StringArena {
                heap,
                used: cursor,
                freed: 0,
            },
            rebound,
        ))
    }

    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            heap: self.heap.try_clone()?,
            used: self.used,
            freed: self.freed,
        })
    }
}
