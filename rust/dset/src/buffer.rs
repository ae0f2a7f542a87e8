//! Owned, 16-byte aligned byte regions with explicit capacity
//!
//! Column buffers and the string arena sit on top of [`AlignedBuf`]. The
//! buffer only tracks how many bytes are allocated; the owner tracks how
//! many are in use. Newly allocated bytes are always zeroed, which is what
//! lets new rows appear zero-initialized without a separate fill pass.

use std::alloc::{self, Layout};
use std::fmt;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::slice;

use crate::error::{DatasetError, Result};

/// Alignment of every buffer; large enough for any [`crate::Element`].
pub const BUFFER_ALIGN: usize = 16;

#[repr(C, align(16))]
struct Align16([u8; BUFFER_ALIGN]);

pub struct AlignedBuf {
    ptr: NonNull<u8>,
    capacity: usize,
}

// The buffer exclusively owns its allocation.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

fn layout(capacity: usize) -> Result<Layout> {
    Layout::from_size_align(capacity, BUFFER_ALIGN).map_err(|_| {
        DatasetError::AllocationFailure(format!("{capacity} bytes exceeds the addressable size"))
    })
}

fn allocation_failure(capacity: usize) -> DatasetError {
    tracing::warn!(bytes = capacity, "buffer allocation failed");
    DatasetError::AllocationFailure(format!("could not allocate {capacity} bytes"))
}

impl AlignedBuf {
    /// An empty buffer that owns no allocation.
    pub const fn new() -> Self {
        Self {
            ptr: NonNull::<Align16>::dangling().cast(),
            capacity: 0,
        }
    }

    /// A zeroed buffer of exactly `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut buf = Self::new();
        buf.grow_to(capacity)?;
        Ok(buf)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for `capacity` initialized bytes, or dangling
        // and aligned with capacity 0.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }

    /// Grow to exactly `new_capacity` bytes, zeroing the added tail.
    ///
    /// A no-op when the buffer is already at least that large. On failure the
    /// buffer keeps its previous allocation and contents.
    pub fn grow_to(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity <= self.capacity {
            return Ok(());
        }
        let new_layout = layout(new_capacity)?;
        let raw = if self.capacity == 0 {
            // SAFETY: new_layout has a non-zero size.
            unsafe { alloc::alloc_zeroed(new_layout) }
        } else {
            let old_layout = layout(self.capacity)?;
            // SAFETY: ptr was allocated with old_layout; new size is valid for
            // the alignment (checked by `layout`).
            let raw = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_capacity) };
            if !raw.is_null() {
                // SAFETY: the region [capacity, new_capacity) belongs to the
                // new allocation.
                unsafe { ptr::write_bytes(raw.add(self.capacity), 0, new_capacity - self.capacity) };
            }
            raw
        };
        self.ptr = NonNull::new(raw).ok_or_else(|| allocation_failure(new_capacity))?;
        tracing::trace!(from = self.capacity, to = new_capacity, "buffer grown");
        self.capacity = new_capacity;
        Ok(())
    }

    /// Shrink to exactly `new_capacity` bytes, releasing the allocation at 0.
    ///
    /// Bytes past `new_capacity` are discarded. On failure the buffer keeps
    /// its previous allocation.
    pub fn shrink_to(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity >= self.capacity {
            return Ok(());
        }
        let old_layout = layout(self.capacity)?;
        if new_capacity == 0 {
            // SAFETY: ptr was allocated with old_layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), old_layout) };
            // Drop must not see the freed pointer
            self.ptr = NonNull::<Align16>::dangling().cast();
            self.capacity = 0;
            return Ok(());
        }
        // SAFETY: ptr was allocated with old_layout and new_capacity > 0.
        let raw = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_capacity) };
        self.ptr = NonNull::new(raw).ok_or_else(|| allocation_failure(new_capacity))?;
        self.capacity = new_capacity;
        Ok(())
    }

    pub fn zero_range(&mut self, range: Range<usize>) {
        self.as_mut_slice()[range].fill(0);
    }

    /// Deep copy with the same capacity and contents.
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = Self::with_capacity(self.capacity)?;
        copy.as_mut_slice().copy_from_slice(self.as_slice());
        Ok(copy)
    }
}

impl Default for AlignedBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        if self.capacity > 0 {
            if let Ok(layout) = layout(self.capacity) {
                // SAFETY: ptr was allocated with this layout.
                unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
            }
        }
    }
}

impl fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("capacity", &self.capacity)
            .finish()
    }
}
