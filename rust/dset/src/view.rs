//! Raw column addresses for zero-copy access from foreign code
//!
//! A [`RawView`] is stamped with the dataset's identity and mutation epoch at
//! the moment it is taken. Any operation that may move a buffer bumps the
//! epoch, so a view can be checked with [`crate::Dataset::view_is_current`]
//! before it is dereferenced. The engine does not track views it has handed
//! out; honouring the check is the holder's job.

use std::mem::size_of;
use std::slice;

use crate::types::{Element, TypeTag};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawView {
    ptr: *mut u8,
    len: usize,
    tag: TypeTag,
    dataset: u64,
    epoch: u64,
}

impl RawView {
    pub(crate) fn new(ptr: *mut u8, len: usize, tag: TypeTag, dataset: u64, epoch: u64) -> Self {
        Self {
            ptr,
            len,
            tag,
            dataset,
            epoch,
        }
    }

    /// Address of the first byte of the column buffer.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Populated bytes at the time the view was taken.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn dataset_id(&self) -> u64 {
        self.dataset
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// # Safety
    ///
    /// The owning dataset must be alive and unmutated since the view was
    /// taken, and no writer may run for the lifetime `'a`.
    pub unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        slice::from_raw_parts(self.ptr, self.len)
    }

    /// # Safety
    ///
    /// Same contract as [`RawView::as_slice`].
    ///
    /// # Panics
    ///
    /// Panics if `T` does not match the column's element kind.
    pub unsafe fn as_typed<'a, T: Element>(&self) -> &'a [T] {
        assert_eq!(T::TAG, self.tag, "view holds {} elements", self.tag);
        slice::from_raw_parts(self.ptr.cast::<T>(), self.len / size_of::<T>())
    }
}
