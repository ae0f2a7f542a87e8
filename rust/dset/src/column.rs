//! Per-column storage
//!
//! A column owns one [`AlignedBuf`] laid out row-major with a fixed stride:
//! `element_count * width` bytes per row for numeric columns, one
//! [`StrSlot`] per row for string columns. Capacity is tracked in rows and
//! may exceed the dataset's row count.

use std::mem::size_of;
use std::slice;

use crate::arena::{StrSlot, SLOT_WIDTH};
use crate::buffer::AlignedBuf;
use crate::error::{DatasetError, Result};
use crate::growth::GrowthPolicy;
use crate::types::{Element, Shape, TypeTag};

#[derive(Debug)]
pub struct Column {
    key: String,
    tag: TypeTag,
    shape: Shape,
    element_count: usize,
    stride: usize,
    capacity_rows: usize,
    data: AlignedBuf,
}

impl Column {
    /// Create a column with room for at least `rows` zeroed rows.
    pub(crate) fn new(
        key: String,
        tag: TypeTag,
        shape: Shape,
        rows: usize,
        policy: &GrowthPolicy,
    ) -> Result<Self> {
        let element_count = shape.element_count().ok_or_else(|| {
            DatasetError::InvalidShape(format!("shape {shape} of column '{key}' is too large"))
        })?;
        let stride = match tag.width() {
            Some(width) => element_count.checked_mul(width).ok_or_else(|| {
                DatasetError::InvalidShape(format!("shape {shape} of column '{key}' is too large"))
            })?,
            None => SLOT_WIDTH,
        };

        let mut column = Self {
            key,
            tag,
            shape,
            element_count,
            stride,
            capacity_rows: 0,
            data: AlignedBuf::new(),
        };
        column.reserve_rows(rows, policy)?;
        Ok(column)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn set_key(&mut self, key: String) {
        self.key = key;
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Elements per row: 1 for scalars, the shape product for arrays.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn capacity_rows(&self) -> usize {
        self.capacity_rows
    }

    pub fn allocated_bytes(&self) -> usize {
        self.data.capacity()
    }

    /// Make room for `rows` rows, over-allocating per `policy`.
    pub(crate) fn reserve_rows(&mut self, rows: usize, policy: &GrowthPolicy) -> Result<()> {
        if rows <= self.capacity_rows {
            return Ok(());
        }
        let target = policy.grow(self.capacity_rows, rows);
        let bytes = target.checked_mul(self.stride).ok_or_else(|| {
            DatasetError::AllocationFailure(format!(
                "column '{}' cannot hold {target} rows",
                self.key
            ))
        })?;
        self.data.grow_to(bytes)?;
        self.capacity_rows = target;
        Ok(())
    }

    /// Reallocate to exactly `rows` rows of capacity.
    ///
    /// The caller guarantees no populated row lives at or past `rows`.
    pub(crate) fn shrink_to_rows(&mut self, rows: usize) -> Result<()> {
        if rows >= self.capacity_rows {
            return Ok(());
        }
        self.data.shrink_to(rows * self.stride)?;
        self.capacity_rows = rows;
        Ok(())
    }

    /// Copy of the first `rows` rows in a buffer of exactly that capacity.
    pub(crate) fn compacted(&self, rows: usize) -> Result<Self> {
        let rows = rows.min(self.capacity_rows);
        let mut data = AlignedBuf::with_capacity(rows * self.stride)?;
        data.as_mut_slice().copy_from_slice(self.bytes(rows));
        Ok(Self {
            key: self.key.clone(),
            tag: self.tag,
            shape: self.shape.clone(),
            element_count: self.element_count,
            stride: self.stride,
            capacity_rows: rows,
            data,
        })
    }

    pub(crate) fn bytes(&self, rows: usize) -> &[u8] {
        &self.data.as_slice()[..rows * self.stride]
    }

    pub(crate) fn cell(&self, row: usize) -> &[u8] {
        &self.data.as_slice()[row * self.stride..(row + 1) * self.stride]
    }

    pub(crate) fn cell_mut(&mut self, row: usize) -> &mut [u8] {
        let stride = self.stride;
        &mut self.data.as_mut_slice()[row * stride..(row + 1) * stride]
    }

    pub(crate) fn slot(&self, row: usize) -> StrSlot {
        debug_assert!(self.tag.is_string());
        StrSlot::read(self.cell(row))
    }

    pub(crate) fn set_slot(&mut self, row: usize, slot: StrSlot) {
        debug_assert!(self.tag.is_string());
        slot.write(self.cell_mut(row));
    }

    /// The first `rows` rows reinterpreted as `T` elements.
    pub(crate) fn values<T: Element>(&self, rows: usize) -> &[T] {
        assert_eq!(T::TAG, self.tag, "element type does not match column '{}'", self.key);
        let bytes = self.bytes(rows);
        // SAFETY: the buffer is 16-byte aligned, the stride is a multiple of
        // size_of::<T>() (== tag width), and every bit pattern is a valid T.
        unsafe { slice::from_raw_parts(bytes.as_ptr().cast::<T>(), bytes.len() / size_of::<T>()) }
    }

    pub(crate) fn values_mut<T: Element>(&mut self, row: usize) -> &mut [T] {
        assert_eq!(T::TAG, self.tag, "element type does not match column '{}'", self.key);
        let count = self.element_count;
        let bytes = self.cell_mut(row);
        // SAFETY: as in `values`; the cell is `count * size_of::<T>()` bytes.
        unsafe { slice::from_raw_parts_mut(bytes.as_mut_ptr().cast::<T>(), count) }
    }

    /// Buffer address handed to foreign code, which may write through it.
    pub(crate) fn as_raw_ptr(&self) -> *mut u8 {
        self.data.as_ptr().cast_mut()
    }

    pub(crate) fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            key: self.key.clone(),
            tag: self.tag,
            shape: self.shape.clone(),
            element_count: self.element_count,
            stride: self.stride,
            capacity_rows: self.capacity_rows,
            data: self.data.try_clone()?,
        })
    }
}
