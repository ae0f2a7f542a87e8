//! Datasets: ordered, typed columns sharing one row count
//!
//! Every column always holds exactly `row_count` populated rows. Row growth
//! runs in two phases (reserve every column, then commit the count) so a
//! failed allocation never leaves columns disagreeing about their length.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::arena::{StrSlot, StringArena};
use crate::column::Column;
use crate::config::EngineConfig;
use crate::error::{DatasetError, Result};
use crate::types::{Complex128, Complex64, Element, Shape, TypeTag};
use crate::view::RawView;

/// Source of process-unique dataset identities for view stamping.
static NEXT_DATASET_ID: AtomicU64 = AtomicU64::new(1);

fn next_dataset_id() -> u64 {
    NEXT_DATASET_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
pub struct Dataset {
    id: u64,
    epoch: u64,
    row_count: usize,
    columns: Vec<Column>,
    index: FxHashMap<String, usize>,
    arena: StringArena,
    config: EngineConfig,
}

impl Default for Dataset {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Dataset {
    /// An empty dataset: no columns, zero rows.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            id: next_dataset_id(),
            epoch: 0,
            row_count: 0,
            columns: Vec::new(),
            index: FxHashMap::default(),
            arena: StringArena::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process-unique identity, distinct for every dataset and clone.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Counter bumped by every operation that may move a buffer.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Allocated (not merely used) bytes across every column and the arena.
    pub fn total_size(&self) -> u64 {
        let columns: usize = self.columns.iter().map(Column::allocated_bytes).sum();
        (columns + self.arena.capacity()) as u64
    }

    pub fn arena(&self) -> &StringArena {
        &self.arena
    }

    pub fn column_name(&self, ordinal: usize) -> Result<&str> {
        self.columns
            .get(ordinal)
            .map(Column::key)
            .ok_or_else(|| {
                DatasetError::OutOfRange(format!(
                    "column ordinal {ordinal} >= column count {}",
                    self.columns.len()
                ))
            })
    }

    /// Column keys in insertion order.
    pub fn column_keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.iter().map(Column::key)
    }

    pub fn has_column(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn column(&self, key: &str) -> Result<&Column> {
        self.position(key).map(|idx| &self.columns[idx])
    }

    pub fn column_type(&self, key: &str) -> Result<TypeTag> {
        self.column(key).map(Column::tag)
    }

    /// Elements per row: 1 for scalar columns, the shape product for array
    /// columns, 0 for string columns.
    pub fn column_shape(&self, key: &str) -> Result<usize> {
        let column = self.column(key)?;
        Ok(if column.tag().is_string() {
            0
        } else {
            column.element_count()
        })
    }

    /// Full dimension list of a column; empty for scalar and string columns.
    pub fn column_dims(&self, key: &str) -> Result<&[u32]> {
        self.column(key).map(|column| column.shape().dims())
    }

    fn position(&self, key: &str) -> Result<usize> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| DatasetError::UnknownColumn(key.to_string()))
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.row_count {
            return Err(DatasetError::OutOfRange(format!(
                "row {row} >= row count {}",
                self.row_count
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Schema changes
    // ========================================================================

    pub fn add_column_scalar(&mut self, key: &str, tag: TypeTag) -> Result<()> {
        self.add_column(key, tag, Shape::scalar())
    }

    /// Add a column whose cells are fixed-shape arrays of `dims`.
    pub fn add_column_array(&mut self, key: &str, tag: TypeTag, dims: &[u32]) -> Result<()> {
        if tag.is_string() {
            return Err(DatasetError::WrongType(format!(
                "string column '{key}' cannot have an array shape"
            )));
        }
        let shape = Shape::new(dims);
        if shape.is_scalar() {
            return Err(DatasetError::InvalidShape(format!(
                "array column '{key}' needs at least one dimension"
            )));
        }
        if shape.rank() > self.config.max_rank() {
            return Err(DatasetError::InvalidShape(format!(
                "shape {shape} of '{key}' has more than {} dimensions",
                self.config.max_rank()
            )));
        }
        if let Some(dim) = dims
            .iter()
            .find(|dim| **dim == 0 || **dim > self.config.max_dimension())
        {
            return Err(DatasetError::InvalidShape(format!(
                "dimension {dim} of '{key}' is outside 1..={}",
                self.config.max_dimension()
            )));
        }
        self.add_column(key, tag, shape)
    }

    fn add_column(&mut self, key: &str, tag: TypeTag, shape: Shape) -> Result<()> {
        if self.index.contains_key(key) {
            return Err(DatasetError::DuplicateColumn(key.to_string()));
        }
        let column = Column::new(
            key.to_string(),
            tag,
            shape,
            self.row_count,
            self.config.growth(),
        )?;
        debug!(
            dataset = self.id,
            key,
            tag = %tag,
            shape = %column.shape(),
            rows = self.row_count,
            "column added"
        );
        self.index.insert(key.to_string(), self.columns.len());
        self.columns.push(column);
        self.epoch += 1;
        Ok(())
    }

    /// Remove a column; its string payloads become free arena space.
    pub fn drop_column(&mut self, key: &str) -> Result<()> {
        let idx = self.position(key)?;
        let column = self.columns.remove(idx);
        if column.tag().is_string() {
            for row in 0..self.row_count {
                self.arena.release(column.slot(row));
            }
        }
        self.index.remove(key);
        for position in self.index.values_mut() {
            if *position > idx {
                *position -= 1;
            }
        }
        self.epoch += 1;
        debug!(dataset = self.id, key, "column dropped");
        Ok(())
    }

    /// Rename a column in place, keeping its position and data.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        let idx = self.position(from)?;
        if from == to {
            return Ok(());
        }
        if self.index.contains_key(to) {
            return Err(DatasetError::DuplicateColumn(to.to_string()));
        }
        self.index.remove(from);
        self.index.insert(to.to_string(), idx);
        self.columns[idx].set_key(to.to_string());
        debug!(dataset = self.id, from, to, "column renamed");
        Ok(())
    }

    // ========================================================================
    // Row growth
    // ========================================================================

    /// Append `count` zero/empty rows to every column, all or nothing.
    pub fn add_rows(&mut self, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let target = self.row_count.checked_add(count).ok_or_else(|| {
            DatasetError::AllocationFailure(format!(
                "row count {} + {count} overflows",
                self.row_count
            ))
        })?;

        let previous: Vec<usize> = self.columns.iter().map(Column::capacity_rows).collect();
        for idx in 0..self.columns.len() {
            if let Err(err) = self.columns[idx].reserve_rows(target, self.config.growth()) {
                warn!(
                    dataset = self.id,
                    key = self.columns[idx].key(),
                    rows = target,
                    "add_rows rolled back"
                );
                for (column, rows) in self.columns[..idx].iter_mut().zip(&previous) {
                    // logical content is unchanged either way
                    if let Err(shrink) = column.shrink_to_rows(*rows) {
                        warn!(
                            dataset = self.id,
                            key = column.key(),
                            error = %shrink,
                            "rollback kept the grown capacity"
                        );
                    }
                }
                return Err(err);
            }
        }

        // reserved tails are already zeroed, so committing is just the count
        self.row_count = target;
        self.epoch += 1;
        Ok(())
    }

    // ========================================================================
    // Cell access
    // ========================================================================

    fn string_column(&self, key: &str) -> Result<usize> {
        let idx = self.position(key)?;
        let tag = self.columns[idx].tag();
        if !tag.is_string() {
            return Err(DatasetError::WrongType(format!(
                "column '{key}' holds {tag} values, not strings"
            )));
        }
        Ok(idx)
    }

    fn typed_column<T: Element>(&self, key: &str) -> Result<usize> {
        let idx = self.position(key)?;
        let tag = self.columns[idx].tag();
        if tag != T::TAG {
            return Err(DatasetError::WrongType(format!(
                "column '{key}' holds {tag} values, not {}",
                T::TAG
            )));
        }
        Ok(idx)
    }

    pub fn get_string(&self, key: &str, row: usize) -> Result<&str> {
        let idx = self.string_column(key)?;
        self.check_row(row)?;
        Ok(self.arena.get(self.columns[idx].slot(row)))
    }

    pub fn set_string(&mut self, key: &str, row: usize, value: &str) -> Result<()> {
        let idx = self.string_column(key)?;
        self.check_row(row)?;
        let current = self.columns[idx].slot(row);
        let assignment = self.arena.assign(current, value, self.config.growth())?;
        self.columns[idx].set_slot(row, assignment.slot);
        if assignment.relocated {
            self.epoch += 1;
        }
        Ok(())
    }

    /// Elements of one row of a numeric column.
    pub fn cell<T: Element>(&self, key: &str, row: usize) -> Result<&[T]> {
        let idx = self.typed_column::<T>(key)?;
        self.check_row(row)?;
        let column = &self.columns[idx];
        let count = column.element_count();
        Ok(&column.values::<T>(row + 1)[row * count..])
    }

    /// Overwrite one row of a numeric column; `values` must fill the cell.
    pub fn set_cell<T: Element>(&mut self, key: &str, row: usize, values: &[T]) -> Result<()> {
        let idx = self.typed_column::<T>(key)?;
        self.check_row(row)?;
        let column = &mut self.columns[idx];
        if values.len() != column.element_count() {
            return Err(DatasetError::InvalidShape(format!(
                "column '{key}' cells hold {} elements, got {}",
                column.element_count(),
                values.len()
            )));
        }
        column.values_mut::<T>(row).copy_from_slice(values);
        Ok(())
    }

    fn scalar_column<T: Element>(&self, key: &str) -> Result<usize> {
        let idx = self.typed_column::<T>(key)?;
        if !self.columns[idx].shape().is_scalar() {
            return Err(DatasetError::InvalidShape(format!(
                "column '{key}' has shape {}; use cell access",
                self.columns[idx].shape()
            )));
        }
        Ok(idx)
    }

    pub fn get_value<T: Element>(&self, key: &str, row: usize) -> Result<T> {
        let idx = self.scalar_column::<T>(key)?;
        self.check_row(row)?;
        Ok(self.columns[idx].values::<T>(row + 1)[row])
    }

    pub fn set_value<T: Element>(&mut self, key: &str, row: usize, value: T) -> Result<()> {
        let idx = self.scalar_column::<T>(key)?;
        self.check_row(row)?;
        self.columns[idx].values_mut::<T>(row)[0] = value;
        Ok(())
    }

    /// Populated bytes of a column (slot descriptors for string columns).
    pub fn column_bytes(&self, key: &str) -> Result<&[u8]> {
        self.column(key).map(|column| column.bytes(self.row_count))
    }

    // ========================================================================
    // Raw views
    // ========================================================================

    /// Address of a column's first byte, valid until the next mutation.
    pub fn raw_pointer(&self, key: &str) -> Result<RawView> {
        let column = self.column(key)?;
        Ok(RawView::new(
            column.as_raw_ptr(),
            self.row_count * column.stride(),
            column.tag(),
            self.id,
            self.epoch,
        ))
    }

    pub fn view_is_current(&self, view: &RawView) -> bool {
        view.dataset_id() == self.id && view.epoch() == self.epoch
    }

    /// Borrow the bytes behind a view, refusing stale views.
    pub fn view_bytes(&self, view: &RawView) -> Result<&[u8]> {
        if !self.view_is_current(view) {
            return Err(DatasetError::StaleView(format!(
                "view from dataset {} epoch {} used at dataset {} epoch {}",
                view.dataset_id(),
                view.epoch(),
                self.id,
                self.epoch
            )));
        }
        // SAFETY: the view is current, so its buffer has not moved, and
        // `&self` excludes writers for the returned lifetime.
        Ok(unsafe { view.as_slice() })
    }

    // ========================================================================
    // Defragmentation
    // ========================================================================

    /// Compact the string arena and, with `shrink_to_fit`, release every
    /// byte of over-allocated capacity.
    ///
    /// The arena compaction is built off to the side and only swapped in
    /// once every allocation has succeeded.
    pub fn defragment(&mut self, shrink_to_fit: bool) -> Result<()> {
        let before = self.total_size();

        let mut slots = Vec::new();
        for column in self.columns.iter().filter(|c| c.tag().is_string()) {
            slots.try_reserve(self.row_count)?;
            slots.extend((0..self.row_count).map(|row| column.slot(row)));
        }
        let (arena, rebound) = self.arena.compact(&slots, shrink_to_fit)?;

        // every exact-size buffer exists before any column is replaced
        if shrink_to_fit {
            let mut compacted = Vec::new();
            compacted.try_reserve_exact(self.columns.len())?;
            for column in &self.columns {
                compacted.push(column.compacted(self.row_count)?);
            }
            self.columns = compacted;
        }

        let mut rebound = rebound.into_iter();
        let rows = self.row_count;
        for column in self.columns.iter_mut().filter(|c| c.tag().is_string()) {
            for row in 0..rows {
                column.set_slot(row, rebound.next().unwrap_or(StrSlot::EMPTY));
            }
        }
        self.arena = arena;
        self.epoch += 1;

        debug!(
            dataset = self.id,
            shrink_to_fit,
            before,
            after = self.total_size(),
            "defragmented"
        );
        Ok(())
    }

    // ========================================================================
    // Copying and diagnostics
    // ========================================================================

    /// Deep copy of schema, rows and string content under a new identity.
    pub fn try_clone(&self) -> Result<Self> {
        let mut columns = Vec::new();
        columns.try_reserve_exact(self.columns.len())?;
        for column in &self.columns {
            columns.push(column.try_clone()?);
        }
        Ok(Self {
            id: next_dataset_id(),
            epoch: 0,
            row_count: self.row_count,
            columns,
            index: self.index.clone(),
            arena: self.arena.try_clone()?,
            config: self.config.clone(),
        })
    }

    /// Human-readable dump of the schema and every row.
    pub fn dump_text<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(
            out,
            "dataset {}: {} rows, {} columns, {} bytes allocated ({} arena, {} free)",
            self.id,
            self.row_count,
            self.columns.len(),
            self.total_size(),
            self.arena.capacity(),
            self.arena.free_bytes()
        )?;
        for (ordinal, column) in self.columns.iter().enumerate() {
            writeln!(
                out,
                "  [{ordinal}] {}: {} {} ({} rows allocated)",
                column.key(),
                column.tag(),
                column.shape(),
                column.capacity_rows()
            )?;
        }
        for row in 0..self.row_count {
            write!(out, "{row}:")?;
            for column in &self.columns {
                write!(out, " {}=", column.key())?;
                if column.tag().is_string() {
                    write!(out, "{:?}", self.arena.get(column.slot(row)))?;
                } else {
                    write_numeric_cell(out, column, row)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

fn write_elements<W: Write, T: Element>(out: &mut W, column: &Column, row: usize) -> std::io::Result<()> {
    let count = column.element_count();
    let values = &column.values::<T>(row + 1)[row * count..];
    if column.shape().is_scalar() {
        return write!(out, "{:?}", values[0]);
    }
    write!(out, "[")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            write!(out, ", ")?;
        }
        write!(out, "{value:?}")?;
    }
    write!(out, "]")
}

fn write_numeric_cell<W: Write>(out: &mut W, column: &Column, row: usize) -> std::io::Result<()> {
    match column.tag() {
        TypeTag::Int8 => write_elements::<W, i8>(out, column, row),
        TypeTag::Int16 => write_elements::<W, i16>(out, column, row),
        TypeTag::Int32 => write_elements::<W, i32>(out, column, row),
        TypeTag::Int64 => write_elements::<W, i64>(out, column, row),
        TypeTag::UInt8 => write_elements::<W, u8>(out, column, row),
        TypeTag::UInt16 => write_elements::<W, u16>(out, column, row),
        TypeTag::UInt32 => write_elements::<W, u32>(out, column, row),
        TypeTag::UInt64 => write_elements::<W, u64>(out, column, row),
        TypeTag::Float32 => write_elements::<W, f32>(out, column, row),
        TypeTag::Float64 => write_elements::<W, f64>(out, column, row),
        TypeTag::Complex64 => write_elements::<W, Complex64>(out, column, row),
        TypeTag::Complex128 => write_elements::<W, Complex128>(out, column, row),
        TypeTag::String => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> Dataset {
        Dataset::new(EngineConfig::builder().min_capacity_rows(4).build())
    }

    // ==========================================================================
    // Schema Tests
    // ==========================================================================

    #[test]
    fn test_new_dataset_is_empty() {
        let ds = dataset();
        assert_eq!(ds.column_count(), 0);
        assert_eq!(ds.row_count(), 0);
        assert_eq!(ds.total_size(), 0);
    }

    #[test]
    fn test_scalar_int32_scenario() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_rows(3).unwrap();

        assert_eq!(ds.row_count(), 3);
        assert_eq!(ds.column_count(), 1);
        let view = ds.raw_pointer("x").unwrap();
        assert_eq!(view.len(), 12);
        assert_eq!(unsafe { view.as_typed::<i32>() }, &[0, 0, 0]);
    }

    #[test]
    fn test_array_float64_scenario() {
        let mut ds = dataset();
        ds.add_column_array("m", TypeTag::Float64, &[2, 2]).unwrap();
        ds.add_rows(1).unwrap();

        assert_eq!(ds.column_shape("m").unwrap(), 4);
        assert_eq!(ds.column_dims("m").unwrap(), &[2, 2]);
        let view = ds.raw_pointer("m").unwrap();
        let bytes = ds.view_bytes(&view).unwrap();
        assert_eq!(bytes.len(), 32);
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_column_shape_by_kind() {
        let mut ds = dataset();
        ds.add_column_scalar("a", TypeTag::UInt8).unwrap();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_column_array("v", TypeTag::Int16, &[3]).unwrap();
        assert_eq!(ds.column_shape("a").unwrap(), 1);
        assert_eq!(ds.column_shape("s").unwrap(), 0);
        assert_eq!(ds.column_shape("v").unwrap(), 3);
    }

    #[test]
    fn test_column_name_by_ordinal() {
        let mut ds = dataset();
        ds.add_column_scalar("uid", TypeTag::UInt64).unwrap();
        ds.add_column_scalar("blob/path", TypeTag::String).unwrap();
        assert_eq!(ds.column_name(0).unwrap(), "uid");
        assert_eq!(ds.column_name(1).unwrap(), "blob/path");
        assert!(matches!(ds.column_name(2), Err(DatasetError::OutOfRange(_))));
        let keys: Vec<&str> = ds.column_keys().collect();
        assert_eq!(keys, vec!["uid", "blob/path"]);
    }

    #[test]
    fn test_unknown_column() {
        let ds = dataset();
        assert!(matches!(ds.column_type("nope"), Err(DatasetError::UnknownColumn(_))));
        assert!(matches!(ds.column_shape("nope"), Err(DatasetError::UnknownColumn(_))));
        assert!(!ds.has_column("nope"));
    }

    #[test]
    fn test_duplicate_column_leaves_schema_unchanged() {
        let mut ds = dataset();
        ds.add_column_scalar("dup", TypeTag::Int8).unwrap();
        let size = ds.total_size();
        let result = ds.add_column_scalar("dup", TypeTag::Int8);
        assert!(matches!(result, Err(DatasetError::DuplicateColumn(_))));
        assert_eq!(ds.column_count(), 1);
        assert_eq!(ds.column_type("dup").unwrap(), TypeTag::Int8);
        assert_eq!(ds.total_size(), size);
    }

    #[test]
    fn test_invalid_shapes() {
        let mut ds = dataset();
        assert!(matches!(
            ds.add_column_array("z", TypeTag::Float32, &[2, 0]),
            Err(DatasetError::InvalidShape(_))
        ));
        assert!(matches!(
            ds.add_column_array("e", TypeTag::Float32, &[]),
            Err(DatasetError::InvalidShape(_))
        ));
        assert!(matches!(
            ds.add_column_array("r", TypeTag::Float32, &[1, 1, 1, 1]),
            Err(DatasetError::InvalidShape(_))
        ));
        assert!(matches!(
            ds.add_column_array("d", TypeTag::Float32, &[256]),
            Err(DatasetError::InvalidShape(_))
        ));
        assert!(matches!(
            ds.add_column_array("s", TypeTag::String, &[2]),
            Err(DatasetError::WrongType(_))
        ));
        assert_eq!(ds.column_count(), 0);
    }

    #[test]
    fn test_new_column_on_existing_rows_is_zeroed() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int64).unwrap();
        ds.add_rows(5).unwrap();
        ds.set_value("x", 2, 99i64).unwrap();

        ds.add_column_array("pose", TypeTag::Float32, &[3]).unwrap();
        ds.add_column_scalar("name", TypeTag::String).unwrap();
        for row in 0..5 {
            assert_eq!(ds.cell::<f32>("pose", row).unwrap(), &[0.0, 0.0, 0.0]);
            assert_eq!(ds.get_string("name", row).unwrap(), "");
        }
        assert_eq!(ds.get_value::<i64>("x", 2).unwrap(), 99);
    }

    #[test]
    fn test_drop_column_reindexes() {
        let mut ds = dataset();
        ds.add_column_scalar("a", TypeTag::Int8).unwrap();
        ds.add_column_scalar("b", TypeTag::String).unwrap();
        ds.add_column_scalar("c", TypeTag::Int8).unwrap();
        ds.add_rows(2).unwrap();
        ds.set_string("b", 0, "gone soon").unwrap();

        ds.drop_column("b").unwrap();
        assert_eq!(ds.column_count(), 2);
        assert_eq!(ds.column_name(1).unwrap(), "c");
        assert_eq!(ds.column_type("c").unwrap(), TypeTag::Int8);
        assert_eq!(ds.arena().free_bytes(), 9);
        assert!(matches!(ds.drop_column("b"), Err(DatasetError::UnknownColumn(_))));
    }

    #[test]
    fn test_rename_column() {
        let mut ds = dataset();
        ds.add_column_scalar("old", TypeTag::UInt32).unwrap();
        ds.add_column_scalar("other", TypeTag::UInt32).unwrap();
        ds.add_rows(1).unwrap();
        ds.set_value("old", 0, 5u32).unwrap();

        ds.rename_column("old", "new").unwrap();
        assert_eq!(ds.column_name(0).unwrap(), "new");
        assert_eq!(ds.get_value::<u32>("new", 0).unwrap(), 5);
        assert!(!ds.has_column("old"));
        assert!(matches!(
            ds.rename_column("new", "other"),
            Err(DatasetError::DuplicateColumn(_))
        ));
        assert!(matches!(
            ds.rename_column("missing", "x"),
            Err(DatasetError::UnknownColumn(_))
        ));
        ds.rename_column("new", "new").unwrap();
    }

    // ==========================================================================
    // Row Growth Tests
    // ==========================================================================

    #[test]
    fn test_add_rows_sums() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Float32).unwrap();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        let mut expected = 0;
        for n in [1usize, 0, 7, 3, 40, 2] {
            ds.add_rows(n).unwrap();
            expected += n;
            assert_eq!(ds.row_count(), expected);
            assert_eq!(ds.column_bytes("x").unwrap().len(), expected * 4);
            assert_eq!(ds.column_bytes("s").unwrap().len(), expected * 16);
        }
    }

    #[test]
    fn test_add_rows_without_columns() {
        let mut ds = dataset();
        ds.add_rows(10).unwrap();
        assert_eq!(ds.row_count(), 10);
        ds.add_column_scalar("late", TypeTag::Int16).unwrap();
        assert_eq!(ds.column_bytes("late").unwrap(), &[0u8; 20][..]);
    }

    #[test]
    fn test_add_rows_overallocates() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::UInt8).unwrap();
        ds.add_rows(1).unwrap();
        let size = ds.total_size();
        ds.add_rows(1).unwrap();
        assert_eq!(ds.total_size(), size);
        assert!(ds.column("x").unwrap().capacity_rows() >= 4);
    }

    #[test]
    fn test_add_rows_failure_rolls_back() {
        let mut ds = dataset();
        ds.add_column_scalar("small", TypeTag::Int8).unwrap();
        ds.add_column_scalar("wide", TypeTag::Complex128).unwrap();
        ds.add_rows(2).unwrap();
        let size = ds.total_size();
        let epoch = ds.epoch();

        let result = ds.add_rows(usize::MAX / 8);
        assert!(matches!(result, Err(DatasetError::AllocationFailure(_))));
        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.total_size(), size);
        assert_eq!(ds.epoch(), epoch);
        assert_eq!(ds.column_bytes("small").unwrap().len(), 2);

        let overflow = ds.add_rows(usize::MAX);
        assert!(matches!(overflow, Err(DatasetError::AllocationFailure(_))));
    }

    #[test]
    fn test_add_rows_late_failure_releases_earlier_columns() {
        let config = EngineConfig::builder()
            .min_capacity_rows(4)
            .max_dimension(u32::MAX)
            .build();
        let mut ds = Dataset::new(config);
        ds.add_column_scalar("small", TypeTag::Int8).unwrap();
        ds.add_column_array("huge", TypeTag::UInt8, &[1 << 31, 1 << 31]).unwrap();
        let size = ds.total_size();
        assert_eq!(ds.column("small").unwrap().capacity_rows(), 0);

        let result = ds.add_rows(10);
        assert!(matches!(result, Err(DatasetError::AllocationFailure(_))));
        assert_eq!(ds.row_count(), 0);
        assert_eq!(ds.total_size(), size);
        assert_eq!(ds.column("small").unwrap().capacity_rows(), 0);

        // the released column grows again normally
        ds.drop_column("huge").unwrap();
        ds.add_rows(2).unwrap();
        assert_eq!(ds.column_bytes("small").unwrap(), &[0u8, 0][..]);
    }

    // ==========================================================================
    // String Tests
    // ==========================================================================

    #[test]
    fn test_string_round_trip() {
        let mut ds = dataset();
        ds.add_column_scalar("col", TypeTag::String).unwrap();
        ds.add_rows(4).unwrap();
        for row in 0..4 {
            ds.set_string("col", row, "abc").unwrap();
            assert_eq!(ds.get_string("col", row).unwrap(), "abc");
        }
    }

    #[test]
    fn test_string_overwrites() {
        let mut ds = dataset();
        ds.add_column_scalar("path", TypeTag::String).unwrap();
        ds.add_rows(1).unwrap();
        ds.set_string("path", 0, "/data/short.mrc").unwrap();
        ds.set_string("path", 0, "/data/a.mrc").unwrap();
        assert_eq!(ds.get_string("path", 0).unwrap(), "/data/a.mrc");
        ds.set_string("path", 0, "/data/a-much-longer-file-name.mrc").unwrap();
        assert_eq!(ds.get_string("path", 0).unwrap(), "/data/a-much-longer-file-name.mrc");
        ds.set_string("path", 0, "").unwrap();
        assert_eq!(ds.get_string("path", 0).unwrap(), "");
    }

    #[test]
    fn test_string_errors() {
        let mut ds = dataset();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_column_scalar("n", TypeTag::Float64).unwrap();
        ds.add_rows(2).unwrap();

        assert!(matches!(ds.get_string("s", 2), Err(DatasetError::OutOfRange(_))));
        assert!(matches!(ds.set_string("s", 2, "x"), Err(DatasetError::OutOfRange(_))));
        assert!(matches!(ds.get_string("n", 0), Err(DatasetError::WrongType(_))));
        assert!(matches!(ds.set_string("n", 0, "x"), Err(DatasetError::WrongType(_))));
        assert!(matches!(ds.get_string("q", 0), Err(DatasetError::UnknownColumn(_))));
    }

    #[test]
    fn test_relocating_string_bumps_epoch() {
        let mut ds = dataset();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_rows(1).unwrap();
        ds.set_string("s", 0, "long value").unwrap();
        let epoch = ds.epoch();
        ds.set_string("s", 0, "short").unwrap();
        assert_eq!(ds.epoch(), epoch);
        ds.set_string("s", 0, "a longer value than before").unwrap();
        assert!(ds.epoch() > epoch);
    }

    // ==========================================================================
    // Typed Cell Tests
    // ==========================================================================

    #[test]
    fn test_typed_values() {
        let mut ds = dataset();
        ds.add_column_scalar("uid", TypeTag::UInt64).unwrap();
        ds.add_column_scalar("z", TypeTag::Complex64).unwrap();
        ds.add_column_array("pose", TypeTag::Float64, &[3]).unwrap();
        ds.add_rows(2).unwrap();

        ds.set_value("uid", 1, 0xDEAD_BEEFu64).unwrap();
        ds.set_value("z", 0, Complex64 { re: 1.0, im: -1.0 }).unwrap();
        ds.set_cell("pose", 1, &[1.0f64, 2.0, 3.0]).unwrap();

        assert_eq!(ds.get_value::<u64>("uid", 1).unwrap(), 0xDEAD_BEEF);
        assert_eq!(ds.get_value::<Complex64>("z", 0).unwrap(), Complex64 { re: 1.0, im: -1.0 });
        assert_eq!(ds.cell::<f64>("pose", 1).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(ds.cell::<f64>("pose", 0).unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_typed_errors() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_column_array("v", TypeTag::Int32, &[2]).unwrap();
        ds.add_rows(1).unwrap();

        assert!(matches!(ds.get_value::<i64>("x", 0), Err(DatasetError::WrongType(_))));
        assert!(matches!(ds.get_value::<i32>("x", 1), Err(DatasetError::OutOfRange(_))));
        assert!(matches!(ds.get_value::<i32>("v", 0), Err(DatasetError::InvalidShape(_))));
        assert!(matches!(ds.set_cell("v", 0, &[1i32]), Err(DatasetError::InvalidShape(_))));
    }

    // ==========================================================================
    // View Tests
    // ==========================================================================

    #[test]
    fn test_view_invalidated_by_mutation() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_rows(1).unwrap();
        let view = ds.raw_pointer("x").unwrap();
        assert!(ds.view_is_current(&view));

        ds.add_rows(100).unwrap();
        assert!(!ds.view_is_current(&view));
        assert!(matches!(ds.view_bytes(&view), Err(DatasetError::StaleView(_))));

        let fresh = ds.raw_pointer("x").unwrap();
        assert_eq!(ds.view_bytes(&fresh).unwrap().len(), 404);
    }

    #[test]
    fn test_view_not_valid_for_other_dataset() {
        let mut a = dataset();
        let b = dataset();
        a.add_column_scalar("x", TypeTag::Int8).unwrap();
        let view = a.raw_pointer("x").unwrap();
        assert!(!b.view_is_current(&view));
    }

    #[test]
    fn test_scalar_writes_do_not_invalidate_views() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_rows(2).unwrap();
        let view = ds.raw_pointer("x").unwrap();
        ds.set_value("x", 1, 42i32).unwrap();
        assert!(ds.view_is_current(&view));
        assert_eq!(ds.view_bytes(&view).unwrap()[4..8], 42i32.to_ne_bytes());
    }

    // ==========================================================================
    // Defragmentation Tests
    // ==========================================================================

    #[test]
    fn test_defragment_reclaims_strings() {
        let mut ds = dataset();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_column_scalar("t", TypeTag::String).unwrap();
        ds.add_rows(3).unwrap();
        for row in 0..3 {
            ds.set_string("s", row, "a").unwrap();
            ds.set_string("s", row, "a bit longer").unwrap();
            ds.set_string("t", row, "t").unwrap();
        }
        assert!(ds.arena().free_bytes() > 0);

        ds.defragment(true).unwrap();
        assert_eq!(ds.arena().free_bytes(), 0);
        assert_eq!(ds.arena().capacity(), 3 * 12 + 3);
        for row in 0..3 {
            assert_eq!(ds.get_string("s", row).unwrap(), "a bit longer");
            assert_eq!(ds.get_string("t", row).unwrap(), "t");
        }
    }

    #[test]
    fn test_defragment_shrink_is_exact_and_idempotent() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Float64).unwrap();
        ds.add_column_array("m", TypeTag::Int16, &[2, 3]).unwrap();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_rows(5).unwrap();
        ds.set_string("s", 4, "tail").unwrap();

        ds.defragment(true).unwrap();
        let once = ds.total_size();
        assert_eq!(once, (5 * 8 + 5 * 12 + 5 * 16 + 4) as u64);

        ds.defragment(true).unwrap();
        assert_eq!(ds.total_size(), once);
        assert_eq!(ds.get_string("s", 4).unwrap(), "tail");
    }

    #[test]
    fn test_defragment_shrink_replaces_every_column() {
        let mut ds = dataset();
        ds.add_column_scalar("a", TypeTag::Int64).unwrap();
        ds.add_column_array("b", TypeTag::UInt8, &[3]).unwrap();
        ds.add_rows(3).unwrap();
        ds.set_value("a", 2, -9i64).unwrap();
        ds.set_cell::<u8>("b", 1, &[1, 2, 3]).unwrap();

        ds.defragment(true).unwrap();
        assert_eq!(ds.column("a").unwrap().capacity_rows(), 3);
        assert_eq!(ds.column("b").unwrap().capacity_rows(), 3);
        assert_eq!(ds.get_value::<i64>("a", 2).unwrap(), -9);
        assert_eq!(ds.cell::<u8>("b", 1).unwrap(), &[1, 2, 3]);
        assert_eq!(ds.total_size(), (3 * 8 + 3 * 3) as u64);
    }

    #[test]
    fn test_defragment_without_shrink_keeps_capacity() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_rows(1).unwrap();
        ds.set_string("s", 0, "v1").unwrap();
        ds.set_string("s", 0, "version two").unwrap();
        let size = ds.total_size();

        ds.defragment(false).unwrap();
        assert_eq!(ds.total_size(), size);
        assert_eq!(ds.arena().free_bytes(), 0);
        ds.defragment(false).unwrap();
        assert_eq!(ds.total_size(), size);
    }

    #[test]
    fn test_defragment_then_grow() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_rows(3).unwrap();
        ds.set_value("x", 2, 7i32).unwrap();
        ds.defragment(true).unwrap();
        ds.add_rows(1).unwrap();
        assert_eq!(ds.cell::<i32>("x", 3).unwrap(), &[0]);
        assert_eq!(ds.get_value::<i32>("x", 2).unwrap(), 7);
    }

    #[test]
    fn test_defragment_empty_dataset() {
        let mut ds = dataset();
        ds.defragment(true).unwrap();
        assert_eq!(ds.total_size(), 0);
    }

    #[test]
    fn test_defragment_after_drop_releases_arena() {
        let mut ds = dataset();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_rows(2).unwrap();
        ds.set_string("s", 0, "payload").unwrap();
        ds.drop_column("s").unwrap();
        ds.defragment(true).unwrap();
        assert_eq!(ds.arena().capacity(), 0);
        assert_eq!(ds.total_size(), 0);
    }

    // ==========================================================================
    // Clone and Dump Tests
    // ==========================================================================

    #[test]
    fn test_clone_is_independent() {
        let mut ds = dataset();
        ds.add_column_scalar("s", TypeTag::String).unwrap();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_rows(2).unwrap();
        ds.set_string("s", 0, "original").unwrap();
        ds.set_value("x", 1, 11i32).unwrap();

        let mut copy = ds.try_clone().unwrap();
        assert_ne!(copy.id(), ds.id());
        copy.set_string("s", 0, "changed").unwrap();
        copy.set_value("x", 1, 22i32).unwrap();
        copy.add_rows(3).unwrap();

        assert_eq!(ds.row_count(), 2);
        assert_eq!(ds.get_string("s", 0).unwrap(), "original");
        assert_eq!(ds.get_value::<i32>("x", 1).unwrap(), 11);
        assert_eq!(copy.row_count(), 5);
        assert_eq!(copy.get_string("s", 0).unwrap(), "changed");

        ds.set_string("s", 1, "source only").unwrap();
        assert_eq!(copy.get_string("s", 1).unwrap(), "");
    }

    #[test]
    fn test_dump_text() {
        let mut ds = dataset();
        ds.add_column_scalar("x", TypeTag::Int32).unwrap();
        ds.add_column_array("v", TypeTag::UInt8, &[2]).unwrap();
        ds.add_column_scalar("name", TypeTag::String).unwrap();
        ds.add_rows(2).unwrap();
        ds.set_value("x", 0, -4i32).unwrap();
        ds.set_cell("v", 1, &[1u8, 2]).unwrap();
        ds.set_string("name", 1, "b").unwrap();

        let mut out = Vec::new();
        ds.dump_text(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("2 rows, 3 columns"));
        assert!(text.contains("[1] v: uint8 (2,)"));
        assert!(text.contains("0: x=-4 v=[0, 0] name=\"\""));
        assert!(text.contains("1: x=0 v=[1, 2] name=\"b\""));
    }
}
