//! Process-wide dataset store
//!
//! [`DatasetStore`] is the handle-based facade that binding layers call. It
//! owns a single global [`Registry`], configured from the environment the
//! first time it is touched, and exposes every dataset operation as an
//! associated function taking a [`DatasetHandle`].

use std::io::Write;

use arrow_array::RecordBatch;
use lazy_static::lazy_static;

use crate::config;
use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};
use crate::registry::{DatasetHandle, Registry};
use crate::types::TypeTag;
use crate::view::RawView;

lazy_static! {
    /// Global dataset registry
    static ref DATASETS: Registry = Registry::with_config(config::global().clone());
}

/// The registry behind [`DatasetStore`].
pub fn registry() -> &'static Registry {
    &DATASETS
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| DatasetError::OutOfRange(format!("{what} {value} does not fit in 32 bits")))
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| DatasetError::OutOfRange(format!("{what} {value} is not addressable")))
}

/// Handle-addressed dataset operations over the global registry.
///
/// # Example
///
/// ```
/// use dset::{DatasetStore, TypeTag};
///
/// let handle = DatasetStore::create()?;
/// DatasetStore::add_column_scalar(handle, "x", TypeTag::Int32)?;
/// DatasetStore::add_rows(handle, 3)?;
/// assert_eq!(DatasetStore::row_count(handle)?, 3);
/// DatasetStore::destroy(handle)?;
/// # Ok::<(), dset::DatasetError>(())
/// ```
pub struct DatasetStore;

impl DatasetStore {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn create() -> Result<DatasetHandle> {
        DATASETS.create()
    }

    pub fn destroy(handle: DatasetHandle) -> Result<()> {
        DATASETS.destroy(handle)
    }

    /// Deep copy under a new handle.
    pub fn clone(handle: DatasetHandle) -> Result<DatasetHandle> {
        DATASETS.clone_dataset(handle)
    }

    pub fn is_valid_handle(handle: DatasetHandle) -> bool {
        DATASETS.is_live(handle)
    }

    /// Number of live datasets in the process.
    pub fn live_count() -> usize {
        DATASETS.len()
    }

    /// Run `f` with shared access to a dataset.
    ///
    /// # Deadlocks
    ///
    /// `f` runs with the dataset locked. Calling any `DatasetStore` function
    /// on the same handle from inside `f` blocks forever; other handles can
    /// be used freely.
    pub fn with_dataset<R>(handle: DatasetHandle, f: impl FnOnce(&Dataset) -> Result<R>) -> Result<R> {
        DATASETS.read(handle, f)
    }

    /// Run `f` with exclusive access to a dataset.
    ///
    /// # Deadlocks
    ///
    /// `f` runs with the dataset locked. Calling any `DatasetStore` function
    /// on the same handle from inside `f` blocks forever; other handles can
    /// be used freely.
    pub fn with_dataset_mut<R>(
        handle: DatasetHandle,
        f: impl FnOnce(&mut Dataset) -> Result<R>,
    ) -> Result<R> {
        DATASETS.write(handle, f)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn total_size(handle: DatasetHandle) -> Result<u64> {
        DATASETS.read(handle, |ds| Ok(ds.total_size()))
    }

    pub fn column_count(handle: DatasetHandle) -> Result<u32> {
        DATASETS.read(handle, |ds| to_u32(ds.column_count(), "column count"))
    }

    pub fn row_count(handle: DatasetHandle) -> Result<u64> {
        DATASETS.read(handle, |ds| Ok(ds.row_count() as u64))
    }

    pub fn column_name(handle: DatasetHandle, ordinal: u64) -> Result<String> {
        DATASETS.read(handle, |ds| {
            let ordinal = to_usize(ordinal, "column ordinal")?;
            Ok(ds.column_name(ordinal)?.to_string())
        })
    }

    pub fn column_type(handle: DatasetHandle, key: &str) -> Result<TypeTag> {
        DATASETS.read(handle, |ds| ds.column_type(key))
    }

    /// Elements per row (0 for string columns).
    pub fn column_shape(handle: DatasetHandle, key: &str) -> Result<u32> {
        DATASETS.read(handle, |ds| to_u32(ds.column_shape(key)?, "element count"))
    }

    pub fn column_dims(handle: DatasetHandle, key: &str) -> Result<Vec<u32>> {
        DATASETS.read(handle, |ds| Ok(ds.column_dims(key)?.to_vec()))
    }

    pub fn column_keys(handle: DatasetHandle) -> Result<Vec<String>> {
        DATASETS.read(handle, |ds| Ok(ds.column_keys().map(str::to_string).collect()))
    }

    // ========================================================================
    // Schema and rows
    // ========================================================================

    pub fn add_column_scalar(handle: DatasetHandle, key: &str, tag: TypeTag) -> Result<()> {
        DATASETS.write(handle, |ds| ds.add_column_scalar(key, tag))
    }

    pub fn add_column_array(handle: DatasetHandle, key: &str, tag: TypeTag, dims: &[u32]) -> Result<()> {
        DATASETS.write(handle, |ds| ds.add_column_array(key, tag, dims))
    }

    pub fn drop_column(handle: DatasetHandle, key: &str) -> Result<()> {
        DATASETS.write(handle, |ds| ds.drop_column(key))
    }

    pub fn rename_column(handle: DatasetHandle, from: &str, to: &str) -> Result<()> {
        DATASETS.write(handle, |ds| ds.rename_column(from, to))
    }

    pub fn add_rows(handle: DatasetHandle, count: u32) -> Result<()> {
        DATASETS.write(handle, |ds| ds.add_rows(count as usize))
    }

    // ========================================================================
    // Cells and buffers
    // ========================================================================

    pub fn get_string(handle: DatasetHandle, key: &str, row: u64) -> Result<String> {
        DATASETS.read(handle, |ds| {
            let row = to_usize(row, "row")?;
            Ok(ds.get_string(key, row)?.to_string())
        })
    }

    pub fn set_string(handle: DatasetHandle, key: &str, row: u64, value: &str) -> Result<()> {
        DATASETS.write(handle, |ds| {
            let row = to_usize(row, "row")?;
            ds.set_string(key, row, value)
        })
    }

    /// Raw address of a column buffer, valid until the dataset next mutates.
    pub fn raw_pointer(handle: DatasetHandle, key: &str) -> Result<RawView> {
        DATASETS.read(handle, |ds| ds.raw_pointer(key))
    }

    pub fn view_is_current(handle: DatasetHandle, view: &RawView) -> Result<bool> {
        DATASETS.read(handle, |ds| Ok(ds.view_is_current(view)))
    }

    /// Copy the bytes behind a view, failing with `StaleView` if the dataset
    /// has mutated since the view was taken.
    pub fn read_view(handle: DatasetHandle, view: &RawView) -> Result<Vec<u8>> {
        DATASETS.read(handle, |ds| Ok(ds.view_bytes(view)?.to_vec()))
    }

    // ========================================================================
    // Maintenance and export
    // ========================================================================

    pub fn defragment(handle: DatasetHandle, shrink_to_fit: bool) -> Result<()> {
        DATASETS.write(handle, |ds| ds.defragment(shrink_to_fit))
    }

    pub fn dump_text<W: Write>(handle: DatasetHandle, out: &mut W) -> Result<()> {
        DATASETS.read(handle, |ds| ds.dump_text(out))
    }

    pub fn to_record_batch(handle: DatasetHandle) -> Result<RecordBatch> {
        DATASETS.read(handle, Dataset::to_record_batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Scenario Tests
    // ==========================================================================

    #[test]
    fn test_scalar_scenario() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "x", TypeTag::Int32).unwrap();
        DatasetStore::add_rows(h, 3).unwrap();

        assert_eq!(DatasetStore::row_count(h).unwrap(), 3);
        assert_eq!(DatasetStore::column_count(h).unwrap(), 1);
        let view = DatasetStore::raw_pointer(h, "x").unwrap();
        assert_eq!(DatasetStore::read_view(h, &view).unwrap(), vec![0u8; 12]);
        DatasetStore::destroy(h).unwrap();
    }

    #[test]
    fn test_array_scenario() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_array(h, "m", TypeTag::Float64, &[2, 2]).unwrap();
        DatasetStore::add_rows(h, 1).unwrap();

        assert_eq!(DatasetStore::column_shape(h, "m").unwrap(), 4);
        assert_eq!(DatasetStore::column_dims(h, "m").unwrap(), vec![2, 2]);
        let view = DatasetStore::raw_pointer(h, "m").unwrap();
        assert_eq!(view.len(), 32);
        assert_eq!(DatasetStore::read_view(h, &view).unwrap(), vec![0u8; 32]);
        DatasetStore::destroy(h).unwrap();
    }

    #[test]
    fn test_string_round_trip_and_bounds() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "col", TypeTag::String).unwrap();
        DatasetStore::add_rows(h, 2).unwrap();
        DatasetStore::set_string(h, "col", 1, "abc").unwrap();

        assert_eq!(DatasetStore::get_string(h, "col", 1).unwrap(), "abc");
        assert_eq!(DatasetStore::get_string(h, "col", 0).unwrap(), "");
        assert!(matches!(
            DatasetStore::get_string(h, "col", 2),
            Err(DatasetError::OutOfRange(_))
        ));
        DatasetStore::destroy(h).unwrap();
    }

    #[test]
    fn test_column_name_and_keys() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "uid", TypeTag::UInt64).unwrap();
        DatasetStore::add_column_scalar(h, "ctf/df1_A", TypeTag::Float32).unwrap();
        assert_eq!(DatasetStore::column_name(h, 1).unwrap(), "ctf/df1_A");
        assert!(matches!(
            DatasetStore::column_name(h, 2),
            Err(DatasetError::OutOfRange(_))
        ));
        assert_eq!(DatasetStore::column_keys(h).unwrap(), vec!["uid", "ctf/df1_A"]);

        DatasetStore::rename_column(h, "uid", "id").unwrap();
        DatasetStore::drop_column(h, "ctf/df1_A").unwrap();
        assert_eq!(DatasetStore::column_keys(h).unwrap(), vec!["id"]);
        assert_eq!(DatasetStore::column_type(h, "id").unwrap(), TypeTag::UInt64);
        DatasetStore::destroy(h).unwrap();
    }

    // ==========================================================================
    // Lifecycle Tests
    // ==========================================================================

    #[test]
    fn test_destroyed_handle_is_invalid_everywhere() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::destroy(h).unwrap();

        assert!(!DatasetStore::is_valid_handle(h));
        assert!(matches!(DatasetStore::row_count(h), Err(DatasetError::InvalidHandle(_))));
        assert!(matches!(DatasetStore::add_rows(h, 1), Err(DatasetError::InvalidHandle(_))));
        assert!(matches!(DatasetStore::clone(h), Err(DatasetError::InvalidHandle(_))));
        assert!(matches!(DatasetStore::destroy(h), Err(DatasetError::InvalidHandle(_))));
    }

    #[test]
    fn test_clone_does_not_alias() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "s", TypeTag::String).unwrap();
        DatasetStore::add_column_scalar(h, "x", TypeTag::Int16).unwrap();
        DatasetStore::add_rows(h, 2).unwrap();
        DatasetStore::set_string(h, "s", 0, "source").unwrap();

        let copy = DatasetStore::clone(h).unwrap();
        assert_ne!(copy, h);
        DatasetStore::set_string(copy, "s", 0, "copy").unwrap();
        DatasetStore::add_rows(copy, 5).unwrap();
        DatasetStore::with_dataset_mut(copy, |ds| ds.set_value("x", 1, 9i16)).unwrap();

        assert_eq!(DatasetStore::row_count(h).unwrap(), 2);
        assert_eq!(DatasetStore::get_string(h, "s", 0).unwrap(), "source");
        let view = DatasetStore::raw_pointer(h, "x").unwrap();
        assert_eq!(DatasetStore::read_view(h, &view).unwrap(), vec![0u8; 4]);

        DatasetStore::set_string(h, "s", 1, "later").unwrap();
        assert_eq!(DatasetStore::get_string(copy, "s", 1).unwrap(), "");

        DatasetStore::destroy(h).unwrap();
        DatasetStore::destroy(copy).unwrap();
    }

    #[test]
    fn test_closure_may_use_other_handles() {
        let a = DatasetStore::create().unwrap();
        let b = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(b, "x", TypeTag::Int32).unwrap();

        let copy = DatasetStore::with_dataset_mut(a, |ds| {
            ds.add_rows(1)?;
            DatasetStore::add_rows(b, 2)?;
            DatasetStore::clone(b)
        })
        .unwrap();
        assert_eq!(DatasetStore::row_count(a).unwrap(), 1);
        assert_eq!(DatasetStore::row_count(copy).unwrap(), 2);

        for h in [a, b, copy] {
            DatasetStore::destroy(h).unwrap();
        }
    }

    #[test]
    fn test_view_goes_stale_after_growth() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "x", TypeTag::Float32).unwrap();
        DatasetStore::add_rows(h, 1).unwrap();
        let view = DatasetStore::raw_pointer(h, "x").unwrap();
        assert!(DatasetStore::view_is_current(h, &view).unwrap());

        DatasetStore::add_rows(h, 1).unwrap();
        assert!(!DatasetStore::view_is_current(h, &view).unwrap());
        assert!(matches!(
            DatasetStore::read_view(h, &view),
            Err(DatasetError::StaleView(_))
        ));
        DatasetStore::destroy(h).unwrap();
    }

    // ==========================================================================
    // Maintenance Tests
    // ==========================================================================

    #[test]
    fn test_defragment_idempotent() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "s", TypeTag::String).unwrap();
        DatasetStore::add_rows(h, 10).unwrap();
        for row in 0..10 {
            DatasetStore::set_string(h, "s", row, "x").unwrap();
            DatasetStore::set_string(h, "s", row, "longer value").unwrap();
        }

        DatasetStore::defragment(h, true).unwrap();
        let once = DatasetStore::total_size(h).unwrap();
        DatasetStore::defragment(h, true).unwrap();
        assert_eq!(DatasetStore::total_size(h).unwrap(), once);
        assert_eq!(DatasetStore::get_string(h, "s", 9).unwrap(), "longer value");
        DatasetStore::destroy(h).unwrap();
    }

    #[test]
    fn test_dump_text_and_export() {
        let h = DatasetStore::create().unwrap();
        DatasetStore::add_column_scalar(h, "x", TypeTag::UInt8).unwrap();
        DatasetStore::add_rows(h, 2).unwrap();

        let mut out = Vec::new();
        DatasetStore::dump_text(h, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("2 rows, 1 columns"));

        let batch = DatasetStore::to_record_batch(h).unwrap();
        assert_eq!(batch.num_rows(), 2);
        DatasetStore::destroy(h).unwrap();
    }

    #[test]
    fn test_live_count_tracks_own_handles() {
        let h = DatasetStore::create().unwrap();
        assert!(DatasetStore::live_count() >= 1);
        assert!(registry().is_live(h));
        DatasetStore::destroy(h).unwrap();
        assert!(!registry().is_live(h));
    }
}
