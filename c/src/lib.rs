//! Dset C - C FFI interface
//!
//! This crate exposes the `dset` dataset engine through a C ABI. It is a thin
//! wrapper over [`dset::DatasetStore`]: every function resolves its handle
//! through the process-wide registry and reports failures through a status
//! code plus a thread-local error message.
//!
//! # Usage from C
//!
//! ```c
//! #include <dset.h>
//!
//! uint64_t ds = dset_new();
//! if (ds == 0) {
//!     const char* error = dset_get_last_error();
//!     // Handle error
//! }
//!
//! dset_addcol_scalar(ds, "uid", 8);          // uint64 in the native scheme
//! dset_addrows(ds, 100);
//! uint64_t* uid = (uint64_t*) dset_get(ds, "uid");
//!
//! dset_del(ds);
//! ```
//!
//! Type codes follow the engine's configured tag scheme (`DSET_TAG_SCHEME`).

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::io;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;

use dset::{registry, DatasetError, DatasetStore, Result, TypeTag};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Error code constants for C interface
// ============================================================================

/// Operation completed successfully
pub const DSET_SUCCESS: c_int = 0;

/// Handle does not refer to a live dataset
pub const DSET_ERROR_INVALID_HANDLE: c_int = -1;

/// Column key is not present
pub const DSET_ERROR_UNKNOWN_COLUMN: c_int = -2;

/// Column key already exists
pub const DSET_ERROR_DUPLICATE_COLUMN: c_int = -3;

/// Operation does not apply to the column's type
pub const DSET_ERROR_WRONG_TYPE: c_int = -4;

/// Row or column index out of range
pub const DSET_ERROR_OUT_OF_RANGE: c_int = -5;

/// Array shape rejected
pub const DSET_ERROR_INVALID_SHAPE: c_int = -6;

/// Type code not defined in the active tag scheme
pub const DSET_ERROR_INVALID_TYPE: c_int = -7;

/// Memory could not be allocated
pub const DSET_ERROR_ALLOCATION: c_int = -8;

/// Raw view used after its dataset changed
pub const DSET_ERROR_STALE_VIEW: c_int = -9;

/// Arrow conversion error
pub const DSET_ERROR_EXPORT: c_int = -10;

/// IO error
pub const DSET_ERROR_IO: c_int = -11;

// ============================================================================
// Error handling
// ============================================================================

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
    // backing storage for strings returned by dset_key / dset_getstr
    static RETURNED: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(err: &DatasetError) {
    let msg = err.to_string();
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn error_code(err: &DatasetError) -> c_int {
    match err {
        DatasetError::InvalidHandle(_) => DSET_ERROR_INVALID_HANDLE,
        DatasetError::UnknownColumn(_) => DSET_ERROR_UNKNOWN_COLUMN,
        DatasetError::DuplicateColumn(_) => DSET_ERROR_DUPLICATE_COLUMN,
        DatasetError::WrongType(_) => DSET_ERROR_WRONG_TYPE,
        DatasetError::OutOfRange(_) => DSET_ERROR_OUT_OF_RANGE,
        DatasetError::InvalidShape(_) => DSET_ERROR_INVALID_SHAPE,
        DatasetError::InvalidType(_) => DSET_ERROR_INVALID_TYPE,
        DatasetError::AllocationFailure(_) => DSET_ERROR_ALLOCATION,
        DatasetError::StaleView(_) => DSET_ERROR_STALE_VIEW,
        DatasetError::ExportError(_) => DSET_ERROR_EXPORT,
        DatasetError::IoError(_) => DSET_ERROR_IO,
    }
}

/// Status code of a unit result, recording the error message on failure.
fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => DSET_SUCCESS,
        Err(e) => {
            set_last_error(&e);
            error_code(&e)
        }
    }
}

/// Value of a result, or `fallback` with the error recorded.
fn value_or<T>(result: Result<T>, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        set_last_error(&e);
        fallback
    })
}

/// Stash `value` in thread-local storage and return a pointer to it.
fn return_string(value: String) -> Result<*const c_char> {
    let value = CString::new(value)
        .map_err(|_| DatasetError::WrongType("string contains an interior NUL byte".to_string()))?;
    Ok(RETURNED.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.insert(value).as_ptr()
    }))
}

/// Borrow a column key argument.
unsafe fn key_arg<'a>(key: *const c_char) -> Result<&'a str> {
    if key.is_null() {
        return Err(DatasetError::UnknownColumn("null column key".to_string()));
    }
    CStr::from_ptr(key)
        .to_str()
        .map_err(|_| DatasetError::UnknownColumn("column key is not valid UTF-8".to_string()))
}

fn decode_tag(code: c_int) -> Result<TypeTag> {
    registry().config().tag_scheme().decode(code)
}

/// Get the last error message as a C string
///
/// Returns a pointer to the error message string, or NULL if no error.
/// The returned string is valid until the next error occurs on this thread.
#[no_mangle]
pub extern "C" fn dset_get_last_error() -> *const c_char {
    LAST_ERROR.with(|e| {
        if let Some(ref err) = *e.borrow() {
            err.as_ptr()
        } else {
            ptr::null()
        }
    })
}

/// Install a stderr log subscriber
///
/// The filter comes from `RUST_LOG`, then `DSET_LOG`, then defaults to
/// `warn`. Calling this again, or after the host installed its own
/// subscriber, is a no-op.
#[no_mangle]
pub extern "C" fn dset_init_logging() -> c_int {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env("DSET_LOG"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
    DSET_SUCCESS
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Create an empty dataset
///
/// # Returns
/// * Non-zero handle on success
/// * 0 on error - call `dset_get_last_error()` for details
#[no_mangle]
pub extern "C" fn dset_new() -> u64 {
    value_or(DatasetStore::create(), 0)
}

/// Destroy a dataset and release all of its memory
///
/// The handle is invalid afterwards, including for a second `dset_del`.
#[no_mangle]
pub extern "C" fn dset_del(dset: u64) -> c_int {
    status(DatasetStore::destroy(dset))
}

/// Deep-copy a dataset into a new handle
///
/// # Returns
/// * Handle of the copy on success
/// * 0 on error
#[no_mangle]
pub extern "C" fn dset_copy(dset: u64) -> u64 {
    value_or(DatasetStore::clone(dset), 0)
}

// ============================================================================
// Introspection
// ============================================================================

/// Allocated bytes across all column buffers and the string arena
#[no_mangle]
pub extern "C" fn dset_totalsz(dset: u64) -> u64 {
    value_or(DatasetStore::total_size(dset), 0)
}

#[no_mangle]
pub extern "C" fn dset_ncol(dset: u64) -> u32 {
    value_or(DatasetStore::column_count(dset), 0)
}

#[no_mangle]
pub extern "C" fn dset_nrow(dset: u64) -> u64 {
    value_or(DatasetStore::row_count(dset), 0)
}

/// Key of the column at insertion position `index`
///
/// # Returns
/// * Pointer to a NUL-terminated key, valid until the next `dset_key` or
///   `dset_getstr` call on this thread
/// * NULL on error
#[no_mangle]
pub extern "C" fn dset_key(dset: u64, index: u64) -> *const c_char {
    let result = DatasetStore::column_name(dset, index).and_then(return_string);
    value_or(result, ptr::null())
}

/// Type code of a column in the configured tag scheme
///
/// # Returns
/// * Type code (always non-zero) on success
/// * 0 on error
///
/// # Safety
/// * `colkey` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_type(dset: u64, colkey: *const c_char) -> u8 {
    let result = key_arg(colkey).and_then(|key| {
        let tag = DatasetStore::column_type(dset, key)?;
        Ok(registry().config().tag_scheme().encode(tag))
    });
    value_or(result, 0)
}

/// Elements per row: 1 for scalars, the shape product for arrays, 0 for strings
///
/// # Safety
/// * `colkey` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_getshp(dset: u64, colkey: *const c_char) -> u32 {
    let result = key_arg(colkey).and_then(|key| DatasetStore::column_shape(dset, key));
    value_or(result, 0)
}

/// Number of array dimensions of a column (0 for scalar and string columns)
///
/// # Safety
/// * `colkey` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_column_rank(dset: u64, colkey: *const c_char) -> u32 {
    let result = key_arg(colkey).and_then(|key| {
        let dims = DatasetStore::column_dims(dset, key)?;
        Ok(dims.len() as u32)
    });
    value_or(result, 0)
}

// ============================================================================
// Column buffers and strings
// ============================================================================

/// Address of a column's first byte
///
/// Numeric columns hold `nrow * getshp` elements row-major; string columns
/// hold one 16-byte slot descriptor per row. The address is only valid until
/// the next `dset_addrows`, `dset_addcol_*`, `dset_defrag`, column drop, or
/// `dset_setstr` that grows a string on this dataset.
///
/// # Returns
/// * Buffer address on success
/// * NULL on error
///
/// # Safety
/// * `colkey` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_get(dset: u64, colkey: *const c_char) -> *mut c_void {
    let result = key_arg(colkey).and_then(|key| DatasetStore::raw_pointer(dset, key));
    match result {
        Ok(view) => view.as_ptr().cast(),
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// Set the string at `index` of a string column
///
/// # Safety
/// * `colkey` and `value` must be valid NUL-terminated C strings
#[no_mangle]
pub unsafe extern "C" fn dset_setstr(
    dset: u64,
    colkey: *const c_char,
    index: u64,
    value: *const c_char,
) -> c_int {
    let result = key_arg(colkey).and_then(|key| {
        if value.is_null() {
            return Err(DatasetError::WrongType("null string value".to_string()));
        }
        let value = CStr::from_ptr(value)
            .to_str()
            .map_err(|_| DatasetError::WrongType("string value is not valid UTF-8".to_string()))?;
        DatasetStore::set_string(dset, key, index, value)
    });
    status(result)
}

/// Get the string at `index` of a string column
///
/// # Returns
/// * Pointer to a NUL-terminated copy, valid until the next `dset_key` or
///   `dset_getstr` call on this thread
/// * NULL on error
///
/// # Safety
/// * `colkey` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_getstr(dset: u64, colkey: *const c_char, index: u64) -> *const c_char {
    let result = key_arg(colkey)
        .and_then(|key| DatasetStore::get_string(dset, key, index))
        .and_then(return_string);
    value_or(result, ptr::null())
}

// ============================================================================
// Schema and rows
// ============================================================================

/// Append `num` zero-initialized rows to every column, all or nothing
#[no_mangle]
pub extern "C" fn dset_addrows(dset: u64, num: u32) -> c_int {
    status(DatasetStore::add_rows(dset, num))
}

/// Add a scalar column of type code `type_code`
///
/// # Safety
/// * `key` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_addcol_scalar(dset: u64, key: *const c_char, type_code: c_int) -> c_int {
    let result = key_arg(key).and_then(|key| {
        let tag = decode_tag(type_code)?;
        DatasetStore::add_column_scalar(dset, key, tag)
    });
    status(result)
}

/// Add a fixed-shape array column
///
/// # Arguments
/// * `shape` - dimension sizes, one byte each. Exactly `max_rank` bytes are
///   read (3 unless `DSET_MAX_RANK` says otherwise); trailing zero bytes mark
///   unused dimensions, so `{4, 4, 0}` is a 4x4 matrix.
///
/// # Returns
/// * `DSET_ERROR_INVALID_SHAPE` for a null or all-zero shape
///
/// # Safety
/// * `key` must be a valid NUL-terminated C string
/// * `shape` must point to at least `max_rank` readable bytes
#[no_mangle]
pub unsafe extern "C" fn dset_addcol_array(
    dset: u64,
    key: *const c_char,
    type_code: c_int,
    shape: *const u8,
) -> c_int {
    let rank = registry().config().max_rank();
    let result = shape_arg(shape, rank).and_then(|dims| {
        let used = dims.iter().rposition(|d| *d != 0).map_or(0, |last| last + 1);
        add_array(dset, key, type_code, &dims[..used])
    });
    status(result)
}

/// Add a fixed-shape array column with an explicit rank
///
/// Every one of the `rank` bytes is a dimension; none may be zero.
///
/// # Safety
/// * `key` must be a valid NUL-terminated C string
/// * `shape` must point to at least `rank` readable bytes
#[no_mangle]
pub unsafe extern "C" fn dset_addcol_array_rank(
    dset: u64,
    key: *const c_char,
    type_code: c_int,
    shape: *const u8,
    rank: usize,
) -> c_int {
    status(shape_arg(shape, rank).and_then(|dims| add_array(dset, key, type_code, dims)))
}

unsafe fn shape_arg<'a>(shape: *const u8, rank: usize) -> Result<&'a [u8]> {
    if rank == 0 {
        return Ok(&[]);
    }
    if shape.is_null() {
        return Err(DatasetError::InvalidShape("null shape pointer".to_string()));
    }
    Ok(slice::from_raw_parts(shape, rank))
}

unsafe fn add_array(dset: u64, key: *const c_char, type_code: c_int, dims: &[u8]) -> Result<()> {
    let key = key_arg(key)?;
    let tag = decode_tag(type_code)?;
    let dims: Vec<u32> = dims.iter().map(|d| u32::from(*d)).collect();
    DatasetStore::add_column_array(dset, key, tag, &dims)
}

/// Remove a column
///
/// # Safety
/// * `key` must be a valid NUL-terminated C string
#[no_mangle]
pub unsafe extern "C" fn dset_drop_column(dset: u64, key: *const c_char) -> c_int {
    status(key_arg(key).and_then(|key| DatasetStore::drop_column(dset, key)))
}

/// Rename a column, keeping its position and data
///
/// # Safety
/// * `from` and `to` must be valid NUL-terminated C strings
#[no_mangle]
pub unsafe extern "C" fn dset_rename_column(dset: u64, from: *const c_char, to: *const c_char) -> c_int {
    let result = key_arg(from)
        .and_then(|from| Ok((from, key_arg(to)?)))
        .and_then(|(from, to)| DatasetStore::rename_column(dset, from, to));
    status(result)
}

// ============================================================================
// Maintenance
// ============================================================================

/// Compact string storage and, with nonzero `realloc_smaller`, release spare
/// capacity
///
/// Invalidates every address previously returned by `dset_get`.
#[no_mangle]
pub extern "C" fn dset_defrag(dset: u64, realloc_smaller: c_int) -> c_int {
    status(DatasetStore::defragment(dset, realloc_smaller != 0))
}

/// Print the schema and every row to stderr
#[no_mangle]
pub extern "C" fn dset_dumptxt(dset: u64) -> c_int {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    status(DatasetStore::dump_text(dset, &mut out))
}
