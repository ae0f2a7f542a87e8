//! Dset - in-process typed columnar dataset engine
//!
//! This crate stores tabular datasets as independently typed columns that
//! share one row count. Datasets live in a process-wide registry and are
//! addressed by opaque 64-bit handles, which makes the engine easy to drive
//! from a C ABI or any other binding layer.
//!
//! # Features
//!
//! - Scalar, fixed-shape array and string columns over 13 element kinds
//! - Zero-copy raw views of numeric buffers, stamped so stale use is detectable
//! - Amortized geometric growth with all-or-nothing row appends
//! - String arena with in-place overwrite and on-demand defragmentation
//! - Thread-safe handle registry with per-dataset reader/writer locks
//! - Arrow `RecordBatch` export
//!
//! # Example
//!
//! ```
//! use dset::{DatasetStore, TypeTag};
//!
//! let handle = DatasetStore::create()?;
//! DatasetStore::add_column_scalar(handle, "uid", TypeTag::UInt64)?;
//! DatasetStore::add_column_scalar(handle, "path", TypeTag::String)?;
//! DatasetStore::add_rows(handle, 2)?;
//!
//! DatasetStore::set_string(handle, "path", 1, "J1/motioncorrected/0001.mrc")?;
//! assert_eq!(DatasetStore::get_string(handle, "path", 1)?, "J1/motioncorrected/0001.mrc");
//!
//! DatasetStore::defragment(handle, true)?;
//! DatasetStore::destroy(handle)?;
//! # Ok::<(), dset::DatasetError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │        Binding layer (dset-c, Rust callers)     │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      │ handles
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │      DatasetStore  →  Registry (generational)   │
//! └─────────────────────────────────────────────────┘
//!                      │
//!                      │ RwLock per dataset
//!                      ▼
//! ┌─────────────────────────────────────────────────┐
//! │   Dataset: Columns (AlignedBuf) + StringArena   │
//! └─────────────────────────────────────────────────┘
//! ```

// Declare modules
pub mod arena;
pub mod buffer;
pub mod column;
pub mod config;
mod dataset;
pub mod error;
mod export;
pub mod growth;
pub mod registry;
mod store;
pub mod types;
pub mod view;

// Re-exports for convenience
pub use config::EngineConfig;
pub use dataset::Dataset;
pub use error::{DatasetError, Result};
pub use export::SHAPE_METADATA_KEY;
pub use registry::{DatasetHandle, Registry};
pub use store::{registry, DatasetStore};
pub use types::{Complex128, Complex64, Element, Shape, TagScheme, TypeTag};
pub use view::RawView;

// Re-export commonly used Arrow types
pub use arrow_array::RecordBatch;
