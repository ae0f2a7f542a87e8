//! Error types for dataset operations
//!
//! Every engine operation reports failures through [`DatasetError`]; binding
//! layers translate each variant into their own status convention.

use thiserror::Error;

/// Error types for dataset operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    /// Handle does not refer to a live dataset
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Column key is not present in the schema
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    /// Column key already exists
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    /// Operation does not apply to the column's element kind
    #[error("Wrong type: {0}")]
    WrongType(String),

    /// Row or ordinal index past the current bounds
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Array shape is empty, has a zero dimension, or exceeds the limits
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Numeric type code is not part of the active tag scheme
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// Memory request could not be satisfied
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// Raw view was taken before the dataset's latest mutation
    #[error("Stale view: {0}")]
    StaleView(String),

    /// Arrow conversion error
    #[error("Export error: {0}")]
    ExportError(String),

    /// Diagnostic sink could not be written
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<arrow_schema::ArrowError> for DatasetError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        DatasetError::ExportError(err.to_string())
    }
}

impl From<std::io::Error> for DatasetError {
    fn from(err: std::io::Error) -> Self {
        DatasetError::IoError(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for DatasetError {
    fn from(err: std::collections::TryReserveError) -> Self {
        DatasetError::AllocationFailure(err.to_string())
    }
}

/// Result type for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;
