//! Error types for the Peregrine library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`PeregrineError`] enum.
//!
//! # Examples
//!
//! ```
//! use peregrine::error::{PeregrineError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(PeregrineError::query("empty operator list"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Peregrine operations.
///
/// Corruption errors indicate that an upstream invariant was already
/// broken (non-increasing keys, duplicate singleton documents); they are
/// fatal and never retried.
#[derive(Error, Debug)]
pub enum PeregrineError {
    /// I/O errors (file operations, truncated reads, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Corrupt or inconsistent index data.
    #[error("Index corruption: {0}")]
    Corruption(String),

    /// Query construction or evaluation errors.
    #[error("Query error: {0}")]
    Query(String),

    /// A required corpus statistic is absent from the parameter bag.
    #[error("Missing required statistic: {0}")]
    MissingStatistic(String),

    /// Storage-related errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Merge-related errors.
    #[error("Merge error: {0}")]
    Merge(String),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases.
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PeregrineError.
pub type Result<T> = std::result::Result<T, PeregrineError>;

impl PeregrineError {
    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        PeregrineError::Corruption(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        PeregrineError::Query(msg.into())
    }

    /// Create a new missing-statistic error.
    pub fn missing_statistic<S: Into<String>>(name: S) -> Self {
        PeregrineError::MissingStatistic(name.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PeregrineError::Storage(msg.into())
    }

    /// Create a new merge error.
    pub fn merge<S: Into<String>>(msg: S) -> Self {
        PeregrineError::Merge(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PeregrineError::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = PeregrineError::corruption("document ids out of order");
        assert_eq!(
            error.to_string(),
            "Index corruption: document ids out of order"
        );

        let error = PeregrineError::missing_statistic("collection_length");
        assert_eq!(
            error.to_string(),
            "Missing required statistic: collection_length"
        );

        let error = PeregrineError::merge("no readers");
        assert_eq!(error.to_string(), "Merge error: no readers");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = PeregrineError::from(io_error);

        match error {
            PeregrineError::Io(_) => {}
            _ => panic!("Expected IO error variant"),
        }
    }
}
