//! Record store error types.

use thiserror::Error;

/// Errors raised by the record stores.
///
/// Absence of a record is not an error; lookups return `Option`. These
/// variants are faults of the store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    /// The record violates a store constraint.
    #[error("Invalid record: {0}")]
    Invalid(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
