//! Error types surfaced by the crate.

use thiserror::Error;

/// Every way a [`crate::ScdTable`] operation can fail.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ScdError {
    /// The caller handed in a frame type, or an empty column declaration, that
    /// the normalizer does not know how to read.
    #[error("unsupported input kind: {0}")]
    UnsupportedInputKind(String),

    /// A date string failed to parse as `YYYY-MM-DD`.
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// The table already exists with a column set that disagrees with the
    /// declared key/value columns.
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// A write would violate a primary-key or interval invariant. Should be
    /// unreachable if the classifier partitions keys correctly; surfaced
    /// rather than silently dropped so a violation is diagnosable.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The underlying engine rejected a statement.
    #[error("engine error: {0}")]
    Engine(#[from] duckdb::Error),

    /// A CSV/Parquet input path could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow batch construction/concatenation failed while assembling a
    /// query result.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type Result<T> = std::result::Result<T, ScdError>;
