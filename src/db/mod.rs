//! Storage layer: SQLite schema, migrations, and the repository.
//!
//! Every projection mutation is one transaction; the exposure triggers in
//! `schema.sql` run inside it, so `exposure_agg` is never transiently out of
//! step with `positions`.

pub mod migrations;
pub mod repo;

use thiserror::Error;

use crate::domain::FixedError;

pub use migrations::{init_db, run_migrations};
pub use repo::{BucketSort, ExposureRow, OrderBucketRow, Repository, StopBucketRow};

/// Outcome of a typed ingest operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestResult {
    /// The projection changed.
    Applied,
    /// The event was a replay or is dominated by a later transition.
    Noop,
    /// The position row does not exist and the operation cannot create it.
    Missing,
}

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Fixed(#[from] FixedError),
}

impl StoreError {
    /// Connection-level trouble worth a bounded retry, as opposed to
    /// constraint violations that will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Db(sqlx::Error::Io(_)) => true,
            StoreError::Db(sqlx::Error::PoolTimedOut) => true,
            StoreError::Db(sqlx::Error::Database(db)) => {
                let msg = db.message().to_ascii_lowercase();
                msg.contains("locked") || msg.contains("busy")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        let err = StoreError::Db(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());

        let err = StoreError::Db(sqlx::Error::RowNotFound);
        assert!(!err.is_transient());

        let err = StoreError::Fixed(FixedError::BadTick);
        assert!(!err.is_transient());
    }
}
