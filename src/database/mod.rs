//! PostgreSQL access for the pipeline
//!
//! This module provides:
//! - [`Session`]: one explicitly passed connection owned by a run
//! - [`sql`]: builders for every statement the pipeline issues
//! - [`insert_rows`]: batched, parameterized multi-row inserts

pub mod batch;
pub mod postgres;
pub mod sql;

pub use batch::insert_rows;
pub use postgres::{Session, commit, execute, rollback, savepoint};

/// Error type for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction could not be started or committed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

/// Result type for database operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Render a driver error, including the server's message and detail when present
pub(crate) fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => match db.detail() {
            Some(detail) => format!("{} ({}) {}", db.message(), db.code().code(), detail),
            None => format!("{} ({})", db.message(), db.code().code()),
        },
        None => e.to_string(),
    }
}

/// Map a driver error to [`DatabaseError::QueryFailed`] with context
pub(crate) fn query_failed(context: &str, e: tokio_postgres::Error) -> DatabaseError {
    DatabaseError::QueryFailed(format!("{}: {}", context, describe(&e)))
}
