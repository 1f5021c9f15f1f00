//! Common error types for Shelfkeeper

use thiserror::Error;

/// Common result type for Shelfkeeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by every Shelfkeeper crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("database open error: {0}")]
    DatabaseOpen(#[from] redb::DatabaseError),

    #[error("database error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("database error: {0}")]
    Table(#[from] redb::TableError),

    #[error("database error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("database error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}
