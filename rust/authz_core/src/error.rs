use thiserror::Error;

/// Errors surfaced by the permission engine and its stores.
#[derive(Error, Debug)]
pub enum AuthzError {
    /// A role or resource identifier was missing or blank.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("policy config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AuthzError>;

/// Errors raised by the persisted (redb) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("corrupt entry: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for AuthzError {
    fn from(e: serde_json::Error) -> Self {
        AuthzError::Config(e.to_string())
    }
}
