use thiserror::Error;

use crate::transaction::TransactionState;

#[derive(Error, Debug)]
pub enum ThothError {
    /// The transaction lost a conflict and left nothing behind. Start a new one.
    #[error("Transaction conflict detected, retry with a new transaction")]
    Retryable,

    #[error("Too many rows in one transaction: {rows} > {limit}")]
    TooManyRows { rows: usize, limit: usize },

    #[error("Lock is held by a live transaction")]
    LockNotExpired,

    #[error("Failed to clean lock after {attempts} attempts")]
    CleanLockFailed { attempts: usize },

    #[error("Region moved: {0}")]
    WrongRegion(String),

    #[error("Invalid lock encoding: {0}")]
    InvalidLock(String),

    #[error("Invalid mutation: {0}")]
    InvalidMutation(String),

    #[error("Commit of {table}/{row} at {commit_ts} rejected (primary: {primary})")]
    CommitRejected {
        table: String,
        row: String,
        commit_ts: u64,
        primary: bool,
    },

    #[error("Operation not allowed in transaction state {0:?}")]
    InvalidState(TransactionState),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Oracle error: {0}")]
    OracleError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl ThothError {
    /// True for conflicts that the caller can answer by running a fresh transaction.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ThothError::Retryable | ThothError::CleanLockFailed { .. } | ThothError::LockNotExpired
        )
    }
}

impl From<bincode::Error> for ThothError {
    fn from(e: bincode::Error) -> Self {
        ThothError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ThothError>;
