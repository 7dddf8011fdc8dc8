use thiserror::Error;

/// Errors a data-store query can end with.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The blocking query task panicked or was cancelled.
    #[error("query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The connection mutex was poisoned by a panicking query.
    #[error("connection lock poisoned")]
    Poisoned,

    #[error("query timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The schema asked for something the store cannot express,
    /// e.g. a counter bound to an undefined segment.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
