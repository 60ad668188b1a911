use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Quota exceeded for user {id}: used {used} + {requested} > limit {limit}")]
    QuotaExceeded {
        id: u64,
        used: i64,
        requested: i64,
        limit: i64,
    },

    #[error("Negative used space for user {id}: used {used} - {requested} < 0")]
    NegativeUsage { id: u64, used: i64, requested: i64 },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Operation canceled")]
    Canceled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
