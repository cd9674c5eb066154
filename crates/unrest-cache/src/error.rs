//! Error types for the cache backends.
//!
//! These never reach request handlers: [`crate::CacheStore`] logs them and
//! degrades to a miss or a no-op.

/// Cache backend errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// SQLite/pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Creating the cache directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for cache backend operations.
pub type Result<T> = std::result::Result<T, CacheError>;
