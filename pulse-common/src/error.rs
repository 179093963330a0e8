//! Common error types for the pulse services

use thiserror::Error;

/// Common result type for pulse operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the API server and the workers.
///
/// Adapters classify low-level failures into these kinds; the HTTP layer
/// owns the mapping to status codes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required: {0}")]
    AuthMissing(String),

    #[error("Insufficient privileges: {0}")]
    AuthInsufficient(String),

    #[error("Payload too large: {0}")]
    TooLarge(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures worth retrying (transient connection trouble,
    /// pool exhaustion, a locked SQLite file). Constraint violations and
    /// logical errors are never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                if let sqlx::Error::Database(inner) = db_err {
                    let msg = inner.message();
                    return msg.contains("database is locked") || msg.contains("busy");
                }
                matches!(
                    db_err,
                    sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
                )
            }
            Error::Unavailable(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }
}
