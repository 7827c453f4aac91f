//! Error types for collection operations.

use thiserror::Error;

use crate::core::worker_pool::PoolError;

/// Errors produced by collaborators and collection phases.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Remote fetch failed (timeout, 5xx, connection reset).
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// Remote answered but the body did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Persistence sink rejected the record.
    #[error("persist failed: {0}")]
    Persist(String),
    /// Every attempt of a retried operation failed.
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error returned by the final attempt.
        last: Box<CollectorError>,
    },
    /// Worker pool could not be used.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    /// Invalid configuration value.
    #[error("config error: {0}")]
    Config(String),
    /// A phase terminated abnormally.
    #[error("phase aborted: {0}")]
    Phase(String),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON encode/decode failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CollectorError {
    /// Number of attempts recorded on this error, `1` when it was not retried.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::RetriesExhausted { attempts, .. } => *attempts,
            _ => 1,
        }
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
