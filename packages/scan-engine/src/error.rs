//! Typed errors for the scan engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so the pipeline
//! controller can classify collaborator failures without string matching.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Row does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// Database driver failure
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Stored JSON could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An in-memory lock was poisoned by a panicking writer
    #[error("store lock poisoned")]
    Poisoned,
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(Box::new(err))
    }
}

/// Errors returned by the crawl collaborator.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Request timed out
    #[error("timeout crawling: {url}")]
    Timeout { url: String },

    /// Crawl service is throttling us
    #[error("rate limit exceeded")]
    RateLimited,

    /// The domain does not resolve or refuses connections
    #[error("domain not found: {domain}")]
    DomainNotFound { domain: String },

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Service answered with something we could not read
    #[error("invalid crawl response: {0}")]
    InvalidResponse(String),
}

/// Errors returned by the analysis collaborator.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis rate limit exceeded")]
    RateLimited,

    #[error("analysis request timed out")]
    Timeout,

    /// Model answered but the judgment was not in the expected shape
    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by the discovery (search) collaborator.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search rate limit exceeded")]
    RateLimited,

    #[error("search request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by the notification collaborator.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification rejected: {0}")]
    Rejected(String),

    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors surfaced by the engine's entry points (controller, poller).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
