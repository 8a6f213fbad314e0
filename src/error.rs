//! Error types for cache operations.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific errors.
///
/// Expected conditions are not errors: a cache miss is `Ok(None)` from
/// lookup, and a metastore variant whose entity is gone resolves as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A numeric Cache-Control directive that could not be coerced.
    #[error("Malformed directive: {0}")]
    MalformedDirective(String),

    /// An unparseable HTTP date in `Date`, `Expires` or `Last-Modified`.
    #[error("Malformed {header} date: {value}")]
    MalformedDate {
        /// Header the value came from
        header: String,
        /// The offending value
        value: String,
    },

    /// Metastore or entitystore backend failure.
    #[error("Store backend error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
