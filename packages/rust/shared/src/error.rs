//! Error types for PostScout.
//!
//! Library crates use [`PostScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all PostScout operations.
#[derive(Debug, thiserror::Error)]
pub enum PostScoutError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Text could not be split within the configured limits.
    #[error("chunking error: {message}")]
    Chunking { message: String },

    /// A single post could not be enriched on the live path.
    #[error("enrichment failed for {post}: {message}")]
    Enrichment { post: String, message: String },

    /// The API asked us to slow down, optionally with an advised delay.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// Network or HTTP failure talking to the generative API.
    #[error("api error{}: {message}", status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Api { status: Option<u16>, message: String },

    /// A live request exceeded its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The bulk submission call failed.
    #[error("batch submission failed: {0}")]
    BatchSubmission(String),

    /// A status query for a bulk job failed.
    #[error("status check for job {job_id} failed: {message}")]
    BatchPoll { job_id: String, message: String },

    /// An API payload could not be decoded into an enrichment result.
    #[error("result parse error: {0}")]
    ResultParse(String),

    /// The chunk results for a post are incomplete or inconsistent.
    #[error("merge error for {post}: {message}")]
    Merge { post: String, message: String },

    /// Registry-level read/write failure.
    #[error("state error: {0}")]
    State(String),

    /// A single registry entry is unreadable; other entries are unaffected.
    #[error("state entry {job_id} at {path:?} is unusable: {message}")]
    StateEntry {
        job_id: String,
        path: PathBuf,
        message: String,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PostScoutError>;

impl PostScoutError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a chunking error from any displayable message.
    pub fn chunking(msg: impl Into<String>) -> Self {
        Self::Chunking {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an API error carrying an optional HTTP status.
    pub fn api(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: msg.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Rate limiting is transient too, but it is handled by its own policy
    /// (see [`Self::retry_after`]).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status: None, .. } => true,
            Self::Api {
                status: Some(code),
                ..
            } => *code == 408 || *code >= 500,
            Self::ResultParse(_) => true,
            _ => false,
        }
    }

    /// Whether this is a rate-limit signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-advised delay attached to a rate-limit signal, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PostScoutError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PostScoutError::api(Some(503), "unavailable");
        assert_eq!(err.to_string(), "api error (HTTP 503): unavailable");

        let err = PostScoutError::api(None, "connection reset");
        assert_eq!(err.to_string(), "api error: connection reset");
    }

    #[test]
    fn transient_classification() {
        assert!(PostScoutError::api(Some(500), "x").is_transient());
        assert!(PostScoutError::api(None, "x").is_transient());
        assert!(!PostScoutError::api(Some(400), "x").is_transient());
        assert!(!PostScoutError::api(Some(401), "x").is_transient());
        assert!(!PostScoutError::Timeout(Duration::from_secs(1)).is_transient());

        let limited = PostScoutError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
            message: "quota".into(),
        };
        assert!(limited.is_rate_limited());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(30)));
    }
}
