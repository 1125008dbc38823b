//! Error types for a collection cycle.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias using [`CollectError`].
pub type Result<T> = std::result::Result<T, CollectError>;

/// Why a collection cycle failed.
#[derive(Error, Debug)]
pub enum CollectError {
    /// The upstream API answered 429; nothing is attempted until `until`.
    #[error("Rate limited until {until} ({remaining_secs}s remaining)")]
    RateLimited {
        until: DateTime<Utc>,
        remaining_secs: i64,
    },

    /// The request never produced a usable status (network, timeout) or got a non-2xx answer.
    #[error("Upstream request failed ({context}): {source}")]
    UpstreamRequestFailed {
        context: String,
        #[source]
        source: UpstreamFailure,
    },

    /// The API answered 2xx but the body lacks what we need.
    #[error("Malformed response ({context}): {reason}")]
    MalformedResponse { context: String, reason: String },
}

/// Underlying cause of an [`CollectError::UpstreamRequestFailed`].
#[derive(Error, Debug)]
pub enum UpstreamFailure {
    /// Connection, TLS, timeout or body transfer failure.
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx status other than 429.
    #[error("HTTP {0}")]
    Status(StatusCode),
}

impl CollectError {
    /// Create an upstream error from a transport failure.
    pub fn transport(context: impl Into<String>, err: reqwest::Error) -> Self {
        Self::UpstreamRequestFailed {
            context: context.into(),
            source: UpstreamFailure::Transport(err),
        }
    }

    /// Create an upstream error from an unexpected status.
    pub fn status(context: impl Into<String>, status: StatusCode) -> Self {
        Self::UpstreamRequestFailed {
            context: context.into(),
            source: UpstreamFailure::Status(status),
        }
    }

    /// Create a malformed-response error.
    pub fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is the rate-limited kind.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// End of the rate-limit window, if rate limited.
    pub fn blocked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::RateLimited { until, .. } => Some(*until),
            _ => None,
        }
    }

    /// Seconds a client should wait before retrying, if rate limited.
    ///
    /// Never negative, so it can go straight into a `Retry-After` header.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { remaining_secs, .. } => Some((*remaining_secs).max(0) as u64),
            _ => None,
        }
    }
}
