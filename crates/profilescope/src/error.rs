//! Error types for the extraction engine.

use crate::types::Category;
use std::fmt;

/// Why an outbound request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The upstream answered with a non-success status.
    Status,
    /// The request exceeded its time budget.
    Timeout,
    /// Connection, TLS or body-read failure.
    Network,
    /// The target could not be turned into a URL.
    InvalidUrl,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Status => "status",
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::InvalidUrl => "invalid-url",
        };
        f.write_str(s)
    }
}

/// A failed fetch or probe. Returned by value, never raised past the fetcher.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("fetch failed ({kind}{}): {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
pub struct FetchFailure {
    /// HTTP status, when the upstream answered at all.
    pub status: Option<u16>,
    pub message: String,
    pub kind: FailureKind,
}

impl FetchFailure {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            kind: FailureKind::Status,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: FailureKind::Timeout,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: FailureKind::Network,
        }
    }

    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            kind: FailureKind::InvalidUrl,
        }
    }

    /// Transient failures are worth one more attempt: 5xx, 429, timeouts and
    /// connection errors.
    pub fn is_transient(&self) -> bool {
        match self.kind {
            FailureKind::Timeout | FailureKind::Network => true,
            FailureKind::Status => matches!(self.status, Some(s) if s >= 500 || s == 429),
            FailureKind::InvalidUrl => false,
        }
    }
}

/// All errors surfaced by the engine to its callers.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ScopeError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    /// The document text could not be turned into a usable tree.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The fetcher keeps timing out; callers should back off.
    #[error("Upstream degraded after {consecutive_timeouts} consecutive timeouts")]
    Degraded { consecutive_timeouts: u32 },

    /// Validation has not shown that the category exists, so it is not fetched.
    #[error("{category} of {subject} is not confirmed to exist")]
    Unconfirmed { subject: String, category: Category },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ScopeError {
    /// Whether the same request may succeed if issued again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScopeError::Fetch(f) => f.kind != FailureKind::InvalidUrl,
            ScopeError::Parse(_) | ScopeError::Degraded { .. } | ScopeError::Unconfirmed { .. } => true,
            ScopeError::InvalidSubject(_) | ScopeError::InvalidUrl(_) | ScopeError::Config(_) => false,
        }
    }
}

pub type ScopeResult<T> = Result<T, ScopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchFailure::status(503, "unavailable").is_transient());
        assert!(FetchFailure::status(429, "slow down").is_transient());
        assert!(!FetchFailure::status(404, "missing").is_transient());
        assert!(FetchFailure::timeout("10s").is_transient());
        assert!(!FetchFailure::invalid_url("::").is_transient());
    }

    #[test]
    fn test_display_includes_status() {
        let f = FetchFailure::status(502, "bad gateway");
        assert_eq!(f.to_string(), "fetch failed (status 502): bad gateway");
        let t = FetchFailure::timeout("slow");
        assert_eq!(t.to_string(), "fetch failed (timeout): slow");
    }

    #[test]
    fn test_scope_error_retryable() {
        assert!(ScopeError::Parse("empty".into()).is_retryable());
        assert!(!ScopeError::InvalidSubject("a b".into()).is_retryable());
        assert!(ScopeError::from(FetchFailure::status(404, "x")).is_retryable());
        assert!(!ScopeError::from(FetchFailure::invalid_url("x")).is_retryable());
    }
}
