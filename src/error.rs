use thiserror::Error;

/// Errors produced by query and mutation functions.
///
/// The taxonomy drives the retry policy: aborts are never retried and never
/// surfaced, HTTP client errors other than timeout/rate-limit are terminal,
/// and anything without an extractable status is assumed transient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The fetch was superseded or its owner went away.
    #[error("query aborted")]
    Aborted,

    /// An HTTP response carrying a non-success status.
    #[error("http status {status}: {message}")]
    Http {
        /// The response status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// A failure with no extractable status (connection reset, DNS, ...).
    #[error("transport error: {0}")]
    Transport(String),
}

impl QueryError {
    /// An HTTP error with the given status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        QueryError::Http {
            status,
            message: message.into(),
        }
    }

    /// A statusless transport failure.
    pub fn transport(message: impl Into<String>) -> Self {
        QueryError::Transport(message.into())
    }

    /// The HTTP status, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error is a cancellation.
    pub fn is_abort(&self) -> bool {
        matches!(self, QueryError::Aborted)
    }

    /// Whether another attempt may succeed.
    ///
    /// Client errors in `[400, 500)` are terminal, except `408` (timeout) and
    /// `429` (rate limit). Statusless errors are assumed transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Aborted => false,
            QueryError::Http { status, .. } => {
                !((400..500).contains(status) && *status != 408 && *status != 429)
            }
            QueryError::Transport(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_terminal() {
        for status in [400, 401, 403, 404, 422] {
            assert!(
                !QueryError::http(status, "no").is_retryable(),
                "{status} should be terminal"
            );
        }
    }

    #[test]
    fn timeout_and_rate_limit_are_retryable() {
        assert!(QueryError::http(408, "timeout").is_retryable());
        assert!(QueryError::http(429, "slow down").is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(QueryError::http(500, "ise").is_retryable());
        assert!(QueryError::http(503, "unavailable").is_retryable());
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(QueryError::transport("connection reset").is_retryable());
    }

    #[test]
    fn aborts_are_never_retryable() {
        assert!(!QueryError::Aborted.is_retryable());
        assert!(QueryError::Aborted.is_abort());
    }

    #[test]
    fn status_extraction() {
        assert_eq!(QueryError::http(404, "nope").status(), Some(404));
        assert_eq!(QueryError::transport("down").status(), None);
        assert_eq!(QueryError::Aborted.status(), None);
    }
}
