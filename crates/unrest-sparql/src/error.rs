use std::time::Duration;

/// Errors raised by the query client.
///
/// Every variant except [`UpstreamError::Malformed`] is transient and is
/// retried by [`crate::retry::run_with_retries`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    /// The attempt did not finish within the per-attempt budget.
    #[error("upstream attempt timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The endpoint answered 429 Too Many Requests.
    #[error("upstream rate limited the request")]
    RateLimited,

    /// Any other non-success HTTP status.
    #[error("upstream returned HTTP {0}")]
    Status(u16),

    /// Connection, TLS or body transfer failure.
    #[error("upstream network error: {0}")]
    Network(String),

    /// The response body is not a SPARQL JSON results document.
    #[error("upstream response is malformed: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }

    pub(crate) fn network(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_malformed_is_terminal() {
        assert!(UpstreamError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(UpstreamError::RateLimited.is_retryable());
        assert!(UpstreamError::Status(503).is_retryable());
        assert!(UpstreamError::Status(400).is_retryable());
        assert!(UpstreamError::Network("reset".into()).is_retryable());
        assert!(!UpstreamError::Malformed("no head".into()).is_retryable());
    }

    #[test]
    fn timeout_message_reports_millis() {
        let err = UpstreamError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "upstream attempt timed out after 1500ms");
    }
}
