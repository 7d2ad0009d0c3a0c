use std::time::Duration;

/// Failure reported by an external collaborator (chat service, DM delivery).
/// The engine never retries on these; the classification only feeds logging.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("gateway closed")]
    Closed,
}

impl GatewayError {
    /// Whether a caller with a retry policy could reasonably try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Rejected(_) => "rejected",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::Unavailable("503".into()).is_retryable());
        assert!(GatewayError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!GatewayError::Forbidden("dms closed".into()).is_retryable());
        assert!(!GatewayError::Closed.is_retryable());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GatewayError::Forbidden("x".into()).error_kind(), "forbidden");
        assert_eq!(GatewayError::NotFound("x".into()).error_kind(), "not_found");
        assert_eq!(GatewayError::Closed.error_kind(), "closed");
    }

    #[test]
    fn display_includes_detail() {
        let err = GatewayError::Rejected("unknown emoji".into());
        assert_eq!(err.to_string(), "rejected: unknown emoji");
    }
}
