//! Error types for the discovery runtime

use std::time::Duration;
use thiserror::Error;

/// Discovery error types
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Service registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Not found in registry: {0}")]
    NotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Registry backend error: {0}")]
    BackendError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },
}

impl DiscoveryError {
    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Whether retrying the same call later can reasonably succeed
    ///
    /// The background loops keep running on transient errors; callers that
    /// hit a non-transient error (bad configuration, malformed responses)
    /// should surface it instead of retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DiscoveryError::ConnectionFailed(_)
                | DiscoveryError::NetworkError(_)
                | DiscoveryError::Timeout { .. }
        )
    }
}

/// Result type for discovery operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DiscoveryError::RegistrationFailed("HTTP 500".to_string());
        assert_eq!(err.to_string(), "Service registration failed: HTTP 500");

        let err = DiscoveryError::NotFound("orders-abc".to_string());
        assert_eq!(err.to_string(), "Not found in registry: orders-abc");

        let err = DiscoveryError::timeout(Duration::from_secs(5), "heartbeat");
        assert_eq!(err.to_string(), "Operation timed out after 5s: heartbeat");
    }

    #[test]
    fn test_transient_classification() {
        assert!(DiscoveryError::NetworkError("reset".to_string()).is_transient());
        assert!(DiscoveryError::timeout(Duration::from_secs(1), "refresh").is_transient());
        assert!(!DiscoveryError::ConfigurationError("bad ttl".to_string()).is_transient());
        assert!(!DiscoveryError::BackendError("malformed response".to_string()).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: DiscoveryError = io.into();
        assert!(matches!(err, DiscoveryError::ConnectionFailed(_)));
        assert!(err.is_transient());
    }
}
