//! Error types for management API calls.

use thiserror::Error;

/// Result type alias for management API operations.
pub type Result<T> = std::result::Result<T, RmqError>;

/// Errors that can occur when talking to the RabbitMQ management API.
#[derive(Debug, Error)]
pub enum RmqError {
    /// The broker rejected the credentials.
    #[error("API responded with a 401 Unauthorized")]
    Unauthorized,

    /// The API answered with an error status.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error text reported by the broker (or a synthesized one).
        message: String,
    },

    /// The endpoint URI could not be used to build request URLs.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// The endpoint as configured.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Network-level failure (connect, timeout, TLS, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RmqError {
    /// Creates an `Api` error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Creates an `InvalidEndpoint` error.
    #[must_use]
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Decode` error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Returns `true` if this error was caused by rejected credentials.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns `true` if the broker could not be reached at all.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_display() {
        assert_eq!(
            RmqError::Unauthorized.to_string(),
            "API responded with a 401 Unauthorized"
        );
    }

    #[test]
    fn test_api_error_display() {
        let err = RmqError::api(400, "inequivalent arg 'durable'");
        assert_eq!(err.to_string(), "API error 400: inequivalent arg 'durable'");
    }

    #[test]
    fn test_invalid_endpoint_display() {
        let err = RmqError::invalid_endpoint("mailto:x", "cannot be a base");
        assert_eq!(err.to_string(), "invalid endpoint 'mailto:x': cannot be a base");
    }

    #[test]
    fn test_classification() {
        assert!(RmqError::Unauthorized.is_auth_error());
        assert!(!RmqError::api(500, "boom").is_auth_error());
        assert!(!RmqError::decode("eof").is_transport_error());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RmqError>();
    }
}
