//! Error types for cluster connectivity and management.

use std::path::PathBuf;

use bunny_rmq::RmqError;
use thiserror::Error;

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur while configuring, connecting to or managing clusters.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// No cluster with this name is configured.
    #[error("cluster {0} not found")]
    NotFound(String),

    /// A cluster with this name is already configured.
    #[error("cluster {0} already exists")]
    AlreadyExists(String),

    /// The name cannot be used as a cluster file name.
    #[error("invalid cluster name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Which rule it broke.
        reason: String,
    },

    /// Connection parameters are incomplete or malformed.
    #[error("invalid connection parameters: {0}")]
    InvalidParameters(String),

    /// Establishing a cluster failed.
    #[error("failed to connect to cluster {name}: {source}")]
    Connect {
        /// Cluster that could not be connected.
        name: String,
        /// What went wrong.
        #[source]
        source: Box<ClusterError>,
    },

    /// Kubernetes client or API failure.
    #[error("kubernetes error: {0}")]
    Kubernetes(String),

    /// No broker pod matched the label selector.
    #[error("no pods found for RabbitMQ instance {name} in namespace {namespace}")]
    NoPods {
        /// Instance name used in the selector.
        name: String,
        /// Namespace searched.
        namespace: String,
    },

    /// The port-forward could not be established.
    #[error("failed to start port-forward: {0}")]
    PortForward(String),

    /// An operation did not complete in time.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// What was being attempted.
        operation: String,
        /// Configured timeout in seconds.
        timeout_secs: u64,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Management API call failed.
    #[error(transparent)]
    Management(#[from] RmqError),

    /// A cluster file could not be read or parsed.
    #[error("failed to load {path}: {message}")]
    Config {
        /// File involved.
        path: PathBuf,
        /// Parse or read error.
        message: String,
    },

    /// YAML serialization failure.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Wraps `source` as a connection failure for cluster `name`.
    #[must_use]
    pub fn connect(name: impl Into<String>, source: ClusterError) -> Self {
        Self::Connect {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Creates an `InvalidName` error.
    #[must_use]
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Creates a `Config` error.
    #[must_use]
    pub fn config(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Returns `true` if the error means the named cluster does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns `true` if this error came from establishing a connection.
    #[must_use]
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_not_found_display() {
        let err = ClusterError::NotFound("prod".into());
        assert_eq!(err.to_string(), "cluster prod not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_connect_wraps_source() {
        let err = ClusterError::connect(
            "prod",
            ClusterError::NoPods {
                name: "rabbitmq".into(),
                namespace: "queues".into(),
            },
        );
        assert!(err.is_connect_error());
        assert_eq!(
            err.to_string(),
            "failed to connect to cluster prod: no pods found for RabbitMQ instance rabbitmq in namespace queues"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timeout_display() {
        let err = ClusterError::timeout("connect", Duration::from_secs(15));
        assert_eq!(err.to_string(), "connect timed out after 15s");
    }

    #[test]
    fn test_management_error_is_transparent() {
        let err: ClusterError = RmqError::Unauthorized.into();
        assert_eq!(err.to_string(), "API responded with a 401 Unauthorized");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClusterError>();
    }
}
