//! Connection transports: how a management URI is obtained for a cluster.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ConnectionParameters, Endpoint};
use crate::error::{ClusterError, Result};
use crate::k8s::K8sTunnel;

/// A resolved path to a management endpoint.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Base URI of the management API.
    fn uri(&self) -> &str;

    /// Release whatever keeps the endpoint reachable. Idempotent.
    fn close(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn uri(&self) -> &str {
        (**self).uri()
    }

    fn close(&self) {
        (**self).close();
    }
}

/// Uses the configured URI verbatim.
#[derive(Debug, Clone)]
pub struct DirectTransport {
    uri: String,
}

impl DirectTransport {
    /// Wrap `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

impl Transport for DirectTransport {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) {}
}

/// Resolve `params` into a live transport.
///
/// Direct endpoints resolve immediately. Kubernetes endpoints discover a
/// broker pod and open a local port-forward, honoring `cancel` while waiting
/// for it to become ready. An already cancelled token fails with
/// [`ClusterError::Cancelled`] before anything is opened.
pub async fn open(
    params: &ConnectionParameters,
    cancel: &CancellationToken,
) -> Result<Box<dyn Transport>> {
    if cancel.is_cancelled() {
        return Err(ClusterError::Cancelled);
    }
    match &params.endpoint {
        Endpoint::Direct(direct) => {
            debug!(uri = %direct.uri, "using direct connection");
            Ok(Box::new(DirectTransport::new(&direct.uri)))
        }
        Endpoint::K8s(k8s) => Ok(Box::new(K8sTunnel::open(k8s, cancel).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;

    #[tokio::test]
    async fn test_direct_uri_is_verbatim() {
        let params = ConnectionParameters::direct("https://mq.example.com:15671/", "u", "p");
        let transport = open(&params, &CancellationToken::new())
            .await
            .expect("open");
        assert_eq!(transport.uri(), "https://mq.example.com:15671/");
        transport.close();
        transport.close();
        assert_eq!(transport.uri(), "https://mq.example.com:15671/");
    }

    #[tokio::test]
    async fn test_open_with_cancelled_token() {
        let params = ConnectionParameters::direct("http://localhost:15672", "u", "p");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = open(&params, &cancel).await.expect_err("cancelled");
        assert!(matches!(err, ClusterError::Cancelled));
        assert_eq!(err.to_string(), "operation cancelled");
    }

    #[test]
    fn test_arc_transport_delegates() {
        let inner = Arc::new(FakeTransport::new("http://h"));
        let boxed: Box<dyn Transport> = Box::new(Arc::clone(&inner));
        assert_eq!(boxed.uri(), "http://h");

        boxed.close();
        boxed.close();
        assert_eq!(inner.close_count(), 2);
    }
}
