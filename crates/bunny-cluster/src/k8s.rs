//! Kubernetes port-forward tunnel to a broker pod.
//!
//! The tunnel binds an ephemeral port on `127.0.0.1` and forwards every
//! accepted connection to port 15672 of the first (by name) pod matching the
//! instance labels. Each local connection gets its own port-forward stream.

use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::K8sParameters;
use crate::error::{ClusterError, Result};
use crate::transport::Transport;

/// Management port inside the pod.
pub const REMOTE_PORT: u16 = 15672;

/// How long the first port-forward may take to come up.
pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Label every broker pod of the chart carries.
const INSTANCE_LABEL: &str = "app.kubernetes.io/instance=rabbitmq";

/// A running port-forward. Dropping it closes the tunnel.
#[derive(Debug)]
pub struct K8sTunnel {
    uri: String,
    pod: String,
    shutdown: CancellationToken,
}

impl K8sTunnel {
    /// Discover a broker pod and open a local tunnel to it.
    pub async fn open(params: &K8sParameters, cancel: &CancellationToken) -> Result<Self> {
        info!(
            context = %params.context,
            namespace = %params.namespace,
            instance = %params.name,
            "creating k8s connection"
        );

        let client = client_for(&params.context).await?;
        let pods: Api<Pod> = if params.namespace.is_empty() {
            Api::default_namespaced(client)
        } else {
            Api::namespaced(client, &params.namespace)
        };

        let selector = label_selector(&params.name);
        let list = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ClusterError::Kubernetes(format!("failed to list pods: {e}")))?;
        let names = list.items.into_iter().filter_map(|pod| pod.metadata.name);
        let pod = select_pod(names).ok_or_else(|| ClusterError::NoPods {
            name: params.name.clone(),
            namespace: params.namespace.clone(),
        })?;
        debug!(pod = %pod, "selected broker pod");

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();

        tokio::select! {
            ready = check_forward(&pods, &pod) => ready?,
            () = cancel.cancelled() => return Err(ClusterError::Cancelled),
            () = tokio::time::sleep(READY_TIMEOUT) => {
                return Err(ClusterError::timeout("port-forward", READY_TIMEOUT));
            }
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, pods, pod.clone(), shutdown.clone()));

        let uri = format!("http://127.0.0.1:{port}");
        info!(%uri, pod = %pod, "port-forward ready");
        Ok(Self { uri, pod, shutdown })
    }

    /// Pod the tunnel forwards to.
    #[must_use]
    pub fn pod(&self) -> &str {
        &self.pod
    }
}

impl Transport for K8sTunnel {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) {
        if !self.shutdown.is_cancelled() {
            info!(pod = %self.pod, "closing k8s connection");
            self.shutdown.cancel();
        }
    }
}

impl Drop for K8sTunnel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// `app.kubernetes.io/instance=rabbitmq,app.kubernetes.io/name={name}`.
#[must_use]
pub fn label_selector(name: &str) -> String {
    format!("{INSTANCE_LABEL},app.kubernetes.io/name={name}")
}

/// Lexicographically first pod name, so `rabbitmq-0` wins when present.
#[must_use]
pub fn select_pod(names: impl IntoIterator<Item = String>) -> Option<String> {
    names.into_iter().min()
}

async fn client_for(context: &str) -> Result<Client> {
    let path = dirs::home_dir()
        .map(|home| home.join(".kube").join("config"))
        .ok_or_else(|| ClusterError::Kubernetes("unable to locate home directory".into()))?;
    let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
        ClusterError::Kubernetes(format!("failed to read {}: {e}", path.display()))
    })?;
    let options = KubeConfigOptions {
        context: (!context.is_empty()).then(|| context.to_string()),
        ..KubeConfigOptions::default()
    };
    let config = Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .map_err(|e| ClusterError::Kubernetes(format!("failed to create k8s client config: {e}")))?;
    Client::try_from(config)
        .map_err(|e| ClusterError::Kubernetes(format!("failed to create k8s client: {e}")))
}

/// Open and immediately discard one forward to prove the pod is reachable.
async fn check_forward(pods: &Api<Pod>, pod: &str) -> Result<()> {
    let mut forwarder = pods
        .portforward(pod, &[REMOTE_PORT])
        .await
        .map_err(|e| ClusterError::PortForward(e.to_string()))?;
    let stream = forwarder.take_stream(REMOTE_PORT);
    forwarder.abort();
    match stream {
        Some(_) => Ok(()),
        None => Err(ClusterError::PortForward(format!(
            "no stream for port {REMOTE_PORT}"
        ))),
    }
}

async fn serve(listener: TcpListener, pods: Api<Pod>, pod: String, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (socket, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "failed to accept tunnel connection");
                continue;
            }
        };

        let pods = pods.clone();
        let pod = pod.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = forward(&pods, &pod, socket, &shutdown).await {
                debug!(%peer, error = %e, "tunnel connection ended with error");
            }
        });
    }
    debug!(pod = %pod, "tunnel accept loop stopped");
}

async fn forward(
    pods: &Api<Pod>,
    pod: &str,
    mut socket: TcpStream,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut forwarder = pods
        .portforward(pod, &[REMOTE_PORT])
        .await
        .map_err(|e| ClusterError::PortForward(e.to_string()))?;
    let mut upstream = forwarder
        .take_stream(REMOTE_PORT)
        .ok_or_else(|| ClusterError::PortForward(format!("no stream for port {REMOTE_PORT}")))?;

    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => {
            copied?;
        }
        () = shutdown.cancelled() => forwarder.abort(),
    }

    drop(upstream);
    forwarder
        .join()
        .await
        .map_err(|e| ClusterError::PortForward(e.to_string()))
}
