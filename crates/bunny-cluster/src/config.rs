//! Persisted cluster definitions.
//!
//! Each cluster lives in `clusters/{name}.yaml` under the config directory;
//! the file stem is the cluster name. Files written by older releases carry
//! a bare `connection.uri`, which is read as a direct connection and
//! rewritten in the current layout on the next save.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bunny_rmq::VhostInfo;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::{ClusterError, Result};

/// Upper bound on remembered favorite vhosts.
pub const MAX_FAVORITE_VHOSTS: usize = 9;

/// A cluster config shared between the manager and a live cluster.
pub type SharedClusterConfig = Arc<RwLock<ClusterConfig>>;

/// Connect straight to a management endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectParameters {
    /// Management API base URI.
    pub uri: String,
}

/// Reach the broker through a Kubernetes port-forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sParameters {
    /// Kubeconfig context.
    #[serde(default)]
    pub context: String,
    /// Namespace the broker runs in.
    #[serde(default)]
    pub namespace: String,
    /// Value of the `app.kubernetes.io/name` label.
    pub name: String,
}

/// How the management endpoint is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Plain URI.
    Direct(DirectParameters),
    /// Port-forward to a pod.
    K8s(K8sParameters),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(p) => write!(f, "Direct connection to {}", p.uri),
            Self::K8s(p) => write!(
                f,
                "K8s connection, context {}, namespace {}, instance {}",
                p.context, p.namespace, p.name
            ),
        }
    }
}

/// Endpoint plus credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConnection", into = "RawConnection")]
pub struct ConnectionParameters {
    /// Where to connect.
    pub endpoint: Endpoint,
    /// Management user.
    pub username: String,
    /// Management password.
    pub password: String,
}

impl ConnectionParameters {
    /// Direct connection parameters.
    #[must_use]
    pub fn direct(uri: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Direct(DirectParameters { uri: uri.into() }),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Kubernetes port-forward parameters.
    #[must_use]
    pub fn k8s(
        context: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: Endpoint::K8s(K8sParameters {
                context: context.into(),
                namespace: namespace.into(),
                name: name.into(),
            }),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check the endpoint is usable.
    pub fn validate(&self) -> Result<()> {
        match &self.endpoint {
            Endpoint::Direct(p) => validate_uri(&p.uri),
            Endpoint::K8s(p) if p.name.trim().is_empty() => Err(ClusterError::InvalidParameters(
                "k8s instance name must not be empty".into(),
            )),
            Endpoint::K8s(_) => Ok(()),
        }
    }
}

impl fmt::Display for ConnectionParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.endpoint.fmt(f)
    }
}

/// On-disk shape of `connection`, including the legacy `uri` key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConnection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    direct: Option<DirectParameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    k8s: Option<K8sParameters>,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl TryFrom<RawConnection> for ConnectionParameters {
    type Error = String;

    fn try_from(raw: RawConnection) -> std::result::Result<Self, Self::Error> {
        let endpoint = match (raw.uri, raw.direct, raw.k8s) {
            (Some(uri), _, _) if !uri.is_empty() => Endpoint::Direct(DirectParameters { uri }),
            (_, Some(direct), _) => Endpoint::Direct(direct),
            (_, None, Some(k8s)) => Endpoint::K8s(k8s),
            _ => return Err("no connection parameters provided".to_string()),
        };
        Ok(Self {
            endpoint,
            username: raw.username,
            password: raw.password,
        })
    }
}

impl From<ConnectionParameters> for RawConnection {
    fn from(params: ConnectionParameters) -> Self {
        let (direct, k8s) = match params.endpoint {
            Endpoint::Direct(d) => (Some(d), None),
            Endpoint::K8s(k) => (None, Some(k)),
        };
        Self {
            uri: None,
            direct,
            k8s,
            username: params.username,
            password: params.password,
        }
    }
}

/// A cluster definition as persisted in `clusters/{name}.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    #[serde(skip)]
    name: String,
    #[serde(skip)]
    file: PathBuf,
    /// Endpoint and credentials.
    pub connection: ConnectionParameters,
    /// Selected vhost; empty means all.
    #[serde(default)]
    pub vhost: String,
    /// Recently used vhosts, oldest first.
    #[serde(default)]
    pub favorite_vhosts: Vec<String>,
}

impl ClusterConfig {
    /// New config that will be saved to `file`.
    #[must_use]
    pub fn new(name: impl Into<String>, file: impl Into<PathBuf>, connection: ConnectionParameters) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            connection,
            vhost: String::new(),
            favorite_vhosts: Vec::new(),
        }
    }

    /// Read a cluster file. The name is the file stem.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ClusterError::config(path, e))?;
        let mut config: Self =
            serde_yaml::from_str(&content).map_err(|e| ClusterError::config(path, e))?;
        config.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        config.file = path.to_path_buf();
        Ok(config)
    }

    /// Write the config to its file, creating the directory if needed.
    pub fn save(&self) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.file, content)?;
        info!(cluster = %self.name, "saved cluster config");
        Ok(())
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Select `vhost`, remembering it as a favorite when there is room.
    /// Returns `false` when it was already selected.
    pub(crate) fn select_vhost(&mut self, vhost: &str) -> bool {
        if self.vhost == vhost {
            return false;
        }
        self.vhost = vhost.to_string();
        if !vhost.is_empty()
            && self.favorite_vhosts.len() < MAX_FAVORITE_VHOSTS
            && !self.favorite_vhosts.iter().any(|f| f == vhost)
        {
            self.favorite_vhosts.push(vhost.to_string());
        }
        true
    }

    /// Drop `name` from the favorites. Returns whether it was present.
    pub(crate) fn remove_favorite(&mut self, name: &str) -> bool {
        let before = self.favorite_vhosts.len();
        self.favorite_vhosts.retain(|f| f != name);
        self.favorite_vhosts.len() != before
    }

    /// Drop favorites that are not in `vhosts`. Returns whether any were dropped.
    pub(crate) fn sanitize_favorites(&mut self, vhosts: &[VhostInfo]) -> bool {
        let before = self.favorite_vhosts.len();
        self.favorite_vhosts
            .retain(|f| vhosts.iter().any(|v| &v.name == f));
        let pruned = self.favorite_vhosts.len() != before;
        if pruned {
            info!(cluster = %self.name, "sanitized favorite vhosts");
        }
        pruned
    }
}

/// Check that `name` is usable as a portable file name.
pub fn validate_cluster_name(name: &str) -> Result<()> {
    let reject = |reason: &str| Err(ClusterError::invalid_name(name, reason));

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name == "." || name == ".." {
        return reject("must not be . or ..");
    }
    if name.starts_with('.') {
        return reject("must not start with a dot");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("must not contain path separators");
    }
    if name.contains('\0') {
        return reject("must not contain NUL");
    }
    if name.trim().is_empty() {
        return reject("must not be blank");
    }
    if name.ends_with(' ') || name.ends_with('.') {
        return reject("must not end with a space or dot");
    }
    if name.chars().any(|c| "<>:\"/\\|?*".contains(c)) {
        return reject("must not contain any of <>:\"/\\|?*");
    }
    if name.chars().any(char::is_control) {
        return reject("must not contain control characters");
    }

    let base = name.split('.').next().unwrap_or(name);
    let upper = base.trim().to_uppercase();
    let reserved = matches!(upper.as_str(), "CON" | "PRN" | "AUX" | "NUL")
        || (upper.len() == 4
            && (upper.starts_with("COM") || upper.starts_with("LPT"))
            && upper.as_bytes()[3].is_ascii_digit()
            && upper.as_bytes()[3] != b'0');
    if reserved {
        return reject("is a reserved device name");
    }

    Ok(())
}

/// Check that `uri` is an absolute `http`/`https` URL with a host.
pub fn validate_uri(uri: &str) -> Result<()> {
    let parsed = Url::parse(uri)
        .map_err(|e| ClusterError::InvalidParameters(format!("invalid URI '{uri}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ClusterError::InvalidParameters(format!(
            "invalid URI '{uri}': scheme must be http or https"
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ClusterError::InvalidParameters(format!(
            "invalid URI '{uri}': missing host"
        )));
    }
    Ok(())
}
