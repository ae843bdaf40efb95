//! The set of configured clusters and the single active connection.
//!
//! ```text
//! {config_dir}/
//! ├── clusters.yaml        activeCluster: prod
//! └── clusters/
//!     ├── prod.yaml
//!     └── staging.yml
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bunny_rmq::{DEFAULT_REQUEST_TIMEOUT, ManagementClient};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cluster::Cluster;
use crate::config::{
    ClusterConfig, ConnectionParameters, SharedClusterConfig, validate_cluster_name,
};
use crate::error::{ClusterError, Result};
use crate::listeners::ListenerSet;
use crate::transport;

/// Sub-directory holding one file per cluster.
pub const CLUSTERS_DIR: &str = "clusters";

/// File remembering the active cluster.
pub const POINTER_FILE: &str = "clusters.yaml";

/// Boxed future returned by [`Connector::connect`].
pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<Arc<Cluster>>> + Send + 'a>>;

/// Builds a [`Cluster`] from its config.
pub trait Connector: Send + Sync {
    /// Resolve the transport, build a client and fetch initial state.
    fn connect<'a>(
        &'a self,
        config: SharedClusterConfig,
        cancel: &'a CancellationToken,
    ) -> ConnectFuture<'a>;
}

/// Connects over HTTP(S) through the configured transport.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl HttpConnector {
    /// Connector whose management requests time out after `request_timeout`.
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Connector for HttpConnector {
    fn connect<'a>(
        &'a self,
        config: SharedClusterConfig,
        cancel: &'a CancellationToken,
    ) -> ConnectFuture<'a> {
        Box::pin(async move {
            let params = config.read().connection.clone();
            let transport = transport::open(&params, cancel).await?;
            let client = match ManagementClient::with_timeout(
                transport.uri(),
                &params.username,
                &params.password,
                self.request_timeout,
            ) {
                Ok(client) => client,
                Err(e) => {
                    transport.close();
                    return Err(e.into());
                }
            };
            Cluster::from_parts(config, transport, Arc::new(client)).await
        })
    }
}

/// Told whenever the active cluster changes.
pub trait ManagerListener: Send + Sync {
    /// `None` after a disconnect.
    fn on_active_cluster_changed(&self, cluster: Option<&Arc<Cluster>>);
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClustersPointer {
    #[serde(default)]
    active_cluster: String,
}

struct ManagerState {
    configs: HashMap<String, SharedClusterConfig>,
    active_name: String,
    cluster: Option<Arc<Cluster>>,
}

/// Owns cluster configs and switches the active cluster.
pub struct Manager {
    config_dir: PathBuf,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    state: RwLock<ManagerState>,
    switch_lock: Mutex<()>,
    listeners: ListenerSet<dyn ManagerListener>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Manager")
            .field("config_dir", &self.config_dir)
            .field("clusters", &state.configs.len())
            .field("active", &state.active_name)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Load every cluster under `config_dir` and resolve the active one.
    ///
    /// Unreadable cluster files are logged and skipped. When the remembered
    /// active cluster is missing, the first cluster by name takes its place.
    pub fn load(
        config_dir: impl Into<PathBuf>,
        connector: Arc<dyn Connector>,
        connect_timeout: Duration,
    ) -> Self {
        let config_dir = config_dir.into();
        let configs = load_clusters(&config_dir.join(CLUSTERS_DIR));
        let pointer = read_pointer(&config_dir.join(POINTER_FILE));
        let active_name = resolve_active(pointer.active_cluster, &configs);

        info!(
            dir = %config_dir.display(),
            clusters = configs.len(),
            active = %active_name,
            "loaded cluster configs"
        );

        Self {
            config_dir,
            connector,
            connect_timeout,
            state: RwLock::new(ManagerState {
                configs,
                active_name,
                cluster: None,
            }),
            switch_lock: Mutex::new(()),
            listeners: ListenerSet::new(),
        }
    }

    /// Configuration directory.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Snapshot of every config, sorted by name.
    #[must_use]
    pub fn clusters(&self) -> Vec<ClusterConfig> {
        let state = self.state.read();
        let mut configs: Vec<ClusterConfig> =
            state.configs.values().map(|c| c.read().clone()).collect();
        configs.sort_by(|a, b| a.name().cmp(b.name()));
        configs
    }

    /// Shared config of one cluster.
    #[must_use]
    pub fn cluster_config(&self, name: &str) -> Option<SharedClusterConfig> {
        self.state.read().configs.get(name).cloned()
    }

    /// Name of the active (or, before connecting, the remembered) cluster.
    #[must_use]
    pub fn active_cluster_name(&self) -> String {
        self.state.read().active_name.clone()
    }

    /// The connected cluster, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Cluster>> {
        self.state.read().cluster.clone()
    }

    /// Connect to `name` and make it the active cluster.
    ///
    /// Fails with [`ClusterError::NotFound`] for unknown names. Connection
    /// failures are wrapped in [`ClusterError::Connect`]. Either way the
    /// previously active cluster stays in place.
    pub async fn connect_to_cluster(&self, name: &str) -> Result<Arc<Cluster>> {
        let config = self
            .cluster_config(name)
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;

        info!(cluster = %name, "connecting to cluster");
        let cancel = CancellationToken::new();
        let connect = self.connector.connect(config, &cancel);
        let cluster = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(cluster)) => cluster,
            Ok(Err(e)) => {
                warn!(cluster = %name, error = %e, "failed to connect to cluster");
                return Err(ClusterError::connect(name, e));
            }
            Err(_) => {
                cancel.cancel();
                warn!(cluster = %name, "timed out connecting to cluster");
                return Err(ClusterError::connect(
                    name,
                    ClusterError::timeout("connect", self.connect_timeout),
                ));
            }
        };

        self.set_cluster(Some(Arc::clone(&cluster)));
        Ok(cluster)
    }

    /// Replace the active cluster.
    ///
    /// The previous cluster is stopped before the new one starts. The
    /// remembered active name is persisted only when it changes.
    pub fn set_cluster(&self, cluster: Option<Arc<Cluster>>) {
        let switch = self.switch_lock.lock();

        let new_name = cluster
            .as_ref()
            .map(|c| c.name().to_string())
            .unwrap_or_default();
        let (previous, name_changed) = {
            let mut state = self.state.write();
            let name_changed = state.active_name != new_name;
            state.active_name.clone_from(&new_name);
            (std::mem::replace(&mut state.cluster, cluster.clone()), name_changed)
        };

        if let Some(previous) = previous {
            let same = cluster.as_ref().is_some_and(|c| Arc::ptr_eq(c, &previous));
            if !same {
                previous.stop();
            }
        }
        if let Some(cluster) = &cluster {
            cluster.start();
        }
        if name_changed {
            self.save_pointer(&new_name);
        }
        drop(switch);

        for listener in self.listeners.snapshot() {
            listener.on_active_cluster_changed(cluster.as_ref());
        }
    }

    /// Stop the active cluster and forget it.
    pub fn disconnect(&self) {
        self.set_cluster(None);
    }

    /// Add a new cluster definition and persist it. Does not connect.
    ///
    /// The name is claimed before the file is written; if saving fails the
    /// claim is released again.
    pub fn create(&self, name: &str, params: ConnectionParameters) -> Result<SharedClusterConfig> {
        validate_cluster_name(name)?;
        params.validate()?;

        let file = self
            .config_dir
            .join(CLUSTERS_DIR)
            .join(format!("{name}.yaml"));
        let shared = Arc::new(RwLock::new(ClusterConfig::new(name, file, params)));

        {
            let mut state = self.state.write();
            if state.configs.contains_key(name) {
                return Err(ClusterError::AlreadyExists(name.to_string()));
            }
            state.configs.insert(name.to_string(), Arc::clone(&shared));
        }

        let snapshot = shared.read().clone();
        if let Err(e) = snapshot.save() {
            let mut state = self.state.write();
            if state
                .configs
                .get(name)
                .is_some_and(|claimed| Arc::ptr_eq(claimed, &shared))
            {
                state.configs.remove(name);
            }
            return Err(e);
        }

        info!(cluster = %name, "created cluster");
        Ok(shared)
    }

    /// Remove a cluster definition and its file.
    pub fn delete(&self, name: &str) -> Result<()> {
        let removed = self
            .state
            .write()
            .configs
            .remove(name)
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;

        let file = removed.read().file().to_path_buf();
        if let Err(e) = std::fs::remove_file(&file) {
            debug!(file = %file.display(), error = %e, "failed to remove cluster file");
        }
        info!(cluster = %name, "deleted cluster");
        Ok(())
    }

    /// Subscribe to active-cluster changes. Only a weak reference is kept.
    pub fn add_listener(&self, listener: Weak<dyn ManagerListener>) {
        self.listeners.add(listener);
    }

    /// Unsubscribe the listener at this address.
    pub fn remove_listener<L: ?Sized>(&self, listener: &L) -> bool {
        self.listeners.remove(listener)
    }

    fn save_pointer(&self, active: &str) {
        let path = self.config_dir.join(POINTER_FILE);
        let pointer = ClustersPointer {
            active_cluster: active.to_string(),
        };
        let result = serde_yaml::to_string(&pointer)
            .map_err(ClusterError::from)
            .and_then(|content| {
                std::fs::create_dir_all(&self.config_dir)?;
                std::fs::write(&path, content)?;
                Ok(())
            });
        match result {
            Ok(()) => info!(file = %path.display(), "saved clusters config"),
            Err(e) => error!(file = %path.display(), error = %e, "failed to save clusters config"),
        }
    }
}

fn load_clusters(dir: &Path) -> HashMap<String, SharedClusterConfig> {
    let mut configs = HashMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "no clusters directory");
            return configs;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || !is_yaml(&path) {
            continue;
        }
        match ClusterConfig::load(&path) {
            Ok(config) => {
                debug!(cluster = %config.name(), file = %path.display(), "loaded cluster config");
                configs.insert(config.name().to_string(), Arc::new(RwLock::new(config)));
            }
            Err(e) => error!(file = %path.display(), error = %e, "failed to load cluster config"),
        }
    }
    configs
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn read_pointer(path: &Path) -> ClustersPointer {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(file = %path.display(), error = %e, "failed to read clusters config");
            return ClustersPointer::default();
        }
    };
    serde_yaml::from_str::<Option<ClustersPointer>>(&content)
        .unwrap_or_else(|e| {
            error!(file = %path.display(), error = %e, "failed to parse clusters config");
            None
        })
        .unwrap_or_default()
}

fn resolve_active(remembered: String, configs: &HashMap<String, SharedClusterConfig>) -> String {
    if configs.contains_key(&remembered) {
        return remembered;
    }
    if !remembered.is_empty() {
        warn!(cluster = %remembered, "active cluster not found");
    }
    configs.keys().min().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::PollerState;
    use crate::testing::FakeConnector;

    const PROD_YAML: &str = "connection:\n  direct:\n    uri: http://localhost:15672\n  username: guest\n  password: guest\n";

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }

    fn manager(dir: &Path, connector: &Arc<FakeConnector>) -> Manager {
        let connector: Arc<dyn Connector> = Arc::clone(connector) as Arc<dyn Connector>;
        Manager::load(dir, connector, Duration::from_secs(5))
    }

    #[derive(Default)]
    struct Switches {
        seen: Mutex<Vec<Option<String>>>,
        previous: Mutex<Option<Arc<Cluster>>>,
        previous_was_stopped: Mutex<Vec<bool>>,
    }

    impl ManagerListener for Switches {
        fn on_active_cluster_changed(&self, cluster: Option<&Arc<Cluster>>) {
            self.seen.lock().push(cluster.map(|c| c.name().to_string()));
            let mut previous = self.previous.lock();
            if let Some(previous) = previous.as_ref() {
                self.previous_was_stopped
                    .lock()
                    .push(previous.poller_state() == PollerState::Stopped);
            }
            *previous = cluster.cloned();
        }
    }

    #[test]
    fn test_load_falls_back_when_pointer_is_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/prod.yaml", PROD_YAML);
        write(dir.path(), "clusters.yaml", "activeCluster: staging\n");

        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));

        let names: Vec<String> = manager
            .clusters()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["prod".to_string()]);
        assert_eq!(manager.active_cluster_name(), "prod");
        let prod = manager.cluster_config("prod").expect("prod");
        assert_eq!(prod.read().connection.username, "guest");
    }

    #[test]
    fn test_load_skips_bad_and_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/b.yml", PROD_YAML);
        write(dir.path(), "clusters/a.yaml", PROD_YAML);
        write(dir.path(), "clusters/broken.yaml", "connection: [oops\n");
        write(dir.path(), "clusters/notes.txt", PROD_YAML);
        write(dir.path(), "clusters/nested/c.yaml", PROD_YAML);

        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));

        let names: Vec<String> = manager
            .clusters()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(manager.active_cluster_name(), "a");
    }

    #[test]
    fn test_load_empty_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));
        assert!(manager.clusters().is_empty());
        assert_eq!(manager.active_cluster_name(), "");
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_load_keeps_valid_pointer() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/a.yaml", PROD_YAML);
        write(dir.path(), "clusters/b.yaml", PROD_YAML);
        write(dir.path(), "clusters.yaml", "activeCluster: b\n");

        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));
        assert_eq!(manager.active_cluster_name(), "b");
    }

    #[tokio::test]
    async fn test_connect_unknown_cluster_keeps_active() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/prod.yaml", PROD_YAML);
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(dir.path(), &connector);

        let prod = manager.connect_to_cluster("prod").await.expect("connect");
        let err = manager.connect_to_cluster("nope").await.unwrap_err();

        assert!(err.is_not_found());
        let current = manager.current().expect("still connected");
        assert!(Arc::ptr_eq(&current, &prod));
        assert_eq!(manager.active_cluster_name(), "prod");
        assert_eq!(prod.poller_state(), PollerState::Running);
        assert_eq!(connector.connect_count(), 1);
        manager.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_stops_previous_before_starting_next() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/a.yaml", PROD_YAML);
        write(dir.path(), "clusters/b.yaml", PROD_YAML);
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(dir.path(), &connector);
        let switches = Arc::new(Switches::default());
        manager.add_listener(Arc::downgrade(&switches) as Weak<dyn ManagerListener>);

        let a = manager.connect_to_cluster("a").await.expect("connect a");
        let b = manager.connect_to_cluster("b").await.expect("connect b");

        assert_eq!(a.poller_state(), PollerState::Stopped);
        assert_eq!(b.poller_state(), PollerState::Running);
        assert_eq!(*switches.previous_was_stopped.lock(), vec![true]);
        assert_eq!(
            *switches.seen.lock(),
            vec![Some("a".to_string()), Some("b".to_string())]
        );

        let a_probes = connector.api("a").probe_count();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.api("a").probe_count(), a_probes);
        assert!(connector.api("b").probe_count() > 1);
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_pointer_is_persisted_on_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/a.yaml", PROD_YAML);
        write(dir.path(), "clusters/b.yaml", PROD_YAML);
        let connector = Arc::new(FakeConnector::new());
        let manager = manager(dir.path(), &connector);
        let pointer = dir.path().join(POINTER_FILE);

        manager.connect_to_cluster("a").await.expect("connect a");
        assert!(!pointer.exists(), "active name did not change");

        manager.connect_to_cluster("b").await.expect("connect b");
        let content = std::fs::read_to_string(&pointer).expect("pointer");
        assert!(content.contains("activeCluster: b"));

        manager.disconnect();
        assert!(manager.current().is_none());
        assert_eq!(manager.active_cluster_name(), "");
        let content = std::fs::read_to_string(&pointer).expect("pointer");
        assert!(content.contains("activeCluster: ''"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_wrapped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/prod.yaml", PROD_YAML);
        let connector = Arc::new(FakeConnector::new());
        connector.api("prod").set_failing(true);
        let manager = manager(dir.path(), &connector);

        let err = manager.connect_to_cluster("prod").await.unwrap_err();

        assert!(err.is_connect_error());
        assert!(err.to_string().starts_with("failed to connect to cluster prod"));
        assert!(manager.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_times_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "clusters/prod.yaml", PROD_YAML);
        let connector = Arc::new(FakeConnector::new().with_delay(Duration::from_secs(60)));
        let manager = manager(dir.path(), &connector);

        let err = manager.connect_to_cluster("prod").await.unwrap_err();

        match err {
            ClusterError::Connect { source, .. } => {
                assert!(matches!(*source, ClusterError::Timeout { timeout_secs: 5, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_create_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));

        manager
            .create(
                "dev",
                ConnectionParameters::direct("http://localhost:15672", "guest", "guest"),
            )
            .expect("create");
        let file = dir.path().join("clusters").join("dev.yaml");
        assert!(file.exists());
        assert_eq!(ClusterConfig::load(&file).expect("load").name(), "dev");

        let duplicate = manager.create(
            "dev",
            ConnectionParameters::direct("http://other:15672", "u", "p"),
        );
        assert!(matches!(duplicate, Err(ClusterError::AlreadyExists(_))));

        manager.delete("dev").expect("delete");
        assert!(!file.exists());
        assert!(manager.clusters().is_empty());
        assert!(manager.delete("dev").unwrap_err().is_not_found());
    }

    #[test]
    fn test_concurrent_creates_of_one_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let manager = &manager;
                    scope.spawn(move || {
                        manager.create(
                            "dev",
                            ConnectionParameters::direct(
                                &format!("http://node-{i}:15672"),
                                "guest",
                                "guest",
                            ),
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("create thread panicked"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, ClusterError::AlreadyExists(_)))
        );
        assert_eq!(manager.clusters().len(), 1);
    }

    #[test]
    fn test_failed_save_releases_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("clusters"), "not a directory").expect("write");
        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));

        let params = ConnectionParameters::direct("http://localhost:15672", "guest", "guest");
        assert!(manager.create("dev", params).is_err());
        assert!(manager.cluster_config("dev").is_none());
    }

    #[test]
    fn test_create_validates_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), &Arc::new(FakeConnector::new()));

        let bad_name = manager.create(
            "../escape",
            ConnectionParameters::direct("http://localhost:15672", "u", "p"),
        );
        assert!(matches!(bad_name, Err(ClusterError::InvalidName { .. })));

        let bad_uri = manager.create("ok", ConnectionParameters::direct("localhost", "u", "p"));
        assert!(matches!(bad_uri, Err(ClusterError::InvalidParameters(_))));
        assert!(manager.clusters().is_empty());
    }
}
