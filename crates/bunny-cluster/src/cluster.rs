//! A live connection to one RabbitMQ cluster.
//!
//! A [`Cluster`] caches broker metadata and the vhost list, and once started
//! runs a background poller that re-fetches both every [`POLL_INTERVAL`] or
//! on demand. Availability is debounced: one failed probe marks the cluster
//! unavailable, but listeners only hear [`ClusterEvent::ConnectionLost`] on
//! the second consecutive failure.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bunny_rmq::{ConnectionInfo, ExchangeInfo, ManagementApi, QueueInfo, VhostInfo};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ClusterConfig, SharedClusterConfig};
use crate::error::Result;
use crate::listeners::ListenerSet;
use crate::transport::Transport;

/// Time between unsolicited probes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive failures after which `ConnectionLost` fires.
const LOST_THRESHOLD: u32 = 2;

/// Broker metadata shown in the UI header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Information {
    /// Configured cluster name.
    pub name: String,
    /// Management user.
    pub username: String,
    /// Name the broker reports for itself.
    pub cluster_name: String,
    /// RabbitMQ version.
    pub rabbitmq_version: String,
    /// Erlang/OTP version.
    pub erlang_version: String,
    /// Management plugin version.
    pub management_version: String,
}

/// Something listeners may want to react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterEvent {
    /// The set or order of vhosts changed.
    VirtualHostsChanged,
    /// The user selected another vhost.
    ActiveVirtualHostChanged,
    /// Broker metadata changed.
    InformationChanged,
    /// Two probes in a row failed.
    ConnectionLost,
    /// A probe succeeded after the connection was reported lost.
    ConnectionRestored,
}

impl ClusterEvent {
    /// Stable name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VirtualHostsChanged => "virtual_hosts_changed",
            Self::ActiveVirtualHostChanged => "active_virtual_host_changed",
            Self::InformationChanged => "information_changed",
            Self::ConnectionLost => "connection_lost",
            Self::ConnectionRestored => "connection_restored",
        }
    }
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives cluster events.
///
/// Callbacks run synchronously on the notifying task, in registration
/// order, with no cluster state lock held. They must not block, and must
/// not call [`Cluster::stop`], which waits for probe events in delivery.
pub trait ClusterListener: Send + Sync {
    /// Called once per event.
    fn on_cluster_event(&self, cluster: &Cluster, event: ClusterEvent);
}

/// Lifecycle of the background poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Never started.
    Idle,
    /// Probing periodically.
    Running,
    /// Stopped for good.
    Stopped,
}

#[derive(Debug)]
struct AtomicPollerState(AtomicU8);

impl AtomicPollerState {
    const fn new(state: PollerState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> PollerState {
        match self.0.load(Ordering::SeqCst) {
            0 => PollerState::Idle,
            1 => PollerState::Running,
            _ => PollerState::Stopped,
        }
    }

    fn store(&self, state: PollerState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    info: Information,
    vhosts: Vec<VhostInfo>,
}

/// A connected cluster.
pub struct Cluster {
    name: String,
    config: SharedClusterConfig,
    api: Arc<dyn ManagementApi>,
    transport: Box<dyn Transport>,
    snapshot: RwLock<Snapshot>,
    error_count: AtomicU32,
    state: AtomicPollerState,
    poller: Mutex<Option<mpsc::Sender<()>>>,
    listeners: ListenerSet<dyn ClusterListener>,
    save_lock: Mutex<()>,
    delivery: Mutex<()>,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.name)
            .field("uri", &self.transport.uri())
            .field("error_count", &self.error_count.load(Ordering::SeqCst))
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Build a cluster over an already-resolved transport and API.
    ///
    /// Fetches broker information and the vhost list; if either fails the
    /// transport is closed and the error returned. A selected vhost that no
    /// longer exists is reset to "all". The poller is not started.
    pub async fn from_parts(
        config: SharedClusterConfig,
        transport: Box<dyn Transport>,
        api: Arc<dyn ManagementApi>,
    ) -> Result<Arc<Self>> {
        let (name, username) = {
            let config = config.read();
            (config.name().to_string(), config.connection.username.clone())
        };

        let (info, vhosts) = match fetch_state(api.as_ref(), &name, &username).await {
            Ok(state) => state,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };

        {
            let mut config = config.write();
            if !config.vhost.is_empty() && !vhosts.iter().any(|v| v.name == config.vhost) {
                debug!(cluster = %name, vhost = %config.vhost, "selected vhost no longer exists");
                config.vhost.clear();
            }
        }

        info!(cluster = %name, uri = %transport.uri(), "connected to cluster");

        Ok(Arc::new(Self {
            name,
            config,
            api,
            transport,
            snapshot: RwLock::new(Snapshot { info, vhosts }),
            error_count: AtomicU32::new(0),
            state: AtomicPollerState::new(PollerState::Idle),
            poller: Mutex::new(None),
            listeners: ListenerSet::new(),
            save_lock: Mutex::new(()),
            delivery: Mutex::new(()),
        }))
    }

    /// Configured cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Management user.
    #[must_use]
    pub fn username(&self) -> String {
        self.config.read().connection.username.clone()
    }

    /// Base URI the client talks to.
    #[must_use]
    pub fn uri(&self) -> &str {
        self.transport.uri()
    }

    /// The shared config backing this cluster.
    #[must_use]
    pub fn config(&self) -> SharedClusterConfig {
        Arc::clone(&self.config)
    }

    /// Latest broker metadata.
    #[must_use]
    pub fn information(&self) -> Information {
        self.snapshot.read().info.clone()
    }

    /// Latest vhost list.
    #[must_use]
    pub fn virtual_hosts(&self) -> Vec<VhostInfo> {
        self.snapshot.read().vhosts.clone()
    }

    /// Favorite vhosts, oldest first.
    #[must_use]
    pub fn favorite_vhosts(&self) -> Vec<String> {
        self.config.read().favorite_vhosts.clone()
    }

    /// Selected vhost; empty means all.
    #[must_use]
    pub fn active_virtual_host(&self) -> String {
        self.config.read().vhost.clone()
    }

    /// `true` while the last probe succeeded.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.error_count.load(Ordering::SeqCst) == 0
    }

    /// `true` once enough probes failed in a row for `ConnectionLost` to
    /// have fired, until the next successful probe.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        self.error_count.load(Ordering::SeqCst) >= LOST_THRESHOLD
    }

    /// Poller lifecycle state.
    #[must_use]
    pub fn poller_state(&self) -> PollerState {
        self.state.load()
    }

    /// Select a vhost ("" for all).
    ///
    /// Setting the current value is a no-op. Otherwise the vhost is added to
    /// the favorites when there is room, the config is saved and listeners
    /// are told.
    pub fn set_active_virtual_host(&self, vhost: &str) {
        if self.update_config(|config| config.select_vhost(vhost)) {
            debug!(cluster = %self.name, vhost, "active vhost changed");
            self.notify(ClusterEvent::ActiveVirtualHostChanged);
        }
    }

    /// Delete a vhost on the broker and forget it as a favorite.
    pub async fn delete_vhost(&self, name: &str) -> Result<()> {
        self.api.delete_vhost(name).await?;
        self.update_config(|config| config.remove_favorite(name));
        Ok(())
    }

    /// Queues of the active vhost (all vhosts when none is selected).
    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>> {
        let vhost = self.active_virtual_host();
        Ok(self.api.list_queues(scope(&vhost)).await?)
    }

    /// Exchanges of the active vhost.
    pub async fn list_exchanges(&self) -> Result<Vec<ExchangeInfo>> {
        let vhost = self.active_virtual_host();
        Ok(self.api.list_exchanges(scope(&vhost)).await?)
    }

    /// Client connections of the active vhost.
    pub async fn list_connections(&self) -> Result<Vec<ConnectionInfo>> {
        let vhost = self.active_virtual_host();
        Ok(self.api.list_connections(scope(&vhost)).await?)
    }

    /// Drop every ready message of a queue.
    pub async fn purge_queue(&self, vhost: &str, name: &str) -> Result<()> {
        Ok(self.api.purge_queue(vhost, name).await?)
    }

    /// Delete a queue.
    pub async fn delete_queue(&self, vhost: &str, name: &str) -> Result<()> {
        Ok(self.api.delete_queue(vhost, name).await?)
    }

    /// Force-close a client connection.
    pub async fn close_connection(&self, name: &str, reason: &str) -> Result<()> {
        Ok(self.api.close_connection(name, reason).await?)
    }

    /// Subscribe to events. Only a weak reference is kept.
    pub fn add_listener(&self, listener: Weak<dyn ClusterListener>) {
        self.listeners.add(listener);
    }

    /// Unsubscribe the listener at this address.
    pub fn remove_listener<L: ?Sized>(&self, listener: &L) -> bool {
        self.listeners.remove(listener)
    }

    /// Ask the poller for an immediate probe.
    ///
    /// Requests made while one is already pending are absorbed. Does nothing
    /// when the poller is not running.
    pub fn refresh(&self) {
        if let Some(poller) = self.poller.lock().as_ref() {
            if poller.try_send(()).is_err() {
                debug!(cluster = %self.name, "refresh already requested");
            }
        }
    }

    /// Start the background poller. Only the first call has an effect, and
    /// never after [`Self::stop`].
    pub fn start(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if self.state.load() != PollerState::Idle {
            debug!(cluster = %self.name, state = ?self.state.load(), "poller not idle, not starting");
            return;
        }

        let (tx, rx) = mpsc::channel(1);
        *poller = Some(tx);
        self.state.store(PollerState::Running);
        drop(poller);

        tokio::spawn(poll(Arc::downgrade(self), self.name.clone(), rx));
    }

    /// Stop the poller for good and close the transport.
    ///
    /// A probe already in flight completes but its results are discarded.
    /// If one is delivering events right now, this waits for it to finish,
    /// so no probe event arrives after `stop` returns.
    pub fn stop(&self) {
        let sender = {
            let mut poller = self.poller.lock();
            self.state.store(PollerState::Stopped);
            poller.take()
        };
        drop(sender);
        drop(self.delivery.lock());
        self.transport.close();
        debug!(cluster = %self.name, "cluster stopped");
    }

    /// Run one probe cycle now, outside the poller's schedule.
    ///
    /// The poller calls this on every tick; callers normally use
    /// [`Self::refresh`] instead.
    pub async fn probe(&self) {
        let username = self.username();
        let result = fetch_state(self.api.as_ref(), &self.name, &username).await;

        let _delivery = self.delivery.lock();
        if self.state.load() == PollerState::Stopped {
            debug!(cluster = %self.name, "discarding probe result of stopped cluster");
            return;
        }

        let (info, vhosts) = match result {
            Ok(state) => state,
            Err(e) => {
                let failures = self.error_count.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(cluster = %self.name, failures, error = %e, "cluster probe failed");
                if failures == LOST_THRESHOLD {
                    warn!(cluster = %self.name, error = %e, "cluster connection lost");
                    self.notify(ClusterEvent::ConnectionLost);
                }
                return;
            }
        };

        if self.error_count.swap(0, Ordering::SeqCst) >= LOST_THRESHOLD {
            info!(cluster = %self.name, "cluster connection restored");
            self.notify(ClusterEvent::ConnectionRestored);
        }

        let (info_changed, fresh_vhosts) = {
            let mut snapshot = self.snapshot.write();
            let info_changed = snapshot.info != info;
            if info_changed {
                snapshot.info = info;
            }
            let fresh_vhosts = if same_vhosts(&snapshot.vhosts, &vhosts) {
                None
            } else {
                snapshot.vhosts.clone_from(&vhosts);
                Some(vhosts)
            };
            (info_changed, fresh_vhosts)
        };

        if let Some(vhosts) = &fresh_vhosts {
            self.update_config(|config| config.sanitize_favorites(vhosts));
        }

        if info_changed {
            debug!(cluster = %self.name, "cluster information changed");
            self.notify(ClusterEvent::InformationChanged);
        }
        if fresh_vhosts.is_some() {
            debug!(cluster = %self.name, "cluster vhost list changed");
            self.notify(ClusterEvent::VirtualHostsChanged);
        }
    }

    /// Mutate the config and persist it when `mutate` reports a change.
    ///
    /// The save lock orders concurrent writers; the config lock is released
    /// before touching the filesystem.
    fn update_config(&self, mutate: impl FnOnce(&mut ClusterConfig) -> bool) -> bool {
        let _save = self.save_lock.lock();
        let snapshot = {
            let mut config = self.config.write();
            if !mutate(&mut *config) {
                return false;
            }
            config.clone()
        };
        if let Err(e) = snapshot.save() {
            error!(cluster = %self.name, error = %e, "failed to save cluster config");
        }
        true
    }

    fn notify(&self, event: ClusterEvent) {
        for listener in self.listeners.snapshot() {
            listener.on_cluster_event(self, event);
        }
    }
}

async fn poll(cluster: Weak<Cluster>, name: String, mut refresh: mpsc::Receiver<()>) {
    debug!(cluster = %name, "cluster availability monitoring started");
    loop {
        tokio::select! {
            request = refresh.recv() => {
                if request.is_none() {
                    break;
                }
                debug!(cluster = %name, "cluster refresh triggered");
            }
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let Some(cluster) = cluster.upgrade() else {
            break;
        };
        cluster.probe().await;
    }
    debug!(cluster = %name, "cluster availability monitoring stopped");
}

async fn fetch_state(
    api: &dyn ManagementApi,
    name: &str,
    username: &str,
) -> Result<(Information, Vec<VhostInfo>)> {
    let cluster_name = api.cluster_name().await?;
    let overview = api.overview().await?;
    let vhosts = api.list_vhosts().await?;

    let info = Information {
        name: name.to_string(),
        username: username.to_string(),
        cluster_name: cluster_name.name,
        rabbitmq_version: overview.rabbitmq_version,
        erlang_version: overview.erlang_version,
        management_version: overview.management_version,
    };
    Ok((info, vhosts))
}

/// Same names in the same order.
fn same_vhosts(a: &[VhostInfo], b: &[VhostInfo]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name)
}

fn scope(vhost: &str) -> Option<&str> {
    (!vhost.is_empty()).then_some(vhost)
}
