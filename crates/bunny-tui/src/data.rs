//! Background fetches and listener forwarding.
//!
//! Update functions run on whatever task asks for an update, so each one
//! spawns its fetch and reports back through the event channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bunny_cluster::{Cluster, ClusterEvent, ClusterListener, Manager, ManagerListener};
use bunny_rmq::{ConnectionInfo, ExchangeInfo, QueueInfo, VhostInfo};
use bunny_view::{UpdateFn, UpdateKind};
use tracing::{debug, warn};

use crate::events::{AppEvent, DataEvent, EventSender};

/// Deliver `event` to the main loop, if it is still listening.
pub(crate) fn send(tx: &EventSender, event: DataEvent) {
    if tx.send(AppEvent::Data(event)).is_err() {
        debug!("event channel closed, dropping data event");
    }
}

/// Reload cluster definitions from the manager.
pub fn clusters_update_fn(manager: Arc<Manager>, tx: EventSender) -> UpdateFn {
    Arc::new(move |kind| {
        send(
            &tx,
            DataEvent::Clusters {
                kind,
                rows: manager.clusters(),
            },
        );
    })
}

/// Which listing a fetcher loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Virtual hosts, from the cluster's cached list.
    Vhosts,
    /// Queues.
    Queues,
    /// Exchanges.
    Exchanges,
    /// Client connections.
    Connections,
}

impl Resource {
    /// Component name for logs and titles.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Vhosts => "vhosts",
            Self::Queues => "queues",
            Self::Exchanges => "exchanges",
            Self::Connections => "connections",
        }
    }
}

enum Rows {
    Vhosts(Vec<VhostInfo>),
    Queues(Vec<QueueInfo>),
    Exchanges(Vec<ExchangeInfo>),
    Connections(Vec<ConnectionInfo>),
}

impl Rows {
    fn into_event(self, session: u64, kind: UpdateKind) -> DataEvent {
        match self {
            Self::Vhosts(rows) => DataEvent::Vhosts { session, kind, rows },
            Self::Queues(rows) => DataEvent::Queues { session, kind, rows },
            Self::Exchanges(rows) => DataEvent::Exchanges { session, kind, rows },
            Self::Connections(rows) => DataEvent::Connections { session, kind, rows },
        }
    }
}

/// Loads one listing of one cluster and reports it on the event channel.
///
/// Every request bumps a generation counter and only the newest request's
/// result is delivered, so a slow fetch started before a vhost switch cannot
/// overwrite the listing of the new vhost. A superseded full update is
/// carried over to the result that replaces it. [`Self::retire`] discards
/// everything still in flight. Results are tagged with the session id so the
/// receiver can drop those that arrive after it moved on.
#[derive(Debug)]
pub struct ResourceFetcher {
    resource: Resource,
    session: u64,
    cluster: Arc<Cluster>,
    tx: EventSender,
    generation: AtomicU64,
    full_pending: AtomicBool,
}

impl ResourceFetcher {
    /// Fetcher for `resource` of `cluster`, on behalf of `session`.
    #[must_use]
    pub fn new(
        resource: Resource,
        session: u64,
        cluster: Arc<Cluster>,
        tx: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            resource,
            session,
            cluster,
            tx,
            generation: AtomicU64::new(0),
            full_pending: AtomicBool::new(false),
        })
    }

    /// Update function starting a fetch per call.
    #[must_use]
    pub fn update_fn(self: &Arc<Self>) -> UpdateFn {
        let fetcher = Arc::clone(self);
        Arc::new(move |kind| fetcher.request(kind))
    }

    /// Drop the results of every fetch still running.
    pub fn retire(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn request(self: &Arc<Self>, kind: UpdateKind) {
        if kind == UpdateKind::Full {
            self.full_pending.store(true, Ordering::SeqCst);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fetcher = Arc::clone(self);
        tokio::spawn(async move {
            let result = fetcher.load().await;
            if fetcher.generation.load(Ordering::SeqCst) != generation {
                debug!(resource = fetcher.resource.name(), generation, "dropping stale fetch result");
                return;
            }
            let kind = if fetcher.full_pending.swap(false, Ordering::SeqCst) {
                UpdateKind::Full
            } else {
                kind
            };
            let event = match result {
                Ok(rows) => rows.into_event(fetcher.session, kind),
                Err(e) => {
                    warn!(
                        cluster = %fetcher.cluster.name(),
                        resource = fetcher.resource.name(),
                        error = %e,
                        "fetch failed"
                    );
                    DataEvent::Error(format!("failed to load {}: {e}", fetcher.resource.name()))
                }
            };
            send(&fetcher.tx, event);
        });
    }

    async fn load(&self) -> bunny_cluster::Result<Rows> {
        Ok(match self.resource {
            Resource::Vhosts => Rows::Vhosts(self.cluster.virtual_hosts()),
            Resource::Queues => Rows::Queues(self.cluster.list_queues().await?),
            Resource::Exchanges => Rows::Exchanges(self.cluster.list_exchanges().await?),
            Resource::Connections => Rows::Connections(self.cluster.list_connections().await?),
        })
    }
}

/// Forwards manager and cluster notifications into the event channel.
#[derive(Debug)]
pub struct ChannelListener {
    tx: EventSender,
}

impl ChannelListener {
    /// Listener sending on `tx`.
    #[must_use]
    pub fn new(tx: EventSender) -> Arc<Self> {
        Arc::new(Self { tx })
    }
}

impl ManagerListener for ChannelListener {
    fn on_active_cluster_changed(&self, cluster: Option<&Arc<Cluster>>) {
        send(&self.tx, DataEvent::ActiveCluster(cluster.cloned()));
    }
}

impl ClusterListener for ChannelListener {
    fn on_cluster_event(&self, _cluster: &Cluster, event: ClusterEvent) {
        send(&self.tx, DataEvent::Cluster(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::time::Duration;

    use bunny_cluster::Connector;
    use bunny_cluster::testing::FakeConnector;
    use tokio::sync::mpsc;

    fn write_cluster(dir: &std::path::Path, name: &str) {
        let clusters = dir.join("clusters");
        std::fs::create_dir_all(&clusters).expect("mkdir");
        std::fs::write(
            clusters.join(format!("{name}.yaml")),
            "connection:\n  direct:\n    uri: http://localhost:15672\n  username: guest\n  password: guest\n",
        )
        .expect("write");
    }

    async fn connected(dir: &std::path::Path, connector: &Arc<FakeConnector>) -> (Manager, Arc<Cluster>) {
        write_cluster(dir, "prod");
        let manager = Manager::load(
            dir,
            Arc::clone(connector) as Arc<dyn Connector>,
            Duration::from_secs(5),
        );
        let cluster = manager.connect_to_cluster("prod").await.expect("connect");
        (manager, cluster)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_queue_fetch_reports_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(FakeConnector::new());
        connector.api("prod").set_queues(vec![QueueInfo {
            name: "orders".into(),
            vhost: "/".into(),
            ..QueueInfo::default()
        }]);
        let (manager, cluster) = connected(dir.path(), &connector).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        ResourceFetcher::new(Resource::Queues, 7, cluster, tx).update_fn()(UpdateKind::Full);

        match rx.recv().await {
            Some(AppEvent::Data(DataEvent::Queues { session, kind, rows })) => {
                assert_eq!(session, 7);
                assert_eq!(kind, UpdateKind::Full);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].name, "orders");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_exchange_and_connection_fetches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(FakeConnector::new());
        let api = connector.api("prod");
        api.set_exchanges(vec![ExchangeInfo {
            name: "events".into(),
            vhost: "/".into(),
            exchange_type: "topic".into(),
            ..ExchangeInfo::default()
        }]);
        api.set_connections(vec![ConnectionInfo {
            name: "127.0.0.1:50000 -> 127.0.0.1:5672".into(),
            vhost: "/".into(),
            ..ConnectionInfo::default()
        }]);
        let (manager, cluster) = connected(dir.path(), &connector).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        ResourceFetcher::new(Resource::Exchanges, 1, Arc::clone(&cluster), tx.clone()).update_fn()(
            UpdateKind::Partial,
        );
        match rx.recv().await {
            Some(AppEvent::Data(DataEvent::Exchanges { rows, .. })) => {
                assert_eq!(rows[0].exchange_type, "topic");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        ResourceFetcher::new(Resource::Connections, 1, cluster, tx).update_fn()(UpdateKind::Partial);
        match rx.recv().await {
            Some(AppEvent::Data(DataEvent::Connections { rows, .. })) => assert_eq!(rows.len(), 1),
            other => panic!("unexpected event: {other:?}"),
        }
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_superseded_fetch_is_dropped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(FakeConnector::new());
        connector.api("prod").set_vhosts(&["/", "orders"]);
        let (manager, cluster) = connected(dir.path(), &connector).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let update = ResourceFetcher::new(Resource::Vhosts, 1, cluster, tx).update_fn();

        update(UpdateKind::Full);
        update(UpdateKind::Partial);

        match rx.recv().await {
            Some(AppEvent::Data(DataEvent::Vhosts { kind, rows, .. })) => {
                assert_eq!(kind, UpdateKind::Full);
                assert_eq!(rows.len(), 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        settle().await;
        assert!(rx.try_recv().is_err());
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_retired_fetcher_delivers_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let connector = Arc::new(FakeConnector::new());
        let (manager, cluster) = connected(dir.path(), &connector).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetcher = ResourceFetcher::new(Resource::Queues, 1, cluster, tx);

        fetcher.update_fn()(UpdateKind::Partial);
        fetcher.retire();
        settle().await;

        assert!(rx.try_recv().is_err());
        manager.disconnect();
    }

    #[tokio::test]
    async fn test_channel_listener_forwards_switches() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cluster(dir.path(), "prod");
        let manager = Manager::load(
            dir.path(),
            Arc::new(FakeConnector::new()),
            Duration::from_secs(5),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = ChannelListener::new(tx);
        manager.add_listener(Arc::downgrade(&listener) as Weak<dyn ManagerListener>);

        manager.connect_to_cluster("prod").await.expect("connect");
        manager.disconnect();

        let first = rx.recv().await;
        assert!(matches!(
            first,
            Some(AppEvent::Data(DataEvent::ActiveCluster(Some(ref c)))) if c.name() == "prod"
        ));
        assert!(matches!(
            rx.recv().await,
            Some(AppEvent::Data(DataEvent::ActiveCluster(None)))
        ));
    }

    #[test]
    fn test_clusters_update_fn_lists_manager() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cluster(dir.path(), "b");
        write_cluster(dir.path(), "a");
        let manager = Arc::new(Manager::load(
            dir.path(),
            Arc::new(FakeConnector::new()),
            Duration::from_secs(5),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();

        clusters_update_fn(manager, tx)(UpdateKind::Partial);

        match rx.try_recv() {
            Ok(AppEvent::Data(DataEvent::Clusters { kind, rows })) => {
                assert_eq!(kind, UpdateKind::Partial);
                let names: Vec<&str> = rows.iter().map(|c| c.name()).collect();
                assert_eq!(names, vec!["a", "b"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
