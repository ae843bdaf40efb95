//! In-memory stand-ins for the management API, transport and connector.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for downstream crates that need a [`Cluster`] without a broker.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bunny_rmq::{
    ApiFuture, ClusterName, ConnectionInfo, ExchangeInfo, ManagementApi, Overview, QueueInfo,
    RmqError, VhostInfo,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::config::SharedClusterConfig;
use crate::manager::{ConnectFuture, Connector};
use crate::transport::Transport;

#[derive(Debug)]
struct FakeBroker {
    failing: bool,
    cluster_name: String,
    rabbitmq_version: String,
    vhosts: Vec<VhostInfo>,
    queues: Vec<QueueInfo>,
    exchanges: Vec<ExchangeInfo>,
    connections: Vec<ConnectionInfo>,
    deleted_vhosts: Vec<String>,
}

/// Scriptable [`ManagementApi`].
///
/// Every call answers immediately from in-memory state. When failing, every
/// call returns a 503 API error.
#[derive(Debug)]
pub struct FakeApi {
    broker: Mutex<FakeBroker>,
    probes: AtomicUsize,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeApi {
    /// Broker `rabbit@fake` with only the default vhost.
    #[must_use]
    pub fn new() -> Self {
        Self {
            broker: Mutex::new(FakeBroker {
                failing: false,
                cluster_name: "rabbit@fake".into(),
                rabbitmq_version: "4.0.5".into(),
                vhosts: vec![VhostInfo::named("/")],
                queues: Vec::new(),
                exchanges: Vec::new(),
                connections: Vec::new(),
                deleted_vhosts: Vec::new(),
            }),
            probes: AtomicUsize::new(0),
        }
    }

    /// Replace the vhost list.
    #[must_use]
    pub fn with_vhosts(self, names: &[&str]) -> Self {
        self.set_vhosts(names);
        self
    }

    /// Make every call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.broker.lock().failing = failing;
    }

    /// Replace the vhost list.
    pub fn set_vhosts(&self, names: &[&str]) {
        self.broker.lock().vhosts = names.iter().map(|n| VhostInfo::named(*n)).collect();
    }

    /// Change the reported cluster name.
    pub fn set_cluster_name(&self, name: &str) {
        self.broker.lock().cluster_name = name.to_string();
    }

    /// Replace the queue list.
    pub fn set_queues(&self, queues: Vec<QueueInfo>) {
        self.broker.lock().queues = queues;
    }

    /// Replace the exchange list.
    pub fn set_exchanges(&self, exchanges: Vec<ExchangeInfo>) {
        self.broker.lock().exchanges = exchanges;
    }

    /// Replace the connection list.
    pub fn set_connections(&self, connections: Vec<ConnectionInfo>) {
        self.broker.lock().connections = connections;
    }

    /// Number of cluster-name requests served, one per fetch of cluster state.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Vhosts deleted through the API, in order.
    #[must_use]
    pub fn deleted_vhosts(&self) -> Vec<String> {
        self.broker.lock().deleted_vhosts.clone()
    }

    fn answer<T: Send + 'static>(
        &self,
        f: impl FnOnce(&mut FakeBroker) -> T,
    ) -> ApiFuture<'_, T> {
        let mut broker = self.broker.lock();
        let result = if broker.failing {
            Err(RmqError::api(503, "broker unavailable"))
        } else {
            Ok(f(&mut *broker))
        };
        Box::pin(std::future::ready(result))
    }
}

fn in_vhost<'a, T: 'a>(
    items: &'a [T],
    vhost: Option<&'a str>,
    vhost_of: impl Fn(&T) -> &str + 'a,
) -> impl Iterator<Item = &'a T> + 'a {
    items
        .iter()
        .filter(move |item| vhost.is_none_or(|v| vhost_of(item) == v))
}

impl ManagementApi for FakeApi {
    fn cluster_name(&self) -> ApiFuture<'_, ClusterName> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.answer(|b| ClusterName {
            name: b.cluster_name.clone(),
        })
    }

    fn overview(&self) -> ApiFuture<'_, Overview> {
        self.answer(|b| Overview {
            rabbitmq_version: b.rabbitmq_version.clone(),
            erlang_version: "27.2".into(),
            management_version: b.rabbitmq_version.clone(),
            cluster_name: b.cluster_name.clone(),
            node: "rabbit@fake-0".into(),
        })
    }

    fn list_vhosts(&self) -> ApiFuture<'_, Vec<VhostInfo>> {
        self.answer(|b| b.vhosts.clone())
    }

    fn delete_vhost<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        self.answer(|b| {
            b.vhosts.retain(|v| v.name != name);
            b.deleted_vhosts.push(name.to_string());
        })
    }

    fn list_queues<'a>(&'a self, vhost: Option<&'a str>) -> ApiFuture<'a, Vec<QueueInfo>> {
        self.answer(|b| in_vhost(&b.queues, vhost, |q| q.vhost.as_str()).cloned().collect())
    }

    fn purge_queue<'a>(&'a self, vhost: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        self.answer(|b| {
            for queue in b
                .queues
                .iter_mut()
                .filter(|q| q.vhost == vhost && q.name == name)
            {
                queue.messages = 0;
                queue.messages_ready = 0;
            }
        })
    }

    fn delete_queue<'a>(&'a self, vhost: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        self.answer(|b| b.queues.retain(|q| !(q.vhost == vhost && q.name == name)))
    }

    fn list_exchanges<'a>(&'a self, vhost: Option<&'a str>) -> ApiFuture<'a, Vec<ExchangeInfo>> {
        self.answer(|b| in_vhost(&b.exchanges, vhost, |e| e.vhost.as_str()).cloned().collect())
    }

    fn list_connections<'a>(
        &'a self,
        vhost: Option<&'a str>,
    ) -> ApiFuture<'a, Vec<ConnectionInfo>> {
        self.answer(|b| in_vhost(&b.connections, vhost, |c| c.vhost.as_str()).cloned().collect())
    }

    fn close_connection<'a>(&'a self, name: &'a str, _reason: &'a str) -> ApiFuture<'a, ()> {
        self.answer(|b| b.connections.retain(|c| c.name != name))
    }
}

/// Transport that records how often it was closed.
#[derive(Debug)]
pub struct FakeTransport {
    uri: String,
    closed: AtomicBool,
    closes: AtomicUsize,
}

impl FakeTransport {
    /// Transport reporting `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    /// Whether `close` was called at least once.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Connector that builds clusters over [`FakeApi`] instances keyed by
/// cluster name, creating a healthy one on first use.
#[derive(Debug, Default)]
pub struct FakeConnector {
    apis: Mutex<HashMap<String, Arc<FakeApi>>>,
    delay: Option<Duration>,
    connects: AtomicUsize,
}

impl FakeConnector {
    /// Connector with no artificial delay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before every connect.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// The fake broker behind cluster `name`.
    pub fn api(&self, name: &str) -> Arc<FakeApi> {
        Arc::clone(
            self.apis
                .lock()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(FakeApi::new())),
        )
    }

    /// Number of connect attempts.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        config: SharedClusterConfig,
        _cancel: &'a CancellationToken,
    ) -> ConnectFuture<'a> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let name = config.read().name().to_string();
            let api = self.api(&name);
            let transport = Box::new(FakeTransport::new("http://fake:15672"));
            Cluster::from_parts(config, transport, api).await
        })
    }
}
