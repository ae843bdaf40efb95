//! Object-safe view of the management API used by the cluster model.
//!
//! The cluster poller and the views only need a handful of calls; keeping
//! them behind a trait lets tests substitute an in-memory broker.

use std::future::Future;
use std::pin::Pin;

use crate::client::ManagementClient;
use crate::error::Result;
use crate::types::{ClusterName, ConnectionInfo, ExchangeInfo, Overview, QueueInfo, VhostInfo};

/// Boxed future returned by [`ManagementApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Management calls the cluster model depends on.
pub trait ManagementApi: Send + Sync {
    /// Fetch the cluster name.
    fn cluster_name(&self) -> ApiFuture<'_, ClusterName>;

    /// Fetch the broker overview.
    fn overview(&self) -> ApiFuture<'_, Overview>;

    /// List every virtual host.
    fn list_vhosts(&self) -> ApiFuture<'_, Vec<VhostInfo>>;

    /// Delete a virtual host.
    fn delete_vhost<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()>;

    /// List queues, optionally restricted to one vhost.
    fn list_queues<'a>(&'a self, vhost: Option<&'a str>) -> ApiFuture<'a, Vec<QueueInfo>>;

    /// Remove all ready messages from a queue.
    fn purge_queue<'a>(&'a self, vhost: &'a str, name: &'a str) -> ApiFuture<'a, ()>;

    /// Delete a queue.
    fn delete_queue<'a>(&'a self, vhost: &'a str, name: &'a str) -> ApiFuture<'a, ()>;

    /// List exchanges, optionally restricted to one vhost.
    fn list_exchanges<'a>(&'a self, vhost: Option<&'a str>) -> ApiFuture<'a, Vec<ExchangeInfo>>;

    /// List client connections, optionally restricted to one vhost.
    fn list_connections<'a>(
        &'a self,
        vhost: Option<&'a str>,
    ) -> ApiFuture<'a, Vec<ConnectionInfo>>;

    /// Force-close a client connection.
    fn close_connection<'a>(&'a self, name: &'a str, reason: &'a str) -> ApiFuture<'a, ()>;
}

impl ManagementApi for ManagementClient {
    fn cluster_name(&self) -> ApiFuture<'_, ClusterName> {
        Box::pin(ManagementClient::cluster_name(self))
    }

    fn overview(&self) -> ApiFuture<'_, Overview> {
        Box::pin(ManagementClient::overview(self))
    }

    fn list_vhosts(&self) -> ApiFuture<'_, Vec<VhostInfo>> {
        Box::pin(ManagementClient::list_vhosts(self))
    }

    fn delete_vhost<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(ManagementClient::delete_vhost(self, name))
    }

    fn list_queues<'a>(&'a self, vhost: Option<&'a str>) -> ApiFuture<'a, Vec<QueueInfo>> {
        Box::pin(ManagementClient::list_queues(self, vhost))
    }

    fn purge_queue<'a>(&'a self, vhost: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(ManagementClient::purge_queue(self, vhost, name))
    }

    fn delete_queue<'a>(&'a self, vhost: &'a str, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(ManagementClient::delete_queue(self, vhost, name))
    }

    fn list_exchanges<'a>(&'a self, vhost: Option<&'a str>) -> ApiFuture<'a, Vec<ExchangeInfo>> {
        Box::pin(ManagementClient::list_exchanges(self, vhost))
    }

    fn list_connections<'a>(
        &'a self,
        vhost: Option<&'a str>,
    ) -> ApiFuture<'a, Vec<ConnectionInfo>> {
        Box::pin(ManagementClient::list_connections(self, vhost))
    }

    fn close_connection<'a>(&'a self, name: &'a str, reason: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(ManagementClient::close_connection(self, name, reason))
    }
}
