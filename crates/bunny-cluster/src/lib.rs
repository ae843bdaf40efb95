//! Cluster connectivity for tbunny.
//!
//! A [`Cluster`] is a live connection to one RabbitMQ broker reached through
//! a [`Transport`] (a direct URL or a Kubernetes port-forward). It polls the
//! broker in the background and tells its [`ClusterListener`]s when vhosts,
//! broker metadata or reachability change.
//!
//! The [`Manager`] owns every configured cluster and at most one active
//! connection:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bunny_cluster::{HttpConnector, Manager};
//!
//! # async fn example() -> bunny_cluster::Result<()> {
//! let manager = Manager::load(
//!     "/home/me/.config/tbunny",
//!     Arc::new(HttpConnector::default()),
//!     Duration::from_secs(15),
//! );
//! let active = manager.active_cluster_name();
//! let cluster = manager.connect_to_cluster(&active).await?;
//! println!("{} vhosts", cluster.virtual_hosts().len());
//! manager.disconnect();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod k8s;
mod listeners;
pub mod manager;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cluster::{Cluster, ClusterEvent, ClusterListener, Information, POLL_INTERVAL, PollerState};
pub use config::{
    ClusterConfig, ConnectionParameters, DirectParameters, Endpoint, K8sParameters,
    MAX_FAVORITE_VHOSTS, SharedClusterConfig, validate_cluster_name, validate_uri,
};
pub use error::{ClusterError, Result};
pub use k8s::K8sTunnel;
pub use manager::{ConnectFuture, Connector, HttpConnector, Manager, ManagerListener};
pub use transport::{DirectTransport, Transport};
