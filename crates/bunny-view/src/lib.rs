//! View plumbing for tbunny.
//!
//! Every panel owns an [`UpdateStrategy`] that decides when its data is
//! refetched: [`LiveUpdateStrategy`] ticks on a timer, [`ManualUpdateStrategy`]
//! only on request. [`ClusterAwareView`] ties a strategy to a cluster so the
//! panel pauses while the broker is unreachable, and [`VhostExtender`] adds
//! favorite-vhost quick keys on top of any [`ClusterView`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cluster_aware;
pub mod strategy;
pub mod vhost;
pub mod view;

pub use cluster_aware::{ClusterAwareView, REFRESH_KEY};
pub use strategy::{
    LiveUpdateStrategy, ManualUpdateStrategy, UPDATE_INTERVAL, UpdateFn, UpdateKind,
    UpdateStrategy,
};
pub use vhost::{ALL_VHOSTS_KEY, VhostExtender, favorite_bindings};
pub use view::{ClusterView, Key, KeyBinding, vhost_display_name};

#[cfg(test)]
mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use bunny_cluster::testing::{FakeApi, FakeTransport};
    use bunny_cluster::{Cluster, ClusterConfig, ConnectionParameters};
    use parking_lot::RwLock;

    /// Cluster over a fake broker with vhosts `/`, `a` and `b`.
    pub(crate) async fn fake_cluster(dir: &Path, favorites: &[&str]) -> (Arc<Cluster>, Arc<FakeApi>) {
        let api = Arc::new(FakeApi::new().with_vhosts(&["/", "a", "b"]));
        let mut config = ClusterConfig::new(
            "test",
            dir.join("test.yaml"),
            ConnectionParameters::direct("http://fake:15672", "guest", "guest"),
        );
        config.favorite_vhosts = favorites.iter().map(ToString::to_string).collect();
        let cluster = Cluster::from_parts(
            Arc::new(RwLock::new(config)),
            Box::new(FakeTransport::new("http://fake:15672")),
            api.clone(),
        )
        .await
        .expect("fake cluster");
        (cluster, api)
    }
}
