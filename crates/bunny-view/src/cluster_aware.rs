//! Views that follow their cluster's liveness.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bunny_cluster::{Cluster, ClusterEvent, ClusterListener};
use parking_lot::Mutex;
use tracing::debug;

use crate::strategy::{UpdateFn, UpdateKind, UpdateStrategy};
use crate::view::{ClusterView, Key, KeyBinding};

/// Refresh key available on every cluster-aware view.
pub const REFRESH_KEY: Key = Key::Ctrl('r');

/// A view whose update strategy pauses while the cluster is reported lost.
///
/// A single failed poll does not pause the view: the cluster only announces
/// recovery after a reported loss, so pausing earlier could never be undone.
///
/// | event                      | reaction        |
/// |----------------------------|-----------------|
/// | active vhost changed       | full update     |
/// | vhost list changed         | partial update  |
/// | connection lost            | pause           |
/// | connection restored        | resume          |
pub struct ClusterAwareView<S> {
    name: String,
    cluster: Arc<Cluster>,
    strategy: Mutex<S>,
    listening: AtomicBool,
    this: Weak<Self>,
}

impl<S> fmt::Debug for ClusterAwareView<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterAwareView")
            .field("name", &self.name)
            .field("cluster", &self.cluster.name())
            .field("listening", &self.listening.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<S: UpdateStrategy + 'static> ClusterAwareView<S> {
    /// Wrap `strategy`, which will call `update_fn` for `cluster`.
    pub fn new(
        name: impl Into<String>,
        cluster: Arc<Cluster>,
        mut strategy: S,
        update_fn: UpdateFn,
    ) -> Arc<Self> {
        let name = name.into();
        strategy.set_name(&name);
        strategy.set_update_fn(update_fn);
        Arc::new_cyclic(|this| Self {
            name,
            cluster,
            strategy: Mutex::new(strategy),
            listening: AtomicBool::new(false),
            this: this.clone(),
        })
    }
}

impl<S: UpdateStrategy + 'static> ClusterView for ClusterAwareView<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    fn start(&self) {
        {
            let mut strategy = self.strategy.lock();
            if self.cluster.is_connection_lost() {
                strategy.pause();
                strategy.start();
            } else if strategy.is_paused() {
                strategy.resume();
            } else {
                strategy.start();
            }
        }

        if !self.listening.swap(true, Ordering::SeqCst) {
            let listener: Weak<dyn ClusterListener> = self.this.clone();
            self.cluster.add_listener(listener);
        }
    }

    fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            self.cluster.remove_listener(self);
        }
        self.strategy.lock().stop();
    }

    fn request_update(&self, kind: UpdateKind) {
        self.strategy.lock().request_update(kind);
    }

    fn key_bindings(&self) -> Vec<KeyBinding> {
        vec![KeyBinding::new(REFRESH_KEY, "refresh")]
    }

    fn handle_key(&self, key: Key) -> bool {
        if key == REFRESH_KEY {
            self.request_update(UpdateKind::Partial);
            return true;
        }
        false
    }

    fn is_paused(&self) -> bool {
        self.strategy.lock().is_paused()
    }
}

impl<S: UpdateStrategy + 'static> ClusterListener for ClusterAwareView<S> {
    fn on_cluster_event(&self, _cluster: &Cluster, event: ClusterEvent) {
        debug!(component = %self.name, %event, "cluster event");
        match event {
            ClusterEvent::ActiveVirtualHostChanged => self.request_update(UpdateKind::Full),
            ClusterEvent::VirtualHostsChanged => self.request_update(UpdateKind::Partial),
            ClusterEvent::ConnectionLost => self.strategy.lock().pause(),
            ClusterEvent::ConnectionRestored => self.strategy.lock().resume(),
            ClusterEvent::InformationChanged => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::{recorder, settle};
    use crate::strategy::{LiveUpdateStrategy, ManualUpdateStrategy};
    use crate::test_support::fake_cluster;

    #[tokio::test(start_paused = true)]
    async fn test_start_pauses_when_connection_lost() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, api) = fake_cluster(dir.path(), &[]).await;
        api.set_failing(true);
        cluster.probe().await;
        cluster.probe().await;
        assert!(cluster.is_connection_lost());

        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new("queues", cluster, LiveUpdateStrategy::new(), update_fn);
        view.start();

        assert!(view.is_paused());
        assert_eq!(*calls.lock(), vec![UpdateKind::Full]);
        view.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_failed_poll_does_not_pause() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, api) = fake_cluster(dir.path(), &[]).await;
        api.set_failing(true);
        cluster.probe().await;
        assert!(!cluster.is_available());

        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new(
            "queues",
            Arc::clone(&cluster),
            LiveUpdateStrategy::new(),
            update_fn,
        );
        view.start();
        settle().await;
        assert!(!view.is_paused());

        api.set_failing(false);
        cluster.probe().await;
        tokio::time::sleep(crate::strategy::UPDATE_INTERVAL).await;
        settle().await;

        assert!(cluster.is_available());
        assert!(!view.is_paused());
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Partial]);
        view.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resumes_after_silent_recovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, api) = fake_cluster(dir.path(), &[]).await;
        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new(
            "queues",
            Arc::clone(&cluster),
            LiveUpdateStrategy::new(),
            update_fn,
        );
        view.start();
        settle().await;

        api.set_failing(true);
        cluster.probe().await;
        cluster.probe().await;
        assert!(view.is_paused());
        view.stop();

        api.set_failing(false);
        cluster.probe().await;
        view.start();
        settle().await;

        assert!(!view.is_paused());
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Partial]);
        view.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_pauses_and_restored_resumes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, api) = fake_cluster(dir.path(), &[]).await;
        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new(
            "queues",
            Arc::clone(&cluster),
            LiveUpdateStrategy::new(),
            update_fn,
        );
        view.start();
        settle().await;

        api.set_failing(true);
        cluster.probe().await;
        assert!(!view.is_paused(), "one failure is not a loss");
        cluster.probe().await;
        assert!(view.is_paused());

        api.set_failing(false);
        cluster.probe().await;
        settle().await;

        assert!(!view.is_paused());
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Partial]);
        view.stop();
    }

    #[tokio::test]
    async fn test_vhost_events_request_updates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, api) = fake_cluster(dir.path(), &[]).await;
        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new(
            "clusters",
            Arc::clone(&cluster),
            ManualUpdateStrategy::new(),
            update_fn,
        );
        view.start();

        cluster.set_active_virtual_host("a");
        api.set_vhosts(&["/", "a"]);
        cluster.probe().await;

        assert_eq!(
            *calls.lock(),
            vec![UpdateKind::Full, UpdateKind::Full, UpdateKind::Partial]
        );
        view.stop();
    }

    #[tokio::test]
    async fn test_refresh_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, _api) = fake_cluster(dir.path(), &[]).await;
        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new("clusters", cluster, ManualUpdateStrategy::new(), update_fn);

        assert!(view.handle_key(REFRESH_KEY));
        assert!(!view.handle_key(Key::Char('x')));
        assert_eq!(*calls.lock(), vec![UpdateKind::Partial]);
        assert_eq!(view.key_bindings(), vec![KeyBinding::new(REFRESH_KEY, "refresh")]);
    }

    #[tokio::test]
    async fn test_stop_unregisters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, _api) = fake_cluster(dir.path(), &[]).await;
        let (update_fn, calls) = recorder();
        let view = ClusterAwareView::new(
            "clusters",
            Arc::clone(&cluster),
            ManualUpdateStrategy::new(),
            update_fn,
        );
        view.start();
        view.start();
        view.stop();

        cluster.set_active_virtual_host("a");

        assert_eq!(*calls.lock(), vec![UpdateKind::Full]);
    }
}
