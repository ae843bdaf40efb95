//! Quick vhost switching for any cluster view.

use std::sync::Arc;

use bunny_cluster::{Cluster, MAX_FAVORITE_VHOSTS};
use tracing::info;

use crate::strategy::UpdateKind;
use crate::view::{ClusterView, Key, KeyBinding, vhost_display_name};

/// Key selecting all vhosts.
pub const ALL_VHOSTS_KEY: Key = Key::Char('0');

/// Wraps a view with `0` for all vhosts and `1`..`9` for the favorites.
///
/// The title carries the active vhost. Everything else is forwarded to the
/// wrapped view.
#[derive(Debug)]
pub struct VhostExtender<V> {
    inner: V,
}

impl<V: ClusterView> VhostExtender<V> {
    /// Decorate `inner`.
    pub fn new(inner: V) -> Self {
        Self { inner }
    }

    /// The wrapped view.
    pub fn inner(&self) -> &V {
        &self.inner
    }

    /// Favorite bound to `key`, if any. `Some("")` means all vhosts.
    fn target(&self, key: Key) -> Option<String> {
        if key == ALL_VHOSTS_KEY {
            return Some(String::new());
        }
        let Key::Char(c) = key else {
            return None;
        };
        let position = usize::try_from(c.to_digit(10)?).ok()?;
        if position == 0 || position > MAX_FAVORITE_VHOSTS {
            return None;
        }
        self.inner
            .cluster()
            .favorite_vhosts()
            .into_iter()
            .nth(position - 1)
    }
}

/// Quick-switch bindings for `favorites`, after the "all" binding.
#[must_use]
pub fn favorite_bindings(favorites: &[String]) -> Vec<KeyBinding> {
    let mut bindings = vec![KeyBinding::new(ALL_VHOSTS_KEY, "all")];
    bindings.extend(
        favorites
            .iter()
            .take(MAX_FAVORITE_VHOSTS)
            .zip('1'..='9')
            .map(|(vhost, key)| KeyBinding::new(Key::Char(key), vhost.clone())),
    );
    bindings
}

impl<V: ClusterView> ClusterView for VhostExtender<V> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn cluster(&self) -> &Arc<Cluster> {
        self.inner.cluster()
    }

    fn title(&self) -> String {
        let vhost = self.inner.cluster().active_virtual_host();
        format!("{} ({})", self.inner.title(), vhost_display_name(&vhost))
    }

    fn start(&self) {
        self.inner.start();
    }

    fn stop(&self) {
        self.inner.stop();
    }

    fn request_update(&self, kind: UpdateKind) {
        self.inner.request_update(kind);
    }

    fn key_bindings(&self) -> Vec<KeyBinding> {
        let mut bindings = self.inner.key_bindings();
        bindings.extend(favorite_bindings(&self.inner.cluster().favorite_vhosts()));
        bindings
    }

    fn handle_key(&self, key: Key) -> bool {
        match self.target(key) {
            Some(vhost) => {
                info!(
                    component = %self.inner.name(),
                    vhost = %vhost_display_name(&vhost),
                    "switching to virtual host"
                );
                self.inner.cluster().set_active_virtual_host(&vhost);
                true
            }
            None => self.inner.handle_key(key),
        }
    }

    fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_aware::{ClusterAwareView, REFRESH_KEY};
    use crate::strategy::ManualUpdateStrategy;
    use crate::strategy::tests::recorder;
    use crate::test_support::fake_cluster;

    fn digits(bindings: &[KeyBinding]) -> Vec<(Key, String)> {
        bindings
            .iter()
            .filter(|b| matches!(b.key, Key::Char(c) if c.is_ascii_digit()))
            .map(|b| (b.key, b.description.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_two_favorites_give_two_bindings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, _api) = fake_cluster(dir.path(), &["a", "b"]).await;
        let (update_fn, _calls) = recorder();
        let view = VhostExtender::new(ClusterAwareView::new(
            "queues",
            cluster,
            ManualUpdateStrategy::new(),
            update_fn,
        ));

        let bindings = view.key_bindings();

        assert_eq!(
            digits(&bindings),
            vec![
                (Key::Char('0'), "all".to_string()),
                (Key::Char('1'), "a".to_string()),
                (Key::Char('2'), "b".to_string()),
            ]
        );
        assert!(bindings.iter().any(|b| b.key == REFRESH_KEY));
        assert_eq!(view.target(Key::Char('3')), None);
    }

    #[test]
    fn test_favorite_bindings_cap_at_nine() {
        let favorites: Vec<String> = (1..=12).map(|i| format!("v{i}")).collect();
        let bindings = favorite_bindings(&favorites);
        assert_eq!(bindings.len(), 10);
        assert_eq!(bindings[9], KeyBinding::new(Key::Char('9'), "v9"));
    }

    #[tokio::test]
    async fn test_keys_switch_vhost_and_title() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (cluster, _api) = fake_cluster(dir.path(), &["a", "b"]).await;
        let (update_fn, calls) = recorder();
        let view = VhostExtender::new(ClusterAwareView::new(
            "queues",
            Arc::clone(&cluster),
            ManualUpdateStrategy::new(),
            update_fn,
        ));
        view.start();
        assert_eq!(view.title(), "queues ((all))");

        assert!(view.handle_key(Key::Char('2')));
        assert_eq!(cluster.active_virtual_host(), "b");
        assert_eq!(view.title(), "queues (b)");

        assert!(view.handle_key(ALL_VHOSTS_KEY));
        assert_eq!(cluster.active_virtual_host(), "");

        assert!(!view.handle_key(Key::Char('7')));
        assert!(view.handle_key(REFRESH_KEY));
        assert_eq!(
            *calls.lock(),
            vec![
                UpdateKind::Full,
                UpdateKind::Full,
                UpdateKind::Full,
                UpdateKind::Partial
            ]
        );
        view.stop();
    }
}
