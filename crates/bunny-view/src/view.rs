//! Key bindings and the view capability shared by every cluster panel.

use std::fmt;
use std::sync::Arc;

use bunny_cluster::Cluster;

use crate::strategy::UpdateKind;

/// A key press as views see it, independent of the terminal backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Plain character.
    Char(char),
    /// Character with Ctrl held.
    Ctrl(char),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Char(c) => write!(f, "<{c}>"),
            Self::Ctrl(c) => write!(f, "<ctrl-{c}>"),
        }
    }
}

/// A key and what it does, for the help bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    /// Bound key.
    pub key: Key,
    /// Short action name.
    pub description: String,
}

impl KeyBinding {
    /// Binding of `key` to `description`.
    #[must_use]
    pub fn new(key: Key, description: impl Into<String>) -> Self {
        Self {
            key,
            description: description.into(),
        }
    }
}

/// Display name of a vhost; the empty vhost means all of them.
#[must_use]
pub fn vhost_display_name(vhost: &str) -> &str {
    if vhost.is_empty() { "(all)" } else { vhost }
}

/// A panel bound to one cluster.
pub trait ClusterView: Send + Sync {
    /// Component name, used in logs and as the default title.
    fn name(&self) -> &str;

    /// Cluster the view reads from.
    fn cluster(&self) -> &Arc<Cluster>;

    /// Title shown above the panel.
    fn title(&self) -> String {
        self.name().to_string()
    }

    /// The view became visible.
    fn start(&self);

    /// The view was hidden.
    fn stop(&self);

    /// Ask for a refetch.
    fn request_update(&self, kind: UpdateKind);

    /// Keys the view currently handles.
    fn key_bindings(&self) -> Vec<KeyBinding>;

    /// Handle a key; returns `false` when the key is not bound.
    fn handle_key(&self, key: Key) -> bool;

    /// Whether automatic updates are suspended.
    fn is_paused(&self) -> bool;
}

impl<V: ClusterView + ?Sized> ClusterView for Arc<V> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn cluster(&self) -> &Arc<Cluster> {
        (**self).cluster()
    }

    fn title(&self) -> String {
        (**self).title()
    }

    fn start(&self) {
        (**self).start();
    }

    fn stop(&self) {
        (**self).stop();
    }

    fn request_update(&self, kind: UpdateKind) {
        (**self).request_update(kind);
    }

    fn key_bindings(&self) -> Vec<KeyBinding> {
        (**self).key_bindings()
    }

    fn handle_key(&self, key: Key) -> bool {
        (**self).handle_key(key)
    }

    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vhost_display_name() {
        assert_eq!(vhost_display_name(""), "(all)");
        assert_eq!(vhost_display_name("/"), "/");
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::Char('0').to_string(), "<0>");
        assert_eq!(Key::Ctrl('r').to_string(), "<ctrl-r>");
    }
}
