//! Weakly-held listener registry.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Ordered set of weak listener references.
///
/// Delivery works on a snapshot so callbacks run without the registry lock
/// held; dead entries are pruned whenever a snapshot is taken.
pub(crate) struct ListenerSet<L: ?Sized> {
    entries: Mutex<Vec<Weak<L>>>,
}

impl<L: ?Sized> ListenerSet<L> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Weak<L>) {
        self.entries.lock().push(listener);
    }

    /// Remove the first entry pointing at `listener`.
    pub(crate) fn remove<T: ?Sized>(&self, listener: &T) -> bool {
        let target: *const T = listener;
        let mut entries = self.entries.lock();
        match entries
            .iter()
            .position(|entry| std::ptr::addr_eq(entry.as_ptr(), target))
        {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Live listeners in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<L>> {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
