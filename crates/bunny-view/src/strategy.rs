//! When a view refetches its data.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default period of the live update loop.
pub const UPDATE_INTERVAL: Duration = Duration::from_secs(5);

/// How much a view should refetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    /// Reload everything, resetting selection and scroll.
    Full,
    /// Refresh the rows in place.
    Partial,
}

impl UpdateKind {
    /// Name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback that performs an update.
///
/// It may run inline on the caller's thread, so it must not block and must
/// not call back into the strategy that owns it.
pub type UpdateFn = Arc<dyn Fn(UpdateKind) + Send + Sync>;

/// Decides when a view's update function runs.
pub trait UpdateStrategy: Send {
    /// Begin scheduling updates; performs the initial update.
    fn start(&mut self);

    /// Stop scheduling updates. State such as "initialized" is kept.
    fn stop(&mut self);

    /// Suspend automatic updates.
    fn pause(&mut self);

    /// Resume automatic updates and refresh immediately.
    fn resume(&mut self);

    /// Ask for an update of the given kind.
    fn request_update(&self, kind: UpdateKind);

    /// Install the update callback.
    fn set_update_fn(&mut self, update_fn: UpdateFn);

    /// Component name for logs.
    fn name(&self) -> &str;

    /// Set the component name.
    fn set_name(&mut self, name: &str);

    /// Whether automatic updates are suspended.
    fn is_paused(&self) -> bool {
        false
    }
}

/// Update callback shared with a running loop, so it can be replaced
/// without restarting the loop.
#[derive(Clone, Default)]
struct UpdateSlot(Arc<RwLock<Option<UpdateFn>>>);

impl UpdateSlot {
    fn set(&self, update_fn: UpdateFn) {
        *self.0.write() = Some(update_fn);
    }

    fn run(&self, component: &str, kind: UpdateKind) {
        let update_fn = self.0.read().clone();
        match update_fn {
            Some(update_fn) => update_fn(kind),
            None => warn!(component, %kind, "no update function set, skipping update"),
        }
    }
}

/// Updates on a timer and on request, pausable.
///
/// While the loop runs, requests go through a one-slot queue: a request made
/// while another is pending is dropped, so the first queued kind wins. With
/// no loop running, requests run the update function inline.
pub struct LiveUpdateStrategy {
    name: String,
    update_fn: UpdateSlot,
    interval: Duration,
    initialized: bool,
    paused: bool,
    requests: Option<mpsc::Sender<UpdateKind>>,
}

impl fmt::Debug for LiveUpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveUpdateStrategy")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("initialized", &self.initialized)
            .field("paused", &self.paused)
            .field("running", &self.requests.is_some())
            .finish()
    }
}

impl Default for LiveUpdateStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveUpdateStrategy {
    /// Strategy ticking every [`UPDATE_INTERVAL`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: String::new(),
            update_fn: UpdateSlot::default(),
            interval: UPDATE_INTERVAL,
            initialized: false,
            paused: false,
            requests: None,
        }
    }

    /// Change the timer period. Takes effect on the next loop start.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether the background loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.requests.is_some()
    }

    fn start_loop(&mut self) {
        if self.requests.is_some() {
            return;
        }
        debug!(component = %self.name, "starting update loop");
        let (tx, rx) = mpsc::channel(1);
        self.requests = Some(tx);
        tokio::spawn(update_loop(
            self.name.clone(),
            self.interval,
            self.update_fn.clone(),
            rx,
        ));
    }

    fn stop_loop(&mut self) {
        if self.requests.take().is_some() {
            debug!(component = %self.name, "stopping update loop");
        }
    }
}

impl UpdateStrategy for LiveUpdateStrategy {
    fn start(&mut self) {
        if !self.paused {
            self.start_loop();
        }

        if !self.initialized {
            self.request_update(UpdateKind::Full);
            self.initialized = true;
        } else if !self.paused {
            self.request_update(UpdateKind::Partial);
        }
    }

    fn stop(&mut self) {
        self.stop_loop();
    }

    fn pause(&mut self) {
        self.paused = true;
        self.stop_loop();
    }

    fn resume(&mut self) {
        self.paused = false;
        self.start_loop();
        self.request_update(UpdateKind::Partial);
    }

    fn request_update(&self, kind: UpdateKind) {
        match &self.requests {
            None => {
                debug!(component = %self.name, %kind, "performing update without update loop");
                self.update_fn.run(&self.name, kind);
            }
            Some(requests) => {
                if requests.try_send(kind).is_ok() {
                    debug!(component = %self.name, %kind, "update requested");
                }
            }
        }
    }

    fn set_update_fn(&mut self, update_fn: UpdateFn) {
        self.update_fn.set(update_fn);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

async fn update_loop(
    component: String,
    interval: Duration,
    update_fn: UpdateSlot,
    mut requests: mpsc::Receiver<UpdateKind>,
) {
    debug!(%component, "update loop started");
    let mut round: u64 = 0;
    loop {
        let kind = tokio::select! {
            request = requests.recv() => match request {
                Some(kind) => kind,
                None => break,
            },
            () = tokio::time::sleep(interval) => UpdateKind::Partial,
        };
        round += 1;
        debug!(%component, round, %kind, "updating");
        update_fn.run(&component, kind);
    }
    debug!(%component, "update loop stopped");
}

/// Updates only when asked, plus once on first start.
#[derive(Default)]
pub struct ManualUpdateStrategy {
    name: String,
    update_fn: UpdateSlot,
    initialized: bool,
}

impl fmt::Debug for ManualUpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualUpdateStrategy")
            .field("name", &self.name)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl ManualUpdateStrategy {
    /// New strategy; the first start performs a full update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdateStrategy for ManualUpdateStrategy {
    fn start(&mut self) {
        if !self.initialized {
            self.request_update(UpdateKind::Full);
            self.initialized = true;
        }
    }

    fn stop(&mut self) {}

    fn pause(&mut self) {}

    fn resume(&mut self) {}

    fn request_update(&self, kind: UpdateKind) {
        debug!(component = %self.name, %kind, "performing manual update");
        self.update_fn.run(&self.name, kind);
    }

    fn set_update_fn(&mut self, update_fn: UpdateFn) {
        self.update_fn.set(update_fn);
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Update function that records every kind it is called with.
    pub(crate) fn recorder() -> (UpdateFn, Arc<Mutex<Vec<UpdateKind>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let update_fn: UpdateFn = Arc::new(move |kind| sink.lock().push(kind));
        (update_fn, calls)
    }

    /// Let spawned loops drain their queues without reaching the timer.
    pub(crate) async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn live() -> (LiveUpdateStrategy, Arc<Mutex<Vec<UpdateKind>>>) {
        let (update_fn, calls) = recorder();
        let mut strategy = LiveUpdateStrategy::new();
        strategy.set_name("queues");
        strategy.set_update_fn(update_fn);
        (strategy, calls)
    }

    #[test]
    fn test_update_kind_display() {
        assert_eq!(UpdateKind::Full.to_string(), "full");
        assert_eq!(UpdateKind::Partial.to_string(), "partial");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_restart_is_partial() {
        let (mut strategy, calls) = live();

        strategy.start();
        settle().await;
        assert_eq!(*calls.lock(), vec![UpdateKind::Full]);

        strategy.stop();
        strategy.start();
        settle().await;
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Partial]);
        strategy.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_timer_requests_partial() {
        let (mut strategy, calls) = live();

        strategy.start();
        settle().await;
        tokio::time::sleep(UPDATE_INTERVAL * 2 + Duration::from_millis(100)).await;

        assert_eq!(
            *calls.lock(),
            vec![UpdateKind::Full, UpdateKind::Partial, UpdateKind::Partial]
        );
        strategy.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_first_queued_kind_wins() {
        let (mut strategy, calls) = live();
        strategy.start();
        settle().await;
        calls.lock().clear();

        strategy.request_update(UpdateKind::Partial);
        strategy.request_update(UpdateKind::Full);
        settle().await;

        assert_eq!(*calls.lock(), vec![UpdateKind::Partial]);
        strategy.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_pause_runs_requests_inline() {
        let (mut strategy, calls) = live();
        strategy.start();
        settle().await;

        strategy.pause();
        assert!(strategy.is_paused());
        assert!(!strategy.is_running());

        strategy.request_update(UpdateKind::Full);
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Full]);

        tokio::time::sleep(UPDATE_INTERVAL * 3).await;
        assert_eq!(calls.lock().len(), 2, "no timer updates while paused");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_start_while_paused_keeps_loop_stopped() {
        let (mut strategy, calls) = live();
        strategy.pause();

        strategy.start();
        assert!(!strategy.is_running());
        assert_eq!(*calls.lock(), vec![UpdateKind::Full]);

        strategy.stop();
        strategy.start();
        assert_eq!(calls.lock().len(), 1, "paused restart does not refresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_resume_refreshes() {
        let (mut strategy, calls) = live();
        strategy.start();
        settle().await;
        strategy.pause();

        strategy.resume();
        settle().await;

        assert!(strategy.is_running());
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Partial]);
        strategy.stop();
    }

    #[tokio::test]
    async fn test_live_without_update_fn_does_not_panic() {
        let mut strategy = LiveUpdateStrategy::new();
        strategy.pause();
        strategy.start();
        strategy.request_update(UpdateKind::Partial);
    }

    #[test]
    fn test_manual_updates_only_when_asked() {
        let (update_fn, calls) = recorder();
        let mut strategy = ManualUpdateStrategy::new();
        strategy.set_update_fn(update_fn);

        strategy.start();
        strategy.stop();
        strategy.start();
        strategy.pause();
        strategy.resume();
        assert_eq!(*calls.lock(), vec![UpdateKind::Full]);

        strategy.request_update(UpdateKind::Partial);
        assert_eq!(*calls.lock(), vec![UpdateKind::Full, UpdateKind::Partial]);
        assert!(!strategy.is_paused());
    }
}
