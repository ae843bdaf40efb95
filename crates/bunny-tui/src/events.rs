//! Terminal input and background results, merged into one stream.

use std::sync::Arc;
use std::time::Duration;

use bunny_cluster::{Cluster, ClusterConfig, ClusterEvent};
use bunny_rmq::{ConnectionInfo, ExchangeInfo, QueueInfo, VhostInfo};
use bunny_view::{Key, UpdateKind};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;

/// Everything the main loop reacts to.
#[derive(Debug)]
pub enum AppEvent {
    /// Terminal key press
    Key(KeyEvent),
    /// Terminal resize
    Resize(u16, u16),
    /// Redraw tick
    Tick,
    /// Result of background work
    Data(DataEvent),
}

/// Results delivered by update functions and listeners.
#[derive(Debug)]
pub enum DataEvent {
    /// Cluster definitions were reloaded.
    Clusters {
        /// Requested update kind.
        kind: UpdateKind,
        /// Definitions sorted by name.
        rows: Vec<ClusterConfig>,
    },
    /// Vhosts of the active cluster.
    Vhosts {
        /// Session the fetch belongs to.
        session: u64,
        /// Requested update kind.
        kind: UpdateKind,
        /// Cached vhost list.
        rows: Vec<VhostInfo>,
    },
    /// Queues of the active vhost.
    Queues {
        /// Session the fetch belongs to.
        session: u64,
        /// Requested update kind.
        kind: UpdateKind,
        /// Fetched rows.
        rows: Vec<QueueInfo>,
    },
    /// Exchanges of the active vhost.
    Exchanges {
        /// Session the fetch belongs to.
        session: u64,
        /// Requested update kind.
        kind: UpdateKind,
        /// Fetched rows.
        rows: Vec<ExchangeInfo>,
    },
    /// Connections of the active vhost.
    Connections {
        /// Session the fetch belongs to.
        session: u64,
        /// Requested update kind.
        kind: UpdateKind,
        /// Fetched rows.
        rows: Vec<ConnectionInfo>,
    },
    /// The manager switched clusters.
    ActiveCluster(Option<Arc<Cluster>>),
    /// The active cluster reported something.
    Cluster(ClusterEvent),
    /// A broker-side action finished; the visible listing is stale.
    ActionCompleted(String),
    /// Something failed.
    Error(String),
}

/// Sender half handed to background work.
pub type EventSender = mpsc::UnboundedSender<AppEvent>;

/// Polls the terminal on a blocking thread and merges its events with
/// whatever background tasks send.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<AppEvent>,
    tx: EventSender,
}

impl EventHandler {
    /// Start polling the terminal, emitting a tick every `tick_rate` of
    /// inactivity.
    pub fn new(tick_rate: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();

        tokio::task::spawn_blocking(move || {
            loop {
                let event = if event::poll(tick_rate).unwrap_or(false) {
                    match event::read() {
                        Ok(Event::Key(key)) => AppEvent::Key(key),
                        Ok(Event::Resize(w, h)) => AppEvent::Resize(w, h),
                        _ => continue,
                    }
                } else {
                    AppEvent::Tick
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Self { rx, tx }
    }

    /// Next event, or `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<AppEvent> {
        self.rx.recv().await
    }

    /// Sender for background work.
    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }
}

/// Translate a terminal key into a view key, if views care about it.
#[must_use]
pub fn view_key(key: &KeyEvent) -> Option<Key> {
    match key.code {
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Ctrl(c)),
        KeyCode::Char(c) => Some(Key::Char(c)),
        _ => None,
    }
}
