//! Application state for tbunny

use std::sync::{Arc, Weak};
use std::time::Instant;

use bunny_cluster::{
    Cluster, ClusterConfig, ClusterEvent, ClusterListener, Information, Manager, ManagerListener,
};
use bunny_rmq::{ConnectionInfo, ExchangeInfo, QueueInfo, VhostInfo};
use bunny_view::{
    ClusterAwareView, ClusterView, KeyBinding, LiveUpdateStrategy, ManualUpdateStrategy,
    REFRESH_KEY, UpdateKind, UpdateStrategy, VhostExtender, vhost_display_name,
};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, info, warn};

use crate::data::{ChannelListener, Resource, ResourceFetcher, clusters_update_fn, send};
use crate::events::{DataEvent, EventSender, view_key};
use crate::form::{ClusterForm, FormAction};

/// Reason sent to the broker when closing a connection from the UI.
const CLOSE_REASON: &str = "Closed via tbunny";

/// Top-level panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    /// Configured clusters.
    Clusters,
    /// Virtual hosts of the connected cluster.
    Vhosts,
    /// Queues of the active vhost.
    Queues,
    /// Exchanges of the active vhost.
    Exchanges,
    /// Client connections of the active vhost.
    Connections,
}

impl Tab {
    /// Every tab in display order.
    pub const ALL: [Tab; 5] = [
        Self::Clusters,
        Self::Vhosts,
        Self::Queues,
        Self::Exchanges,
        Self::Connections,
    ];

    /// Header label.
    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Clusters => "Clusters",
            Self::Vhosts => "Vhosts",
            Self::Queues => "Queues",
            Self::Exchanges => "Exchanges",
            Self::Connections => "Connections",
        }
    }

    /// Position in [`Tab::ALL`].
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Clusters => 0,
            Self::Vhosts => 1,
            Self::Queues => 2,
            Self::Exchanges => 3,
            Self::Connections => 4,
        }
    }

    fn resource(self) -> Option<Resource> {
        match self {
            Self::Clusters => None,
            Self::Vhosts => Some(Resource::Vhosts),
            Self::Queues => Some(Resource::Queues),
            Self::Exchanges => Some(Resource::Exchanges),
            Self::Connections => Some(Resource::Connections),
        }
    }

    fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    fn prev(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

/// Rows of one table plus the selected row.
#[derive(Debug)]
pub struct Listing<T> {
    /// Current rows.
    pub rows: Vec<T>,
    /// Selected row index.
    pub selected: usize,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            selected: 0,
        }
    }
}

impl<T> Listing<T> {
    /// Replace the rows. A full update resets the selection, a partial one
    /// keeps it where possible.
    pub fn apply(&mut self, kind: UpdateKind, rows: Vec<T>) {
        self.rows = rows;
        match kind {
            UpdateKind::Full => self.selected = 0,
            UpdateKind::Partial => {
                self.selected = self.selected.min(self.rows.len().saturating_sub(1));
            }
        }
    }

    /// Selected row, if any.
    #[must_use]
    pub fn selected(&self) -> Option<&T> {
        self.rows.get(self.selected)
    }

    fn clear(&mut self) {
        self.rows.clear();
        self.selected = 0;
    }

    fn select_next(&mut self) {
        if self.selected + 1 < self.rows.len() {
            self.selected += 1;
        }
    }

    fn select_prev(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }
}

/// Status line message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Text shown.
    pub message: String,
    /// Rendered as an error.
    pub is_error: bool,
}

/// One panel's view and the fetcher feeding it.
struct Panel {
    view: Box<dyn ClusterView>,
    fetcher: Arc<ResourceFetcher>,
}

impl Panel {
    fn new<S: UpdateStrategy + 'static>(
        resource: Resource,
        session: u64,
        cluster: &Arc<Cluster>,
        strategy: S,
        tx: &EventSender,
    ) -> Self {
        let fetcher = ResourceFetcher::new(resource, session, Arc::clone(cluster), tx.clone());
        let view = VhostExtender::new(ClusterAwareView::new(
            resource.name(),
            Arc::clone(cluster),
            strategy,
            fetcher.update_fn(),
        ));
        Self {
            view: Box::new(view),
            fetcher,
        }
    }

    fn stop(&self) {
        self.view.stop();
        self.fetcher.retire();
    }
}

/// Views bound to the active cluster.
struct Session {
    id: u64,
    cluster: Arc<Cluster>,
    vhosts: Panel,
    queues: Panel,
    exchanges: Panel,
    connections: Panel,
}

impl Session {
    fn new(id: u64, cluster: Arc<Cluster>, tx: &EventSender) -> Self {
        let live = |resource| Panel::new(resource, id, &cluster, LiveUpdateStrategy::new(), tx);
        // The vhost list comes from the cluster's own poller, so that panel
        // only reloads on request or on cluster events.
        let vhosts = Panel::new(Resource::Vhosts, id, &cluster, ManualUpdateStrategy::new(), tx);
        Self {
            id,
            vhosts,
            queues: live(Resource::Queues),
            exchanges: live(Resource::Exchanges),
            connections: live(Resource::Connections),
            cluster,
        }
    }

    fn view(&self, resource: Resource) -> &dyn ClusterView {
        let panel = match resource {
            Resource::Vhosts => &self.vhosts,
            Resource::Queues => &self.queues,
            Resource::Exchanges => &self.exchanges,
            Resource::Connections => &self.connections,
        };
        panel.view.as_ref()
    }

    fn stop(&self) {
        self.vhosts.stop();
        self.queues.stop();
        self.exchanges.stop();
        self.connections.stop();
    }
}

/// Main application state
pub struct App {
    /// Is the app running
    pub running: bool,
    /// Currently selected tab
    pub tab: Tab,
    /// Cluster definitions
    pub clusters: Listing<ClusterConfig>,
    /// Vhosts of the connected cluster
    pub vhosts: Listing<VhostInfo>,
    /// Queues of the active vhost
    pub queues: Listing<QueueInfo>,
    /// Exchanges of the active vhost
    pub exchanges: Listing<ExchangeInfo>,
    /// Connections of the active vhost
    pub connections: Listing<ConnectionInfo>,
    /// Status line
    pub status: Option<Status>,
    /// Show the splash screen until then
    pub splash_until: Option<Instant>,
    /// Open add-cluster popup
    pub form: Option<ClusterForm>,
    /// Vhost waiting for delete confirmation
    pub pending_delete: Option<String>,
    manager: Arc<Manager>,
    tx: EventSender,
    listener: Arc<ChannelListener>,
    clusters_strategy: ManualUpdateStrategy,
    session: Option<Session>,
    sessions_started: u64,
}

impl App {
    /// State over `manager`, reporting background results on `tx`.
    pub fn new(manager: Arc<Manager>, tx: EventSender) -> Self {
        let listener = ChannelListener::new(tx.clone());
        let manager_listener: Weak<dyn ManagerListener> = Arc::downgrade(&listener) as Weak<dyn ManagerListener>;
        manager.add_listener(manager_listener);

        let mut clusters_strategy = ManualUpdateStrategy::new();
        clusters_strategy.set_name("clusters");
        clusters_strategy.set_update_fn(clusters_update_fn(Arc::clone(&manager), tx.clone()));

        Self {
            running: true,
            tab: Tab::Clusters,
            clusters: Listing::default(),
            vhosts: Listing::default(),
            queues: Listing::default(),
            exchanges: Listing::default(),
            connections: Listing::default(),
            status: None,
            splash_until: None,
            form: None,
            pending_delete: None,
            manager,
            tx,
            listener,
            clusters_strategy,
            session: None,
            sessions_started: 0,
        }
    }

    /// Load the cluster list and reconnect to the remembered cluster.
    pub fn start(&mut self) {
        self.clusters_strategy.start();
        let active = self.manager.active_cluster_name();
        if !active.is_empty() {
            self.connect(active);
        }
    }

    /// Stop every view and drop the connection.
    pub fn shutdown(&mut self) {
        self.end_session();
        self.manager.disconnect();
    }

    /// The connected cluster, if any.
    #[must_use]
    pub fn cluster(&self) -> Option<&Arc<Cluster>> {
        self.session.as_ref().map(|s| &s.cluster)
    }

    /// Broker metadata and availability of the connected cluster.
    #[must_use]
    pub fn cluster_info(&self) -> Option<(Information, bool)> {
        self.cluster().map(|c| (c.information(), c.is_available()))
    }

    /// Title of the visible panel.
    #[must_use]
    pub fn view_title(&self) -> String {
        match self.active_view() {
            Some(view) => view.title(),
            None => self.tab.title().to_string(),
        }
    }

    /// Whether the visible panel has stopped refreshing.
    #[must_use]
    pub fn view_paused(&self) -> bool {
        self.active_view().is_some_and(|view| view.is_paused())
    }

    /// Keys of the visible panel, for the help bar.
    #[must_use]
    pub fn key_help(&self) -> Vec<(String, String)> {
        let mut help: Vec<(String, String)> = match self.tab {
            Tab::Clusters => vec![
                ("<enter>".into(), "connect".into()),
                ("<a>".into(), "add".into()),
                ("<d>".into(), "delete".into()),
                ("<ctrl-r>".into(), "refresh".into()),
            ],
            Tab::Vhosts => vec![
                ("<enter>".into(), "use".into()),
                ("<d>".into(), "delete".into()),
            ],
            Tab::Queues => vec![("<p>".into(), "purge".into())],
            Tab::Connections => vec![("<x>".into(), "close".into())],
            Tab::Exchanges => Vec::new(),
        };
        if let Some(view) = self.active_view() {
            help.extend(
                view.key_bindings()
                    .into_iter()
                    .map(|KeyBinding { key, description }| (key.to_string(), description)),
            );
        }
        help
    }

    /// Name of the cluster currently connected.
    fn active_name(&self) -> Option<&str> {
        self.cluster().map(|c| c.name())
    }

    fn active_view(&self) -> Option<&dyn ClusterView> {
        let resource = self.tab.resource()?;
        self.session.as_ref().map(|s| s.view(resource))
    }

    fn info(&mut self, message: impl Into<String>) {
        self.status = Some(Status {
            message: message.into(),
            is_error: false,
        });
    }

    fn error(&mut self, message: impl Into<String>) {
        self.status = Some(Status {
            message: message.into(),
            is_error: true,
        });
    }

    /// Switch panels, stopping the one being left.
    pub fn select_tab(&mut self, tab: Tab) {
        if tab == self.tab {
            return;
        }
        if tab.resource().is_some() && self.session.is_none() {
            self.error("not connected to a cluster");
            return;
        }
        if let Some(view) = self.active_view() {
            view.stop();
        }
        self.tab = tab;
        match self.active_view() {
            Some(view) => view.start(),
            None => self.clusters_strategy.start(),
        }
    }

    /// Handle keyboard input
    pub fn handle_key(&mut self, key: KeyEvent) {
        if self.form.is_some() {
            self.handle_form_key(key);
            return;
        }
        if let Some(vhost) = self.pending_delete.take() {
            if key.code == KeyCode::Char('y') {
                self.delete_vhost(vhost);
            } else {
                self.info(format!("kept virtual host {}", vhost_display_name(&vhost)));
            }
            return;
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('q' | 'Q') => {
                self.running = false;
                return;
            }
            KeyCode::Char('c') if ctrl => {
                self.running = false;
                return;
            }
            KeyCode::Tab | KeyCode::Right => {
                self.select_tab(self.tab.next());
                return;
            }
            KeyCode::BackTab | KeyCode::Left => {
                self.select_tab(self.tab.prev());
                return;
            }
            _ => {}
        }

        match self.tab {
            Tab::Clusters => self.handle_clusters_key(key),
            tab => self.handle_resource_key(tab, key),
        }
    }

    fn handle_clusters_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.clusters.select_prev(),
            KeyCode::Down | KeyCode::Char('j') => self.clusters.select_next(),
            KeyCode::Enter => {
                if let Some(name) = self.clusters.selected().map(|c| c.name().to_string()) {
                    self.connect(name);
                }
            }
            KeyCode::Char('a') => self.form = Some(ClusterForm::new()),
            KeyCode::Char('d') => self.delete_selected_cluster(),
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.clusters_strategy.request_update(UpdateKind::Partial);
            }
            _ => {}
        }
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        match form.handle_key(key) {
            FormAction::Edit => {}
            FormAction::Cancel => self.form = None,
            FormAction::Submit { name, params } => match self.manager.create(&name, params) {
                Ok(_) => {
                    info!(cluster = %name, "cluster definition added");
                    self.form = None;
                    self.info(format!("added cluster {name}"));
                    self.clusters_strategy.request_update(UpdateKind::Partial);
                }
                Err(e) => form.error = Some(e.to_string()),
            },
        }
    }

    fn handle_resource_key(&mut self, tab: Tab, key: KeyEvent) {
        let view_key = view_key(&key);
        if tab == Tab::Vhosts && view_key == Some(REFRESH_KEY) {
            if let Some(cluster) = self.cluster() {
                cluster.refresh();
            }
        }
        if let (Some(view), Some(view_key)) = (self.active_view(), view_key) {
            if view.handle_key(view_key) {
                return;
            }
        }

        match (tab, key.code) {
            (Tab::Vhosts, KeyCode::Up | KeyCode::Char('k')) => self.vhosts.select_prev(),
            (Tab::Vhosts, KeyCode::Down | KeyCode::Char('j')) => self.vhosts.select_next(),
            (Tab::Vhosts, KeyCode::Enter) => self.use_selected_vhost(),
            (Tab::Vhosts, KeyCode::Char('d')) => {
                if let Some(vhost) = self.vhosts.selected() {
                    let name = vhost.name.clone();
                    self.info(format!("delete virtual host {name}? [y/N]"));
                    self.pending_delete = Some(name);
                }
            }
            (Tab::Queues, KeyCode::Up | KeyCode::Char('k')) => self.queues.select_prev(),
            (Tab::Queues, KeyCode::Down | KeyCode::Char('j')) => self.queues.select_next(),
            (Tab::Exchanges, KeyCode::Up | KeyCode::Char('k')) => self.exchanges.select_prev(),
            (Tab::Exchanges, KeyCode::Down | KeyCode::Char('j')) => self.exchanges.select_next(),
            (Tab::Connections, KeyCode::Up | KeyCode::Char('k')) => self.connections.select_prev(),
            (Tab::Connections, KeyCode::Down | KeyCode::Char('j')) => {
                self.connections.select_next();
            }
            (Tab::Queues, KeyCode::Char('p')) => self.purge_selected_queue(),
            (Tab::Connections, KeyCode::Char('x')) => self.close_selected_connection(),
            _ => {}
        }
    }

    /// Connect in the background; the manager reports the switch.
    pub fn connect(&mut self, name: String) {
        if self.active_name() == Some(name.as_str()) {
            return;
        }
        self.info(format!("connecting to {name}..."));
        let manager = Arc::clone(&self.manager);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.connect_to_cluster(&name).await {
                warn!(cluster = %name, error = %e, "connect failed");
                send(&tx, DataEvent::Error(e.to_string()));
            }
        });
    }

    fn delete_selected_cluster(&mut self) {
        let Some(name) = self.clusters.selected().map(|c| c.name().to_string()) else {
            return;
        };
        if self.active_name() == Some(name.as_str()) {
            self.error(format!("cannot delete the active cluster {name}"));
            return;
        }
        match self.manager.delete(&name) {
            Ok(()) => self.info(format!("deleted cluster {name}")),
            Err(e) => self.error(e.to_string()),
        }
        self.clusters_strategy.request_update(UpdateKind::Partial);
    }

    fn use_selected_vhost(&self) {
        if let (Some(cluster), Some(vhost)) = (self.cluster(), self.vhosts.selected()) {
            cluster.set_active_virtual_host(&vhost.name);
        }
    }

    /// Delete `name` on the broker, leaving it first if it is active.
    fn delete_vhost(&self, name: String) {
        let Some(cluster) = self.cluster() else {
            return;
        };
        let cluster = Arc::clone(cluster);
        self.spawn_action(async move {
            cluster.delete_vhost(&name).await?;
            if cluster.active_virtual_host() == name {
                cluster.set_active_virtual_host("");
            }
            cluster.refresh();
            Ok(format!("deleted virtual host {name}"))
        });
    }

    fn purge_selected_queue(&self) {
        let (Some(cluster), Some(queue)) = (self.cluster(), self.queues.selected()) else {
            return;
        };
        let cluster = Arc::clone(cluster);
        let (vhost, name) = (queue.vhost.clone(), queue.name.clone());
        self.spawn_action(async move {
            cluster
                .purge_queue(&vhost, &name)
                .await
                .map(|()| format!("purged queue {name}"))
        });
    }

    fn close_selected_connection(&self) {
        let (Some(cluster), Some(connection)) = (self.cluster(), self.connections.selected())
        else {
            return;
        };
        let cluster = Arc::clone(cluster);
        let name = connection.name.clone();
        self.spawn_action(async move {
            cluster
                .close_connection(&name, CLOSE_REASON)
                .await
                .map(|()| format!("closed connection {name}"))
        });
    }

    fn spawn_action<F>(&self, action: F)
    where
        F: Future<Output = bunny_cluster::Result<String>> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let event = match action.await {
                Ok(message) => DataEvent::ActionCompleted(message),
                Err(e) => DataEvent::Error(e.to_string()),
            };
            send(&tx, event);
        });
    }

    /// Fold a background result into the state.
    pub fn apply(&mut self, event: DataEvent) {
        match event {
            DataEvent::Clusters { kind, rows } => self.clusters.apply(kind, rows),
            DataEvent::Vhosts { session, kind, rows } if self.is_current(session) => {
                self.vhosts.apply(kind, rows);
            }
            DataEvent::Queues { session, kind, rows } if self.is_current(session) => {
                self.queues.apply(kind, rows);
            }
            DataEvent::Exchanges { session, kind, rows } if self.is_current(session) => {
                self.exchanges.apply(kind, rows);
            }
            DataEvent::Connections { session, kind, rows } if self.is_current(session) => {
                self.connections.apply(kind, rows);
            }
            DataEvent::Vhosts { session, .. }
            | DataEvent::Queues { session, .. }
            | DataEvent::Exchanges { session, .. }
            | DataEvent::Connections { session, .. } => {
                debug!(session, "dropping rows of an ended session");
            }
            DataEvent::ActiveCluster(cluster) => self.on_active_cluster(cluster),
            DataEvent::Cluster(event) => self.on_cluster_event(event),
            DataEvent::ActionCompleted(message) => {
                self.info(message);
                if let Some(view) = self.active_view() {
                    view.request_update(UpdateKind::Partial);
                }
            }
            DataEvent::Error(message) => self.error(message),
        }
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
            session.cluster.remove_listener(self.listener.as_ref());
        }
        self.pending_delete = None;
        self.vhosts.clear();
        self.queues.clear();
        self.exchanges.clear();
        self.connections.clear();
    }

    fn on_active_cluster(&mut self, cluster: Option<Arc<Cluster>>) {
        if let (Some(new), Some(current)) = (&cluster, self.cluster()) {
            if Arc::ptr_eq(new, current) {
                return;
            }
        }
        self.end_session();

        match cluster {
            Some(cluster) => {
                info!(cluster = %cluster.name(), "active cluster changed");
                let cluster_listener: Weak<dyn ClusterListener> =
                    Arc::downgrade(&self.listener) as Weak<dyn ClusterListener>;
                cluster.add_listener(cluster_listener);
                self.info(format!("connected to {}", cluster.name()));
                self.sessions_started += 1;
                self.session = Some(Session::new(self.sessions_started, cluster, &self.tx));
                match self.active_view() {
                    Some(view) => view.start(),
                    None => self.select_tab(Tab::Queues),
                }
            }
            None => {
                self.tab = Tab::Clusters;
                self.info("disconnected");
            }
        }
        self.clusters_strategy.request_update(UpdateKind::Partial);
    }

    fn on_cluster_event(&mut self, event: ClusterEvent) {
        let Some(cluster) = self.cluster() else {
            return;
        };
        let name = cluster.name().to_string();
        match event {
            ClusterEvent::ConnectionLost => self.error(format!("connection to {name} lost")),
            ClusterEvent::ConnectionRestored => self.info(format!("connection to {name} restored")),
            ClusterEvent::ActiveVirtualHostChanged => {
                let vhost = cluster.active_virtual_host();
                self.info(format!("switched to virtual host {}", vhost_display_name(&vhost)));
            }
            ClusterEvent::VirtualHostsChanged | ClusterEvent::InformationChanged => {}
        }
    }
}
