//! In-process hierarchical namespace
//!
//! Holds the node tree, the per-parent sequence counters, the ephemeral
//! ownership of every node and the armed one-shot watches. All mutation
//! happens under one lock, and notifications are pushed into each session's
//! unbounded channel while that lock is held, so a session observes events
//! in the order the namespace applied them.

use crate::common::{node_name, parent_path, validate_path, Error, Result};
use crate::coordination::{Coordination, CreateMode, WatchEvent, WatchEvents};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

pub type SessionId = u64;

#[derive(Debug, Default)]
struct Node {
    data: Bytes,
    owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

#[derive(Debug)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, mpsc::UnboundedSender<WatchEvent>>,
    data_watches: HashMap<String, HashSet<SessionId>>,
    child_watches: HashMap<String, HashSet<SessionId>>,
    next_session: SessionId,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::default());
        Self {
            nodes,
            sessions: HashMap::new(),
            data_watches: HashMap::new(),
            child_watches: HashMap::new(),
            next_session: 1,
        }
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    fn ensure_session(&self, session: SessionId) -> Result<()> {
        if self.sessions.contains_key(&session) {
            Ok(())
        } else {
            Err(Error::Session(format!("session {} is closed", session)))
        }
    }

    /// Deliver `event` once to every session in `watchers`
    fn notify(&self, watchers: HashSet<SessionId>, event: &WatchEvent) {
        for session in watchers {
            if let Some(tx) = self.sessions.get(&session) {
                // a closed receiver just means the session is going away
                let _ = tx.send(event.clone());
            }
        }
    }

    fn take_watches(map: &mut HashMap<String, HashSet<SessionId>>, path: &str) -> HashSet<SessionId> {
        map.remove(path).unwrap_or_default()
    }

    fn create(
        &mut self,
        session: SessionId,
        path: &str,
        data: Bytes,
        mode: CreateMode,
    ) -> Result<String> {
        self.ensure_session(session)?;
        validate_path(path)?;
        let parent = parent_path(path)
            .ok_or_else(|| Error::NodeExists(path.to_string()))?
            .to_string();

        let parent_node = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| Error::NotFound(parent.clone()))?;
        if parent_node.owner.is_some() {
            return Err(Error::InvalidPath(format!(
                "{} (ephemeral nodes cannot have children)",
                parent
            )));
        }

        let actual = if mode.is_sequential() {
            let seq = parent_node.next_sequence;
            parent_node.next_sequence += 1;
            format!("{}{:010}", path, seq)
        } else {
            path.to_string()
        };

        if self.nodes.contains_key(&actual) {
            return Err(Error::NodeExists(actual));
        }

        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(node_name(&actual).to_string());
        }
        self.nodes.insert(
            actual.clone(),
            Node {
                data,
                owner: mode.is_ephemeral().then_some(session),
                ..Node::default()
            },
        );

        let watchers = Self::take_watches(&mut self.child_watches, &parent);
        self.notify(watchers, &WatchEvent::ChildrenChanged(parent));

        Ok(actual)
    }

    fn delete(&mut self, path: &str) -> Result<()> {
        let node = self.node(path)?;
        if !node.children.is_empty() {
            return Err(Error::InvalidPath(format!("{} (has children)", path)));
        }
        self.nodes.remove(path);

        // one Deleted per session even when both of its watches qualify
        let mut watchers = Self::take_watches(&mut self.data_watches, path);
        watchers.extend(Self::take_watches(&mut self.child_watches, path));
        self.notify(watchers, &WatchEvent::Deleted(path.to_string()));

        if let Some(parent) = parent_path(path) {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.remove(node_name(path));
            }
            let watchers = Self::take_watches(&mut self.child_watches, parent);
            self.notify(watchers, &WatchEvent::ChildrenChanged(parent.to_string()));
        }

        Ok(())
    }

    fn set_data(&mut self, path: &str, data: Bytes) -> Result<()> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        node.data = data;

        let watchers = Self::take_watches(&mut self.data_watches, path);
        self.notify(watchers, &WatchEvent::DataChanged(path.to_string()));
        Ok(())
    }

    fn get_data(&mut self, session: SessionId, path: &str, watch: bool) -> Result<Bytes> {
        self.ensure_session(session)?;
        let data = self.node(path)?.data.clone();
        if watch {
            self.data_watches
                .entry(path.to_string())
                .or_default()
                .insert(session);
        }
        Ok(data)
    }

    fn list_children(&mut self, session: SessionId, path: &str, watch: bool) -> Result<Vec<String>> {
        self.ensure_session(session)?;
        let children = self.node(path)?.children.iter().cloned().collect();
        if watch {
            self.child_watches
                .entry(path.to_string())
                .or_default()
                .insert(session);
        }
        Ok(children)
    }

    fn close_session(&mut self, session: SessionId) -> Vec<String> {
        // deepest first so a parent never outlives its children check
        let owned: Vec<String> = self
            .nodes
            .iter()
            .rev()
            .filter(|(_, node)| node.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        for path in &owned {
            if let Err(e) = self.delete(path) {
                tracing::warn!("Failed to expire ephemeral node {}: {}", path, e);
            }
        }

        self.sessions.remove(&session);
        for watchers in self
            .data_watches
            .values_mut()
            .chain(self.child_watches.values_mut())
        {
            watchers.remove(&session);
        }
        self.data_watches.retain(|_, w| !w.is_empty());
        self.child_watches.retain(|_, w| !w.is_empty());

        owned
    }
}

/// Shared namespace; sessions are opened with [`Namespace::connect`]
#[derive(Debug)]
pub struct Namespace {
    tree: Mutex<Tree>,
}

impl Namespace {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tree: Mutex::new(Tree::new()),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tree>> {
        self.tree
            .lock()
            .map_err(|_| Error::Internal("namespace lock poisoned".into()))
    }

    /// Open a session and its watch channel
    pub fn connect(self: &Arc<Self>) -> Result<(MemorySession, WatchEvents)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tree = self.lock()?;
        let id = tree.next_session;
        tree.next_session += 1;
        tree.sessions.insert(id, tx);
        drop(tree);

        tracing::debug!("Opened coordination session {}", id);
        Ok((
            MemorySession {
                id,
                namespace: Arc::clone(self),
            },
            rx,
        ))
    }

    /// End a session, expiring its ephemeral nodes
    pub fn close_session(&self, session: SessionId) {
        match self.lock() {
            Ok(mut tree) => {
                let expired = tree.close_session(session);
                tracing::debug!(
                    "Closed coordination session {} ({} ephemeral nodes expired)",
                    session,
                    expired.len()
                );
            }
            Err(e) => tracing::error!("Cannot close session {}: {}", session, e),
        }
    }

    /// Number of open sessions
    pub fn session_count(&self) -> usize {
        self.lock().map(|tree| tree.sessions.len()).unwrap_or(0)
    }

    /// Every node path, for diagnostics
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .map(|tree| tree.nodes.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// An open session on a [`Namespace`]; dropping it ends the session
#[derive(Debug)]
pub struct MemorySession {
    id: SessionId,
    namespace: Arc<Namespace>,
}

impl MemorySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn list_children_now(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.namespace.lock()?.list_children(self.id, path, watch)
    }

    pub fn get_data_now(&self, path: &str, watch: bool) -> Result<Bytes> {
        self.namespace.lock()?.get_data(self.id, path, watch)
    }

    pub fn create_node_now(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String> {
        self.namespace.lock()?.create(self.id, path, data, mode)
    }

    pub fn set_data_now(&self, path: &str, data: Bytes) -> Result<()> {
        let mut tree = self.namespace.lock()?;
        tree.ensure_session(self.id)?;
        tree.set_data(path, data)
    }

    pub fn exists_now(&self, path: &str) -> Result<bool> {
        Ok(self.namespace.lock()?.nodes.contains_key(path))
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.namespace.close_session(self.id);
    }
}

impl Coordination for MemorySession {
    async fn list_children(&self, path: &str, watch: bool) -> Result<Vec<String>> {
        self.list_children_now(path, watch)
    }

    async fn get_data(&self, path: &str, watch: bool) -> Result<Bytes> {
        self.get_data_now(path, watch)
    }

    async fn create_node(&self, path: &str, data: Bytes, mode: CreateMode) -> Result<String> {
        self.create_node_now(path, data, mode)
    }

    async fn set_data(&self, path: &str, data: Bytes) -> Result<()> {
        self.set_data_now(path, data)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        self.exists_now(path)
    }
}
