//! Watch-driven membership tracking
//!
//! The tracker keeps a [`RegistryView`] in step with the children of the
//! registry root. It arms a children watch on the root and a data watch on
//! every child it learns about, then consumes its session's ordered event
//! channel in a single loop:
//!
//! | event                   | action                                         |
//! |-------------------------|------------------------------------------------|
//! | `ChildrenChanged(root)` | full [`MembershipTracker::refresh`]            |
//! | `DataChanged(child)`    | re-read with watch, overwrite the view entry   |
//! | `Deleted(child)`        | evict from the view (terminal for that path)   |
//!
//! Watches are one-shot. Between an event firing and the watch being re-armed
//! a further change to the same node goes unreported. That gap is part of the
//! coordination contract and is not papered over here: the next root-level
//! children-changed refresh (any server joining or leaving) reconciles it.

use crate::client::view::RegistryView;
use crate::common::{is_child_of, join_path, Error, Result};
use crate::coordination::{Coordination, WatchEvent, WatchEvents};
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct MembershipTracker<C> {
    coordination: Arc<C>,
    root: String,
    view: RegistryView,
}

/// Outcome of one refresh cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Children listed under the root
    pub listed: usize,
    /// Newly read and inserted
    pub added: usize,
    /// Listed but unreadable; retried next cycle
    pub skipped: usize,
    /// Present in the view but no longer listed
    pub evicted: usize,
}

impl<C: Coordination + 'static> MembershipTracker<C> {
    pub fn new(coordination: Arc<C>, root: impl Into<String>, view: RegistryView) -> Self {
        Self {
            coordination,
            root: root.into(),
            view,
        }
    }

    pub fn view(&self) -> &RegistryView {
        &self.view
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// List the root's children (re-arming the root watch) and read every
    /// child not already in the view (arming its data watch).
    ///
    /// Idempotent: with no registry change in between, a second call leaves
    /// the view untouched. A child that vanishes between listing and reading
    /// is skipped for this cycle.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let children = self
            .coordination
            .list_children(&self.root, true)
            .await
            .map_err(|e| Error::registry_read(&self.root, e))?;

        let mut report = RefreshReport {
            listed: children.len(),
            ..Default::default()
        };
        tracing::debug!("Count of active servers under {}: {}", self.root, children.len());

        let listed: Vec<String> = children
            .iter()
            .map(|name| join_path(&self.root, name))
            .collect();

        for path in &listed {
            if self.view.contains(path) {
                continue;
            }
            match self.read_location(path).await {
                Ok(location) => {
                    tracing::info!("Server {} at {}", path, location);
                    self.view.insert(path.clone(), location);
                    report.added += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping {} this cycle: {}", path, e);
                    report.skipped += 1;
                }
            }
        }

        let root = self.root.as_str();
        let evicted = self
            .view
            .retain(|path, _| !is_child_of(path, root) || listed.iter().any(|l| l == path));
        for path in &evicted {
            tracing::info!("Server {} no longer registered, evicted", path);
        }
        report.evicted = evicted.len();

        Ok(report)
    }

    /// Apply one watch notification
    pub async fn handle_event(&self, event: WatchEvent) -> Result<()> {
        tracing::debug!("Change detected: {}", event);

        match event {
            WatchEvent::ChildrenChanged(path) if path == self.root => {
                self.refresh().await?;
            }
            WatchEvent::DataChanged(path) if is_child_of(&path, &self.root) => {
                let location = self.read_location(&path).await?;
                tracing::info!("Server {} moved to {}", path, location);
                self.view.insert(path, location);
            }
            WatchEvent::Deleted(path) if path == self.root => {
                let root = self.root.clone();
                let evicted = self.view.retain(|p, _| !is_child_of(p, &root));
                tracing::warn!("Registry root deleted, evicted {} servers", evicted.len());
            }
            WatchEvent::Deleted(path) => {
                if let Some(location) = self.view.remove(&path) {
                    tracing::info!("Removing server {} ({})", path, location);
                }
            }
            other => {
                tracing::debug!("Ignoring unrelated event: {}", other);
            }
        }

        Ok(())
    }

    /// Consume notifications until the session's channel closes.
    ///
    /// Failures are per-event and non-fatal; the next refresh reconciles.
    pub async fn run(self, mut events: WatchEvents) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                tracing::warn!("Membership update failed: {}", e);
            }
        }
        tracing::info!("Watch channel closed, membership tracking stopped");
    }

    pub fn spawn(self, events: WatchEvents) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn read_location(&self, path: &str) -> Result<String> {
        let data = self
            .coordination
            .get_data(path, true)
            .await
            .map_err(|e| Error::registry_read(path, e))?;
        String::from_utf8(data.to_vec()).map_err(|_| Error::RegistryRead {
            path: path.to_string(),
            reason: "location is not valid UTF-8".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{CreateMode, MemorySession, Namespace};
    use bytes::Bytes;

    fn setup() -> (Arc<Namespace>, MemorySession, MembershipTracker<MemorySession>, WatchEvents) {
        let ns = Namespace::new();
        let (admin, _) = ns.connect().unwrap();
        admin
            .create_node_now("/chorano", Bytes::new(), CreateMode::Persistent)
            .unwrap();
        let (session, events) = ns.connect().unwrap();
        let tracker = MembershipTracker::new(Arc::new(session), "/chorano", RegistryView::new());
        (ns, admin, tracker, events)
    }

    fn drain(events: &mut WatchEvents) -> Vec<WatchEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_refresh_reads_children() {
        let (_ns, admin, tracker, _events) = setup();
        let path = admin
            .create_node_now(
                "/chorano/x_",
                Bytes::from("10.0.0.5:9000"),
                CreateMode::PersistentSequential,
            )
            .unwrap();

        let report = tracker.refresh().await.unwrap();
        assert_eq!(report.listed, 1);
        assert_eq!(report.added, 1);
        assert_eq!(tracker.view().get(&path).as_deref(), Some("10.0.0.5:9000"));
    }

    #[tokio::test]
    async fn test_refresh_twice_is_idempotent() {
        let (_ns, admin, tracker, _events) = setup();
        for port in [8111, 8112] {
            admin
                .create_node_now(
                    "/chorano/x_",
                    Bytes::from(format!("localhost:{}", port)),
                    CreateMode::PersistentSequential,
                )
                .unwrap();
        }

        tracker.refresh().await.unwrap();
        let first = tracker.view().snapshot();
        let second_report = tracker.refresh().await.unwrap();
        assert_eq!(second_report.added, 0);
        assert_eq!(second_report.evicted, 0);
        assert_eq!(tracker.view().snapshot(), first);
    }

    #[tokio::test]
    async fn test_refresh_without_root_is_registry_read_error() {
        let ns = Namespace::new();
        let (session, _events) = ns.connect().unwrap();
        let tracker = MembershipTracker::new(Arc::new(session), "/chorano", RegistryView::new());
        let result = tracker.refresh().await;
        assert!(matches!(result, Err(Error::RegistryRead { .. })));
        assert!(!result.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_data_change_updates_and_rearms() {
        let (_ns, admin, tracker, mut events) = setup();
        let path = admin
            .create_node_now(
                "/chorano/x_",
                Bytes::from("localhost:8111"),
                CreateMode::PersistentSequential,
            )
            .unwrap();
        tracker.refresh().await.unwrap();

        admin.set_data_now(&path, Bytes::from("localhost:9111")).unwrap();
        let fired = drain(&mut events);
        assert_eq!(fired, vec![WatchEvent::DataChanged(path.clone())]);
        for event in fired {
            tracker.handle_event(event).await.unwrap();
        }
        assert_eq!(tracker.view().get(&path).as_deref(), Some("localhost:9111"));

        // the watch was re-armed by the re-read
        admin.set_data_now(&path, Bytes::from("localhost:9222")).unwrap();
        assert_eq!(drain(&mut events), vec![WatchEvent::DataChanged(path)]);
    }

    #[tokio::test]
    async fn test_deleted_evicts() {
        let (ns, _admin, tracker, mut events) = setup();
        let (server, _server_events) = ns.connect().unwrap();
        let path = server
            .create_node_now(
                "/chorano/x_",
                Bytes::from("localhost:8111"),
                CreateMode::EphemeralSequential,
            )
            .unwrap();
        tracker.refresh().await.unwrap();
        assert_eq!(tracker.view().len(), 1);

        drop(server);
        for event in drain(&mut events) {
            tracker.handle_event(event).await.unwrap();
        }
        assert!(tracker.view().is_empty());
        assert!(!tracker.view().contains(&path));
    }

    #[tokio::test]
    async fn test_refresh_evicts_unlisted_entries() {
        let (_ns, _admin, tracker, _events) = setup();
        tracker.view().insert("/chorano/x_0000000042", "localhost:1");
        tracker.view().insert("/elsewhere/x", "localhost:2");

        let report = tracker.refresh().await.unwrap();
        assert_eq!(report.evicted, 1);
        assert!(!tracker.view().contains("/chorano/x_0000000042"));
        // entries outside the root are not the tracker's business
        assert!(tracker.view().contains("/elsewhere/x"));
    }
}
