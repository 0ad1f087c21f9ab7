//! Coordination service adapter
//!
//! A hierarchical namespace of nodes with session-scoped (ephemeral) and
//! uniquely-ordered (sequential) creation, plus one-shot watches. Two
//! implementations share the [`Coordination`] contract:
//! - [`MemorySession`]: an in-process session on a shared [`Namespace`]
//! - [`RemoteSession`]: a session on a [`CoordService`] reached over TCP
//!
//! Every session owns a single ordered event channel ([`WatchEvents`]).
//! A watch fires at most once; callers that want further notifications
//! must re-arm it by reading again with `watch = true`.

pub mod namespace;
pub mod protocol;
pub mod remote;
pub mod service;

pub use namespace::{MemorySession, Namespace};
pub use remote::RemoteSession;
pub use service::CoordService;

use crate::common::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::sync::mpsc;

/// Receiving end of a session's watch notifications
pub type WatchEvents = mpsc::UnboundedReceiver<WatchEvent>;

/// How a node is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    /// Outlives the creating session
    Persistent,
    /// Persistent, with a unique ordered suffix appended to the name
    PersistentSequential,
    /// Removed when the creating session ends
    Ephemeral,
    /// Ephemeral, with a unique ordered suffix appended to the name
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// One notification from an armed watch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum WatchEvent {
    /// A child was created under, or deleted from, the path
    ChildrenChanged(String),
    /// The node's payload was replaced
    DataChanged(String),
    /// The node itself was deleted
    Deleted(String),
}

impl WatchEvent {
    pub fn path(&self) -> &str {
        match self {
            WatchEvent::ChildrenChanged(path)
            | WatchEvent::DataChanged(path)
            | WatchEvent::Deleted(path) => path,
        }
    }
}

impl std::fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchEvent::ChildrenChanged(path) => write!(f, "children-changed {}", path),
            WatchEvent::DataChanged(path) => write!(f, "data-changed {}", path),
            WatchEvent::Deleted(path) => write!(f, "deleted {}", path),
        }
    }
}

/// Operations a coordination session offers.
///
/// `watch = true` arms a one-shot watch for the calling session. Reads that
/// fail with [`crate::Error::NotFound`] arm nothing.
pub trait Coordination: Send + Sync {
    /// Names (not paths) of the children of `path`, sorted
    fn list_children(
        &self,
        path: &str,
        watch: bool,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Payload stored at `path`
    fn get_data(&self, path: &str, watch: bool) -> impl Future<Output = Result<Bytes>> + Send;

    /// Create a node; returns the actual path (which differs for sequential modes)
    fn create_node(
        &self,
        path: &str,
        data: Bytes,
        mode: CreateMode,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Replace the payload at `path`
    fn set_data(&self, path: &str, data: Bytes) -> impl Future<Output = Result<()>> + Send;

    fn exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;
}
