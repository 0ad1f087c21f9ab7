//! Client-side membership view
//!
//! A thread-safe `node path → location` map owned by the membership tracker
//! and read by the dispatcher. Callers never lock it as a whole: inserts and
//! removals touch one shard, and [`RegistryView::snapshot`] copies entries
//! shard by shard, so a dispatcher pass never blocks membership updates.
//!
//! The view is eventually consistent with the registry. It may briefly hold
//! a node whose deletion notification is still in flight, and may briefly
//! miss a node created since the last children-changed refresh.

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RegistryView {
    entries: Arc<DashMap<String, String>>,
}

impl RegistryView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns the previous location
    pub fn insert(&self, path: impl Into<String>, location: impl Into<String>) -> Option<String> {
        self.entries.insert(path.into(), location.into())
    }

    pub fn remove(&self, path: &str) -> Option<String> {
        self.entries.remove(path).map(|(_, location)| location)
    }

    pub fn get(&self, path: &str) -> Option<String> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the entries `keep` accepts; returns the evicted paths
    pub fn retain(&self, mut keep: impl FnMut(&str, &str) -> bool) -> Vec<String> {
        let mut evicted = Vec::new();
        self.entries.retain(|path, location| {
            let kept = keep(path, location);
            if !kept {
                evicted.push(path.clone());
            }
            kept
        });
        evicted
    }

    /// Point-in-time copy, ordered by path
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut entries: Vec<(String, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort();
        entries
    }
}
