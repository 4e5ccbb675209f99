//! In-memory [`RawStore`] for tests and single-process demos.
//!
//! Grounded in `storage::engines::hashmap::HashMapStorage`: a `DashMap`
//! keyed by full path, with no external locking needed for readers. Always
//! reports itself connected; [`MemRawStore::expire_session`] is the only way
//! to exercise the `Lost` transition in tests.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, Mutex};

use super::raw::{CreateMode, RawStore, RawStoreError, StoreEvent};

struct MemEntry {
    data: Vec<u8>,
    ephemeral: bool,
}

fn parent_dir(path: &str) -> String {
    path.rsplit_once('/').map_or_else(String::new, |(p, _)| p.to_string())
}

/// In-memory coordination store. One instance models one store ensemble
/// shared by every [`crate::store::client::StoreClient`] in a test.
pub struct MemRawStore {
    entries: DashMap<String, MemEntry>,
    seq_counters: DashMap<String, AtomicU64>,
    exists_watches: DashSet<String>,
    data_watches: DashSet<String>,
    children_watches: DashSet<String>,
    event_tx: mpsc::UnboundedSender<StoreEvent>,
    event_rx: Mutex<mpsc::UnboundedReceiver<StoreEvent>>,
}

impl MemRawStore {
    #[must_use]
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // A real ensemble client reports SyncConnected once the handshake
        // completes; the in-memory double has no handshake, so it reports
        // itself connected immediately.
        let _ = event_tx.send(StoreEvent::SyncConnected);
        Self {
            entries: DashMap::new(),
            seq_counters: DashMap::new(),
            exists_watches: DashSet::new(),
            data_watches: DashSet::new(),
            children_watches: DashSet::new(),
            event_tx,
            event_rx: Mutex::new(event_rx),
        }
    }

    fn next_seq(&self, parent: &str) -> u64 {
        self.seq_counters
            .entry(parent.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
    }

    fn fire_children_changed(&self, child_path: &str) {
        let parent = parent_dir(child_path);
        if self.children_watches.remove(&parent).is_some() {
            let _ = self.event_tx.send(StoreEvent::NodeChildrenChanged(parent));
        }
    }

    fn fire_deleted(&self, path: &str) {
        let mut fired = false;
        if self.data_watches.remove(path).is_some() {
            fired = true;
        }
        if self.exists_watches.remove(path).is_some() {
            fired = true;
        }
        if fired {
            let _ = self.event_tx.send(StoreEvent::NodeDeleted(path.to_string()));
        }
        self.fire_children_changed(path);
    }

    /// Test-only: simulates session expiry. Drops every ephemeral entry,
    /// fires the associated watches, and emits [`StoreEvent::Expired`].
    pub fn expire_session(&self) {
        let ephemeral_paths: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().ephemeral)
            .map(|e| e.key().clone())
            .collect();
        for path in ephemeral_paths {
            self.entries.remove(&path);
            self.fire_deleted(&path);
        }
        let _ = self.event_tx.send(StoreEvent::Expired);
    }
}

impl Default for MemRawStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RawStore for MemRawStore {
    async fn exists(&self, path: &str) -> Result<bool, RawStoreError> {
        Ok(self.entries.contains_key(path))
    }

    async fn exists_watch(&self, path: &str) -> Result<bool, RawStoreError> {
        self.exists_watches.insert(path.to_string());
        self.exists(path).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, RawStoreError> {
        let prefix = format!("{path}/");
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter_map(|e| {
                let key = e.key();
                key.strip_prefix(&prefix).and_then(|rest| {
                    if rest.is_empty() || rest.contains('/') {
                        None
                    } else {
                        Some(rest.to_string())
                    }
                })
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn children_watch(&self, path: &str) -> Result<Vec<String>, RawStoreError> {
        self.children_watches.insert(path.to_string());
        self.children(path).await
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>, RawStoreError> {
        self.entries
            .get(path)
            .map(|e| e.data.clone())
            .ok_or_else(|| RawStoreError::NoNode(path.to_string()))
    }

    async fn get_data_watch(&self, path: &str) -> Result<Vec<u8>, RawStoreError> {
        self.data_watches.insert(path.to_string());
        self.get_data(path).await
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, RawStoreError> {
        match mode {
            CreateMode::Persistent => {
                if self.entries.contains_key(path) {
                    return Ok(path.to_string());
                }
                self.entries.insert(
                    path.to_string(),
                    MemEntry {
                        data,
                        ephemeral: false,
                    },
                );
                self.fire_children_changed(path);
                Ok(path.to_string())
            }
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential => {
                let parent = parent_dir(path);
                let seq = self.next_seq(&parent);
                let final_path = format!("{path}{seq:010}");
                self.entries.insert(
                    final_path.clone(),
                    MemEntry {
                        data,
                        ephemeral: matches!(mode, CreateMode::EphemeralSequential),
                    },
                );
                self.fire_children_changed(&final_path);
                Ok(final_path)
            }
        }
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<(), RawStoreError> {
        let mut entry = self
            .entries
            .get_mut(path)
            .ok_or_else(|| RawStoreError::NoNode(path.to_string()))?;
        entry.data = data;
        drop(entry);
        if self.data_watches.remove(path).is_some() {
            let _ = self
                .event_tx
                .send(StoreEvent::NodeDataChanged(path.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RawStoreError> {
        self.entries
            .remove(path)
            .ok_or_else(|| RawStoreError::NoNode(path.to_string()))?;
        self.fire_deleted(path);
        Ok(())
    }

    async fn next_event(&self) -> StoreEvent {
        self.event_rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(StoreEvent::Expired)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_persistent_is_idempotent() {
        let store = MemRawStore::new();
        let p1 = store.create("/a", vec![1], CreateMode::Persistent).await.unwrap();
        let p2 = store.create("/a", vec![2], CreateMode::Persistent).await.unwrap();
        assert_eq!(p1, p2);
        assert_eq!(store.get_data("/a").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn sequential_create_appends_zero_padded_sequence() {
        let store = MemRawStore::new();
        let p0 = store
            .create("/alive/node-a|", vec![], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let p1 = store
            .create("/alive/node-b|", vec![], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(p0, "/alive/node-a|0000000000");
        assert_eq!(p1, "/alive/node-b|0000000001");
    }

    #[tokio::test]
    async fn get_data_missing_is_no_node() {
        let store = MemRawStore::new();
        assert_eq!(
            store.get_data("/missing").await.unwrap_err(),
            RawStoreError::NoNode("/missing".to_string())
        );
    }

    #[tokio::test]
    async fn children_lists_direct_descendants_only() {
        let store = MemRawStore::new();
        store.create("/a/x", vec![], CreateMode::Persistent).await.unwrap();
        store.create("/a/y", vec![], CreateMode::Persistent).await.unwrap();
        store
            .create("/a/y/z", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        let mut children = store.children("/a").await.unwrap();
        children.sort();
        assert_eq!(children, vec!["x", "y"]);
    }

    async fn drain_initial_sync_connected(store: &MemRawStore) {
        assert_eq!(store.next_event().await, StoreEvent::SyncConnected);
    }

    #[tokio::test]
    async fn data_watch_fires_on_set_data() {
        let store = MemRawStore::new();
        drain_initial_sync_connected(&store).await;
        store.create("/a", vec![1], CreateMode::Persistent).await.unwrap();
        store.get_data_watch("/a").await.unwrap();
        store.set_data("/a", vec![2]).await.unwrap();
        assert_eq!(store.next_event().await, StoreEvent::NodeDataChanged("/a".to_string()));
    }

    #[tokio::test]
    async fn exists_watch_fires_on_delete() {
        let store = MemRawStore::new();
        drain_initial_sync_connected(&store).await;
        store.create("/a", vec![], CreateMode::Persistent).await.unwrap();
        store.exists_watch("/a").await.unwrap();
        store.delete("/a").await.unwrap();
        assert_eq!(store.next_event().await, StoreEvent::NodeDeleted("/a".to_string()));
    }

    #[tokio::test]
    async fn children_watch_fires_on_new_child() {
        let store = MemRawStore::new();
        drain_initial_sync_connected(&store).await;
        store.create("/alive", vec![], CreateMode::Persistent).await.unwrap();
        store.children_watch("/alive").await.unwrap();
        store
            .create("/alive/a|", vec![], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(
            store.next_event().await,
            StoreEvent::NodeChildrenChanged("/alive".to_string())
        );
    }

    #[tokio::test]
    async fn expire_session_drops_ephemeral_entries_only() {
        let store = MemRawStore::new();
        drain_initial_sync_connected(&store).await;
        store.create("/persist", vec![], CreateMode::Persistent).await.unwrap();
        let ephemeral = store
            .create("/alive/a|", vec![], CreateMode::EphemeralSequential)
            .await
            .unwrap();
        store.expire_session();
        assert!(store.exists(&ephemeral).await.unwrap() == false);
        assert!(store.exists("/persist").await.unwrap());
        assert_eq!(store.next_event().await, StoreEvent::Expired);
    }
}
