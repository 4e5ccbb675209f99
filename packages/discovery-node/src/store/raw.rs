//! Raw coordination-store backend contract.
//!
//! Separates the wire protocol to a concrete store (ZooKeeper ensemble, or
//! an in-memory double for tests) from [`crate::store::client::StoreClient`],
//! which owns the retry/session-FSM logic spec.md §4.2 describes. This is
//! the discovery-side analogue of `storage::engine::StorageEngine` /
//! `HashMapStorage` / the `redb`-feature engine split.

use async_trait::async_trait;
use thiserror::Error;

/// Node-creation mode, mirroring ZooKeeper's `CreateMode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    PersistentSequential,
    EphemeralSequential,
}

/// Store-side result codes that matter to the retry/session logic
/// (spec.md §4.2, §7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RawStoreError {
    #[error("no such path: {0}")]
    NoNode(String),
    #[error("path already exists: {0}")]
    NodeExists(String),
    #[error("connection loss")]
    ConnectionLoss,
    #[error("session expired")]
    SessionExpired,
    #[error("version mismatch at {path}")]
    BadVersion { path: String },
    #[error("store error: {0}")]
    Other(String),
}

impl RawStoreError {
    /// `CONNECTIONLOSS` is the only retryable code (spec.md §9 Open
    /// Questions: the narrow retry policy is intentional, not an oversight).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionLoss)
    }
}

/// A watch or session transition delivered on the store's single dispatch
/// channel (spec.md §5: all watches are delivered serially).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    SyncConnected,
    Disconnected,
    Expired,
    NodeDataChanged(String),
    NodeDeleted(String),
    NodeChildrenChanged(String),
}

/// A coordination-store backend. Implementors need not retry anything —
/// that is `StoreClient`'s job — they only need to report `ConnectionLoss`
/// and `SessionExpired` honestly and deliver watch events on
/// [`RawStore::next_event`].
#[async_trait]
pub trait RawStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, RawStoreError>;

    /// Like [`Self::exists`] but additionally arms a one-shot watch that
    /// fires [`StoreEvent::NodeDeleted`] or [`StoreEvent::NodeDataChanged`]
    /// the next time `path` changes.
    async fn exists_watch(&self, path: &str) -> Result<bool, RawStoreError>;

    async fn children(&self, path: &str) -> Result<Vec<String>, RawStoreError>;

    /// Like [`Self::children`] but arms a one-shot watch firing
    /// [`StoreEvent::NodeChildrenChanged`].
    async fn children_watch(&self, path: &str) -> Result<Vec<String>, RawStoreError>;

    /// Fails with [`RawStoreError::NoNode`] if `path` is absent.
    async fn get_data(&self, path: &str) -> Result<Vec<u8>, RawStoreError>;

    /// Like [`Self::get_data`] but arms a one-shot watch firing
    /// [`StoreEvent::NodeDataChanged`] or [`StoreEvent::NodeDeleted`].
    async fn get_data_watch(&self, path: &str) -> Result<Vec<u8>, RawStoreError>;

    /// Creates `path` with `data` under `mode`. Returns the final path
    /// (with the server-assigned sequence suffix for sequential modes).
    /// A `NodeExists` on a non-sequential create is not an error: the
    /// original `path` is returned (spec.md §4.2).
    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, RawStoreError>;

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<(), RawStoreError>;

    /// Fails with [`RawStoreError::NoNode`] if `path` is absent.
    async fn delete(&self, path: &str) -> Result<(), RawStoreError>;

    async fn delete_if_exists(&self, path: &str) -> Result<(), RawStoreError> {
        match self.delete(path).await {
            Ok(()) | Err(RawStoreError::NoNode(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes every `{parent}/{name}` in `names`, best-effort per child.
    async fn multi_delete(&self, parent: &str, names: &[String]) -> Result<(), RawStoreError> {
        for name in names {
            self.delete_if_exists(&format!("{parent}/{name}")).await?;
        }
        Ok(())
    }

    /// Blocks until the next session or watch event. Backends serialize
    /// delivery internally so the caller can treat this as its single
    /// event-dispatch source (spec.md §5).
    async fn next_event(&self) -> StoreEvent;

    /// Shuts the underlying session. Idempotent.
    async fn close(&self);
}
