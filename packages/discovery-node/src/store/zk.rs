//! ZooKeeper-backed [`RawStore`] (`zookeeper` feature).
//!
//! Thin adapter over `zookeeper-client`'s session and watch API onto the
//! [`RawStore`] contract. Owns no retry logic of its own -- translating
//! result codes honestly is the whole job, `StoreClient` does the rest
//! (spec.md §4.2).

use async_trait::async_trait;
use tokio::sync::Mutex;
use zookeeper_client as zk;

use super::raw::{CreateMode, RawStore, RawStoreError, StoreEvent};

fn map_error(path: &str, err: zk::Error) -> RawStoreError {
    match err {
        zk::Error::NoNode => RawStoreError::NoNode(path.to_string()),
        zk::Error::NodeExists => RawStoreError::NodeExists(path.to_string()),
        zk::Error::ConnectionLoss => RawStoreError::ConnectionLoss,
        zk::Error::SessionExpired => RawStoreError::SessionExpired,
        zk::Error::BadVersion(_) => RawStoreError::BadVersion {
            path: path.to_string(),
        },
        other => RawStoreError::Other(other.to_string()),
    }
}

fn to_zk_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::PersistentSequential => zk::CreateMode::PersistentSequential,
        CreateMode::EphemeralSequential => zk::CreateMode::EphemeralSequential,
    }
}

/// Forwards one client's watcher stream onto the shared [`StoreEvent`]
/// channel that [`RawStore::next_event`] drains (spec.md §5: one serial
/// event source per session).
struct SessionWatcher {
    tx: tokio::sync::mpsc::UnboundedSender<StoreEvent>,
}

impl zk::Watcher for SessionWatcher {
    fn handle(&mut self, event: zk::WatchedEvent) {
        let mapped = match event.event_type {
            zk::EventType::NodeDataChanged => Some(StoreEvent::NodeDataChanged(event.path)),
            zk::EventType::NodeDeleted => Some(StoreEvent::NodeDeleted(event.path)),
            zk::EventType::NodeChildrenChanged => Some(StoreEvent::NodeChildrenChanged(event.path)),
            zk::EventType::Session => match event.session_state {
                zk::SessionState::SyncConnected => Some(StoreEvent::SyncConnected),
                zk::SessionState::Disconnected => Some(StoreEvent::Disconnected),
                zk::SessionState::Expired => Some(StoreEvent::Expired),
                _ => None,
            },
            _ => None,
        };
        if let Some(event) = mapped {
            let _ = self.tx.send(event);
        }
    }
}

/// A coordination-store backend talking to a real ZooKeeper ensemble.
pub struct ZkRawStore {
    client: zk::Client,
    event_rx: Mutex<tokio::sync::mpsc::UnboundedReceiver<StoreEvent>>,
}

impl ZkRawStore {
    /// Connects to `connect_string` (comma-separated `host:port` list) and
    /// starts forwarding session/watch events onto [`RawStore::next_event`].
    ///
    /// # Errors
    ///
    /// Returns [`RawStoreError::Other`] if the initial handshake fails.
    pub async fn connect(connect_string: &str, session_timeout: std::time::Duration) -> Result<Self, RawStoreError> {
        let (tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let client = zk::Client::connector()
            .session_timeout(session_timeout)
            .connect(connect_string, SessionWatcher { tx })
            .await
            .map_err(|e| RawStoreError::Other(e.to_string()))?;
        Ok(Self {
            client,
            event_rx: Mutex::new(event_rx),
        })
    }
}

#[async_trait]
impl RawStore for ZkRawStore {
    async fn exists(&self, path: &str) -> Result<bool, RawStoreError> {
        match self.client.check_stat(path).await {
            Ok(stat) => Ok(stat.is_some()),
            Err(e) => Err(map_error(path, e)),
        }
    }

    async fn exists_watch(&self, path: &str) -> Result<bool, RawStoreError> {
        match self.client.check_and_watch_stat(path).await {
            Ok((stat, _watcher)) => Ok(stat.is_some()),
            Err(e) => Err(map_error(path, e)),
        }
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, RawStoreError> {
        self.client
            .list_children(path)
            .await
            .map_err(|e| map_error(path, e))
    }

    async fn children_watch(&self, path: &str) -> Result<Vec<String>, RawStoreError> {
        self.client
            .list_and_watch_children(path)
            .await
            .map(|(children, _watcher)| children)
            .map_err(|e| map_error(path, e))
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>, RawStoreError> {
        self.client
            .get_data(path)
            .await
            .map(|(data, _stat)| data)
            .map_err(|e| map_error(path, e))
    }

    async fn get_data_watch(&self, path: &str) -> Result<Vec<u8>, RawStoreError> {
        self.client
            .get_and_watch_data(path)
            .await
            .map(|(data, _stat, _watcher)| data)
            .map_err(|e| map_error(path, e))
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String, RawStoreError> {
        match self
            .client
            .create(path, &data, &zk::CreateOptions::new(to_zk_mode(mode), zk::Acls::anyone_all()))
            .await
        {
            Ok((_stat, created_path)) => Ok(created_path),
            Err(zk::Error::NodeExists) if mode == CreateMode::Persistent => Ok(path.to_string()),
            Err(e) => Err(map_error(path, e)),
        }
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<(), RawStoreError> {
        self.client
            .set_data(path, &data, None)
            .await
            .map(|_stat| ())
            .map_err(|e| map_error(path, e))
    }

    async fn delete(&self, path: &str) -> Result<(), RawStoreError> {
        self.client
            .delete(path, None)
            .await
            .map_err(|e| map_error(path, e))
    }

    async fn next_event(&self) -> StoreEvent {
        self.event_rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(StoreEvent::Expired)
    }

    /// `zookeeper-client` has no separate async shutdown call; a session
    /// ends when its last `Client` handle is dropped, which happens once
    /// the `Arc<dyn RawStore>` wrapping this instance is itself dropped
    /// (after `StoreClient::close` marks the session `Lost`).
    async fn close(&self) {}
}
