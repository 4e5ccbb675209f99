//! Resilient coordination-store client (spec.md §4.2 `StoreClient`).
//!
//! Turns a [`RawStore`]'s raw session/watch primitives into operations with
//! a bounded connection-loss window and automatic retry. One mutex guards
//! session state; a single background task (`run_dispatch_loop`) is both
//! the session-event consumer and, per spec.md §9's elided-timer note, the
//! connection-loss deadline watchdog — no separate timer task.

use std::sync::Arc;
use std::time::Duration;

use discovery_core::collab::ConnectionLostCallback;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;

use super::raw::{CreateMode, RawStore, RawStoreError, StoreEvent};
use crate::config::RETRY_TIMEOUT_MS;
use crate::error::DiscoveryError;

/// Session lifecycle (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Lost,
}

struct ClientState {
    session: SessionState,
    conn_start_time: Option<Instant>,
}

pub struct StoreClient {
    raw: Arc<dyn RawStore>,
    conn_loss_timeout: Duration,
    state: Mutex<ClientState>,
    notify: Notify,
    lost_callback: Mutex<Option<Arc<dyn ConnectionLostCallback>>>,
    watch_tx: mpsc::UnboundedSender<StoreEvent>,
    watch_rx: Mutex<mpsc::UnboundedReceiver<StoreEvent>>,
}

impl StoreClient {
    #[must_use]
    pub fn new(raw: Arc<dyn RawStore>, conn_loss_timeout: Duration) -> Self {
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        Self {
            raw,
            conn_loss_timeout,
            state: Mutex::new(ClientState {
                session: SessionState::Disconnected,
                conn_start_time: None,
            }),
            notify: Notify::new(),
            lost_callback: Mutex::new(None),
            watch_tx,
            watch_rx: Mutex::new(watch_rx),
        }
    }

    /// Registers the callback invoked exactly once on terminal session
    /// failure (spec.md §6).
    pub async fn set_connection_lost_callback(&self, cb: Arc<dyn ConnectionLostCallback>) {
        *self.lost_callback.lock().await = Some(cb);
    }

    #[must_use]
    pub async fn session_state(&self) -> SessionState {
        self.state.lock().await.session
    }

    /// The single event-dispatch loop (spec.md §5). Spawn this once per
    /// client; it both drives the session FSM and forwards watch events to
    /// [`Self::next_watch_event`].
    pub async fn run_dispatch_loop(self: Arc<Self>) {
        loop {
            let deadline = {
                let state = self.state.lock().await;
                match (state.session, state.conn_start_time) {
                    (SessionState::Disconnected, Some(start)) => {
                        Some(start + self.conn_loss_timeout)
                    }
                    _ => None,
                }
            };

            let event = if let Some(deadline) = deadline {
                match tokio::time::timeout_at(deadline, self.raw.next_event()).await {
                    Ok(event) => event,
                    Err(_) => {
                        self.finish_lost_transition("connection loss timeout elapsed")
                            .await;
                        continue;
                    }
                }
            } else {
                self.raw.next_event().await
            };

            match event {
                StoreEvent::SyncConnected => self.on_sync_connected().await,
                StoreEvent::Disconnected => self.on_disconnected_event().await,
                StoreEvent::Expired => {
                    self.finish_lost_transition("session expired").await;
                }
                other => {
                    let _ = self.watch_tx.send(other);
                }
            }
        }
    }

    /// The next watch event (`NodeDataChanged`/`NodeDeleted`/
    /// `NodeChildrenChanged`) delivered after session events are filtered
    /// out by [`Self::run_dispatch_loop`].
    pub async fn next_watch_event(&self) -> StoreEvent {
        self.watch_rx
            .lock()
            .await
            .recv()
            .await
            .unwrap_or(StoreEvent::Expired)
    }

    async fn on_sync_connected(&self) {
        let mut state = self.state.lock().await;
        state.session = SessionState::Connected;
        state.conn_start_time = None;
        drop(state);
        self.notify.notify_waiters();
    }

    async fn on_disconnected_event(&self) {
        let mut state = self.state.lock().await;
        if state.session == SessionState::Connected {
            state.session = SessionState::Disconnected;
            state.conn_start_time = Some(Instant::now());
        }
    }

    async fn finish_lost_transition(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if state.session == SessionState::Lost {
            return;
        }
        state.session = SessionState::Lost;
        drop(state);
        self.raw.close().await;
        self.notify.notify_waiters();
        if let Some(cb) = self.lost_callback.lock().await.take() {
            cb.on_connection_lost();
        }
        tracing::warn!(reason, "store session lost");
    }

    /// Runs the spec.md §4.2 retry discipline around a fallible raw-store
    /// call: retryable errors wait out `connLossTimeout` (sleeping in
    /// `RETRY_TIMEOUT_MS` slices on the session condition), `NoNode` is
    /// surfaced unchanged, everything else is terminal.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, DiscoveryError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, RawStoreError>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(RawStoreError::NoNode(path)) => return Err(DiscoveryError::not_found(path)),
                Err(e) if e.is_retryable() => {
                    self.wait_out_disconnect().await?;
                }
                Err(e) => {
                    self.finish_lost_transition(&e.to_string()).await;
                    return Err(DiscoveryError::client_failed(e.to_string()));
                }
            }
        }
    }

    async fn wait_out_disconnect(&self) -> Result<(), DiscoveryError> {
        let wait = {
            let mut state = self.state.lock().await;
            match state.session {
                SessionState::Connected => {
                    state.session = SessionState::Disconnected;
                    state.conn_start_time = Some(Instant::now());
                    Some(Duration::from_millis(RETRY_TIMEOUT_MS).min(self.conn_loss_timeout))
                }
                SessionState::Disconnected => {
                    let start = *state.conn_start_time.get_or_insert_with(Instant::now);
                    let elapsed = start.elapsed();
                    if elapsed >= self.conn_loss_timeout {
                        None
                    } else {
                        let remaining = self.conn_loss_timeout - elapsed;
                        Some(remaining.min(Duration::from_millis(RETRY_TIMEOUT_MS)))
                    }
                }
                SessionState::Lost => None,
            }
        };

        match wait {
            Some(duration) => {
                let _ = tokio::time::timeout(duration, self.notify.notified()).await;
                Ok(())
            }
            None => {
                self.finish_lost_transition("connection loss exceeded session timeout")
                    .await;
                Err(DiscoveryError::client_failed(
                    "connection loss exceeded session timeout",
                ))
            }
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool, DiscoveryError> {
        self.with_retry(|| self.raw.exists(path)).await
    }

    pub async fn exists_watch(&self, path: &str) -> Result<bool, DiscoveryError> {
        self.with_retry(|| self.raw.exists_watch(path)).await
    }

    pub async fn children(&self, path: &str) -> Result<Vec<String>, DiscoveryError> {
        self.with_retry(|| self.raw.children(path)).await
    }

    pub async fn children_watch(&self, path: &str) -> Result<Vec<String>, DiscoveryError> {
        self.with_retry(|| self.raw.children_watch(path)).await
    }

    pub async fn get_data(&self, path: &str) -> Result<Vec<u8>, DiscoveryError> {
        self.with_retry(|| self.raw.get_data(path)).await
    }

    pub async fn get_data_watch(&self, path: &str) -> Result<Vec<u8>, DiscoveryError> {
        self.with_retry(|| self.raw.get_data_watch(path)).await
    }

    /// No-op on `NodeExists`, returning `path` unchanged (spec.md §4.2).
    pub async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, DiscoveryError> {
        self.with_retry(|| self.raw.create(path, data.clone(), mode))
            .await
    }

    pub async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<(), DiscoveryError> {
        self.with_retry(|| self.raw.set_data(path, data.clone()))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<(), DiscoveryError> {
        self.with_retry(|| self.raw.delete(path)).await
    }

    pub async fn delete_if_exists(&self, path: &str) -> Result<(), DiscoveryError> {
        self.with_retry(|| self.raw.delete_if_exists(path)).await
    }

    pub async fn multi_delete(&self, parent: &str, names: &[String]) -> Result<(), DiscoveryError> {
        self.with_retry(|| self.raw.multi_delete(parent, names)).await
    }

    pub async fn close(&self) {
        self.finish_lost_transition("closed by caller").await;
    }
}
