//! Every node's local discovery loop (spec.md §4.6 `Member`).
//!
//! Runs the join protocol, the predecessor-watch coordinator election, and
//! the `EventLog` replay discipline of spec.md §4.4 on a single task — the
//! event-dispatch thread of spec.md §5. External callers only ever talk to
//! the [`MemberHandle`] half, which touches `StoreClient` directly and never
//! the discovery state itself, exactly as §5 requires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use discovery_core::clock::ClockSource;
use discovery_core::collab::{Exchange, ExchangeBag, Listener};
use discovery_core::eventlog::{EventLog, EventRecord, LAST_PROCESSED_SENTINEL};
use discovery_core::model::{ClusterNode, DiscoveryEventType, JoinEventDataForJoined, JoiningNodeData};
use discovery_core::path::{AliveName, PathCatalog};

use crate::config::{DiscoveryConfig, JOIN_DIAGNOSTIC_INTERVAL_MS};
use crate::coordinator::Coordinator;
use crate::error::DiscoveryError;
use crate::store::client::{SessionState, StoreClient};
use crate::store::raw::{CreateMode, RawStore, StoreEvent};
use crate::topology::TopologyIndex;

/// Read-only diagnostics snapshot, grounded in the teacher's
/// `ClusterService::health()` shape.
#[derive(Debug, Clone)]
pub struct DiscoveryHealth {
    pub local_node: Option<ClusterNode>,
    pub topology_size: usize,
    pub is_coordinator: bool,
    pub session_state: SessionState,
}

/// Cheaply cloneable handle for external callers (spec.md §5: these only
/// invoke `StoreClient` operations, never the discovery state directly).
#[derive(Clone)]
pub struct MemberHandle {
    store: Arc<StoreClient>,
    catalog: PathCatalog,
    local_node_id: Uuid,
    loc_internal_id: u64,
}

impl MemberHandle {
    /// Posts a custom message as a persistent-sequential child under
    /// `customEvents/` (spec.md §6). Returns the final store path.
    pub async fn send_custom_message(&self, payload: Vec<u8>) -> Result<String, DiscoveryError> {
        let prefix = format!("{}/{}|", self.catalog.custom_evts_dir(), self.local_node_id);
        self.store
            .create(&prefix, payload, CreateMode::PersistentSequential)
            .await
    }

    /// Best-effort membership check against the current `alive/` children.
    pub async fn known_node(&self, node_id: Uuid) -> Result<bool, DiscoveryError> {
        let children = self.store.children(self.catalog.alive_nodes_dir()).await?;
        Ok(children
            .iter()
            .filter_map(|c| PathCatalog::decode_alive_name(c).ok())
            .any(|a| a.node_id == node_id))
    }

    /// Closes the underlying session; the dispatch task observes `Lost` and
    /// exits.
    pub async fn stop(&self) {
        self.store.close().await;
    }

    #[must_use]
    pub fn local_internal_id(&self) -> u64 {
        self.loc_internal_id
    }
}

/// The join-protocol and event-dispatch state for one node (spec.md §4.6).
/// Lives entirely on the task spawned by [`Member::join`]; never shared.
pub struct Member {
    catalog: PathCatalog,
    store: Arc<StoreClient>,
    exchange: Arc<dyn Exchange>,
    listener: Arc<dyn Listener>,
    clock: Arc<dyn ClockSource>,
    local_node_id: Uuid,
    local_attrs: Vec<u8>,
    loc_internal_id: u64,
    topology: TopologyIndex,
    log: EventLog,
    joined: bool,
    last_processed_event_id: i64,
    coordinator: Option<Coordinator>,
    join_tx: Option<oneshot::Sender<Result<(), DiscoveryError>>>,
}

impl Member {
    /// Runs the join protocol (spec.md §4.6 steps 1-6) and spawns the
    /// single dispatch task. Blocks the caller until the local `NodeJoined`
    /// event has been observed and bootstrapped, logging a diagnostic every
    /// [`JOIN_DIAGNOSTIC_INTERVAL_MS`] while it waits (spec.md §5).
    #[allow(clippy::too_many_arguments)]
    pub async fn join(
        config: &DiscoveryConfig,
        raw: Arc<dyn RawStore>,
        local_node_id: Uuid,
        attrs: Vec<u8>,
        joining_bag: Vec<u8>,
        exchange: Arc<dyn Exchange>,
        listener: Arc<dyn Listener>,
        clock: Arc<dyn ClockSource>,
    ) -> Result<MemberHandle, DiscoveryError> {
        let catalog = config.path_catalog()?;
        let store = Arc::new(StoreClient::new(
            raw,
            Duration::from_millis(config.session_timeout_ms),
        ));
        tokio::spawn(store.clone().run_dispatch_loop());

        Self::ensure_path_tree(&store, &catalog).await?;
        store.get_data_watch(catalog.evts_path()).await?;

        let joining_data = JoiningNodeData {
            node_id: local_node_id,
            attrs: attrs.clone(),
            joining_bag,
        };
        let joining_bytes = rmp_serde::to_vec_named(&joining_data)
            .map_err(|e| DiscoveryError::fatal(format!("failed to marshal join data: {e}")))?;
        let join_data_path = store
            .create(
                &format!(
                    "{}/{}",
                    catalog.join_data_dir(),
                    PathCatalog::join_data_prefix(local_node_id)
                ),
                joining_bytes,
                CreateMode::EphemeralSequential,
            )
            .await?;
        let join_seq = Self::trailing_sequence(&join_data_path)?;

        let alive_path = store
            .create(
                &format!(
                    "{}/{}",
                    catalog.alive_nodes_dir(),
                    PathCatalog::alive_prefix(local_node_id, join_seq)
                ),
                Vec::new(),
                CreateMode::EphemeralSequential,
            )
            .await?;
        let alive_name = alive_path
            .rsplit_once('/')
            .map_or(alive_path.clone(), |(_, name)| name.to_string());
        let decoded_self = PathCatalog::decode_alive_name(&alive_name)
            .map_err(|e| DiscoveryError::fatal(e.to_string()))?;
        let loc_internal_id = decoded_self.store_seq;

        let (join_tx, join_rx) = oneshot::channel();

        let member = Self {
            catalog: catalog.clone(),
            store: store.clone(),
            exchange,
            listener,
            clock,
            local_node_id,
            local_attrs: attrs,
            loc_internal_id,
            topology: TopologyIndex::new(),
            log: EventLog::new_lineage(0),
            joined: false,
            last_processed_event_id: LAST_PROCESSED_SENTINEL,
            coordinator: None,
            join_tx: Some(join_tx),
        };

        let handle = MemberHandle {
            store,
            catalog,
            local_node_id,
            loc_internal_id,
        };

        tokio::spawn(member.run());

        Self::await_join(join_rx, local_node_id).await?;
        Ok(handle)
    }

    /// Blocks on `join_rx`, logging a diagnostic every
    /// [`JOIN_DIAGNOSTIC_INTERVAL_MS`] so a slow join is visible rather than
    /// silent (spec.md §5).
    async fn await_join(
        mut join_rx: oneshot::Receiver<Result<(), DiscoveryError>>,
        local_node_id: Uuid,
    ) -> Result<(), DiscoveryError> {
        let mut diagnostics = tokio::time::interval(Duration::from_millis(JOIN_DIAGNOSTIC_INTERVAL_MS));
        diagnostics.tick().await; // first tick fires immediately, skip it
        loop {
            tokio::select! {
                result = &mut join_rx => {
                    return result.map_err(|_| DiscoveryError::fatal("dispatch task dropped before joining"))?;
                }
                _ = diagnostics.tick() => {
                    tracing::info!(node_id = %local_node_id, "still waiting to join topology");
                }
            }
        }
    }

    fn trailing_sequence(path: &str) -> Result<u64, DiscoveryError> {
        let name = path.rsplit_once('/').map_or(path, |(_, n)| n);
        let (_, seq) = PathCatalog::decode_sequential_name(name, discovery_core::path::PathError::MalformedJoinDataName)
            .map_err(|e| DiscoveryError::fatal(e.to_string()))?;
        Ok(seq)
    }

    /// Idempotent: treats the presence of `aliveNodesDir` as a sentinel for
    /// the whole tree (spec.md §4.6 step 2).
    async fn ensure_path_tree(store: &StoreClient, catalog: &PathCatalog) -> Result<(), DiscoveryError> {
        if store.exists(catalog.alive_nodes_dir()).await? {
            return Ok(());
        }
        for path in catalog.tree() {
            store.create(path, Vec::new(), CreateMode::Persistent).await?;
        }
        Ok(())
    }

    async fn run(mut self) {
        if let Err(e) = self.check_is_coordinator().await {
            self.fail_join(e).await;
            return;
        }
        loop {
            let event = self.store.next_watch_event().await;
            if let Err(e) = self.handle_watch_event(event).await {
                self.fail_join(e).await;
                return;
            }
        }
    }

    async fn fail_join(&mut self, err: DiscoveryError) {
        tracing::error!(error = %err, node_id = %self.local_node_id, "discovery dispatch failed");
        if let Some(tx) = self.join_tx.take() {
            let _ = tx.send(Err(err));
        }
    }

    async fn handle_watch_event(&mut self, event: StoreEvent) -> Result<(), DiscoveryError> {
        match event {
            StoreEvent::NodeDataChanged(path) if path == self.catalog.evts_path() => {
                if self.coordinator.is_none() {
                    let bytes = self.store.get_data_watch(self.catalog.evts_path()).await?;
                    let log: EventLog = rmp_serde::from_slice(&bytes)
                        .map_err(|e| DiscoveryError::fatal(format!("corrupt event log: {e}")))?;
                    self.on_events_update(log).await?;
                }
                Ok(())
            }
            StoreEvent::NodeChildrenChanged(path)
                if self.coordinator.is_some()
                    && (path == self.catalog.alive_nodes_dir() || path == self.catalog.custom_evts_dir()) =>
            {
                self.poll_coordinator_deltas().await
            }
            StoreEvent::NodeChildrenChanged(path)
                if self.coordinator.is_some() && path.starts_with(self.catalog.custom_evts_dir()) =>
            {
                self.coordinator
                    .as_mut()
                    .expect("guarded by is_some above")
                    .observe_acks(&path)
                    .await
            }
            StoreEvent::NodeDeleted(path) if path.starts_with(self.catalog.alive_nodes_dir()) => {
                self.check_is_coordinator().await
            }
            _ => Ok(()),
        }
    }

    /// Coordinator election (spec.md §4.6 `checkIsCoordinator`). Loops
    /// instead of recursing through `onPreviousNodeFail` so a chain of
    /// already-dead predecessors resolves in one pass.
    async fn check_is_coordinator(&mut self) -> Result<(), DiscoveryError> {
        loop {
            let children = self.store.children_watch(self.catalog.alive_nodes_dir()).await?;
            let mut parsed: Vec<AliveName> = children
                .iter()
                .filter_map(|c| PathCatalog::decode_alive_name(c).ok())
                .collect();
            parsed.sort_by_key(|a| a.store_seq);

            let Some(smallest) = parsed.first() else {
                return Err(DiscoveryError::fatal("alive set empty during election"));
            };
            let crd_internal_id = smallest.store_seq;

            if crd_internal_id == self.loc_internal_id {
                return self.become_coordinator().await;
            }

            let predecessor = parsed
                .iter()
                .filter(|a| a.store_seq < self.loc_internal_id)
                .max_by_key(|a| a.store_seq);

            let Some(pred) = predecessor else {
                // Smallest by construction if we are not the minimum; defensive only.
                return self.become_coordinator().await;
            };

            let pred_path = format!("{}/{pred}", self.catalog.alive_nodes_dir());
            if self.store.exists_watch(&pred_path).await? {
                return Ok(());
            }
            // Predecessor died between the listing and the watch; loop and
            // re-derive the chain from a fresh listing rather than assume
            // who is next (spec.md §4.6 `onPreviousNodeFail`).
        }
    }

    async fn become_coordinator(&mut self) -> Result<(), DiscoveryError> {
        if self.coordinator.is_some() {
            return Ok(());
        }
        tracing::info!(node_id = %self.local_node_id, internal_id = self.loc_internal_id, "became coordinator");
        let coordinator = Coordinator::new(
            self.catalog.clone(),
            self.store.clone(),
            self.exchange.clone(),
            self.clock.clone(),
        );
        let (log, is_new_lineage) = coordinator.on_become_coordinator().await?;
        self.coordinator = Some(coordinator);

        if is_new_lineage {
            self.bootstrap_genesis(log).await
        } else {
            self.log = log;
            self.poll_coordinator_deltas().await
        }
    }

    /// Cold-start path (spec.md §8 scenario 1 `newClusterStarted`): the
    /// first coordinator the cluster has ever had notifies itself directly
    /// with `top_ver = 1` rather than going through `generate_node_join`, so
    /// the persisted log stays `{topVer=1, evtIdGen=0, events={}}`.
    async fn bootstrap_genesis(&mut self, mut log: EventLog) -> Result<(), DiscoveryError> {
        log.top_ver = 1;
        self.coordinator
            .as_ref()
            .expect("bootstrap_genesis requires coordinator role")
            .persist(&log)
            .await?;
        self.log = log;

        let local_node = ClusterNode::new(
            self.local_node_id,
            true,
            self.local_attrs.clone(),
            self.loc_internal_id,
            self.log.top_ver,
        );
        self.topology.add_node(local_node.clone());
        self.joined = true;

        self.listener
            .on_discovery(discovery_core::collab::DiscoveryEvent {
                event_type: DiscoveryEventType::NodeJoined,
                top_ver: self.log.top_ver,
                event_node: local_node,
                top_snapshot: self.topology.snapshot(),
                historical_topologies: Vec::new(),
                custom_msg: None,
            })
            .await;

        if let Some(tx) = self.join_tx.take() {
            let _ = tx.send(Ok(()));
        }

        self.poll_coordinator_deltas().await
    }

    /// Re-arms the alive/custom-events watches and applies whatever delta
    /// they reveal (spec.md §4.5 `generateTopologyEvents`/
    /// `generateCustomEvents`), then replays locally.
    async fn poll_coordinator_deltas(&mut self) -> Result<(), DiscoveryError> {
        let alive_children = self.store.children_watch(self.catalog.alive_nodes_dir()).await?;
        let custom_children = self.store.children_watch(self.catalog.custom_evts_dir()).await?;

        let mut coordinator = self
            .coordinator
            .take()
            .expect("poll_coordinator_deltas requires coordinator role");
        let mut topology = std::mem::take(&mut self.topology);
        let mut log = self.log.clone();

        let topo_changed = coordinator
            .generate_topology_events(&alive_children, &mut topology, &mut log)
            .await?;
        let custom_changed = coordinator
            .generate_custom_events(&custom_children, &topology, &mut log)
            .await?;

        self.topology = topology;
        self.coordinator = Some(coordinator);

        if topo_changed || custom_changed {
            self.on_events_update(log).await?;
        } else {
            self.log = log;
        }
        Ok(())
    }

    /// Replay discipline (spec.md §4.4): events strictly after
    /// `last_processed_event_id`, skipping everything but the local join
    /// event until joined.
    async fn on_events_update(&mut self, log: EventLog) -> Result<(), DiscoveryError> {
        self.log = log;
        let pending: Vec<EventRecord> = self
            .log
            .events_after(self.last_processed_event_id)
            .cloned()
            .collect();

        for record in pending {
            let event_id = i64::try_from(record.event_id()).unwrap_or(i64::MAX);

            if !self.joined {
                if let EventRecord::NodeJoined { node_id, .. } = &record {
                    if *node_id == self.local_node_id {
                        self.bootstrap_local_join(&record).await?;
                        self.last_processed_event_id = event_id;
                        continue;
                    }
                }
                self.last_processed_event_id = event_id;
                continue;
            }

            self.apply_event(&record).await?;
            self.last_processed_event_id = event_id;
        }
        Ok(())
    }

    async fn bootstrap_local_join(&mut self, record: &EventRecord) -> Result<(), DiscoveryError> {
        let EventRecord::NodeJoined {
            event_id,
            top_ver,
            joined_internal_id,
            ..
        } = record
        else {
            return Err(DiscoveryError::fatal("bootstrap_local_join given non-join record"));
        };

        let joined_bytes = self
            .store
            .get_data(&self.catalog.event_joined_path(*event_id))
            .await?;
        let joined: JoinEventDataForJoined = rmp_serde::from_slice(&joined_bytes)
            .map_err(|e| DiscoveryError::fatal(format!("corrupt joined payload: {e}")))?;

        self.log.grid_start_time = joined.grid_start_time;
        self.loc_internal_id = *joined_internal_id;

        let exchange_bag = ExchangeBag {
            joining_node_data: None,
            common_data: Some(joined.common_bag),
        };
        self.exchange.on_exchange(&exchange_bag).await;

        for node in joined.topology_snapshot {
            self.topology.add_node(node);
        }
        let local_node = ClusterNode::new(
            self.local_node_id,
            true,
            self.local_attrs.clone(),
            *joined_internal_id,
            *top_ver,
        );
        self.topology.add_node(local_node.clone());
        self.joined = true;

        self.listener
            .on_discovery(discovery_core::collab::DiscoveryEvent {
                event_type: DiscoveryEventType::NodeJoined,
                top_ver: *top_ver,
                event_node: local_node,
                top_snapshot: self.topology.snapshot(),
                historical_topologies: Vec::new(),
                custom_msg: None,
            })
            .await;

        if let Some(tx) = self.join_tx.take() {
            let _ = tx.send(Ok(()));
        }
        Ok(())
    }

    async fn apply_event(&mut self, record: &EventRecord) -> Result<(), DiscoveryError> {
        let (event_type, event_node, custom_msg) = match record {
            EventRecord::NodeJoined {
                node_id,
                joined_internal_id,
                top_ver,
                joining_data,
                ..
            } => {
                let attrs = joining_data.as_ref().map_or_else(Vec::new, |d| d.attrs.clone());
                let node = ClusterNode::new(*node_id, *node_id == self.local_node_id, attrs, *joined_internal_id, *top_ver);
                self.topology.add_node(node.clone());
                (DiscoveryEventType::NodeJoined, node, None)
            }
            EventRecord::NodeFailed { failed_internal_id, .. } => {
                let node = self
                    .topology
                    .remove_node(*failed_internal_id)
                    .ok_or_else(|| DiscoveryError::fatal("fail event for unknown internal_id"))?;
                (DiscoveryEventType::NodeFailed, node, None)
            }
            EventRecord::CustomEvent {
                sender_node_id,
                custom_event_path,
                message,
                ..
            } => {
                let payload = match message {
                    Some(bytes) => bytes.clone(),
                    None => self.store.get_data(custom_event_path).await?,
                };
                let node = self
                    .topology
                    .by_id(*sender_node_id)
                    .cloned()
                    .unwrap_or_else(|| ClusterNode::new(*sender_node_id, false, Vec::new(), 0, self.log.top_ver));
                (DiscoveryEventType::CustomEvent, node, Some(payload))
            }
        };

        self.listener
            .on_discovery(discovery_core::collab::DiscoveryEvent {
                event_type,
                top_ver: record.top_ver(),
                event_node,
                top_snapshot: self.topology.snapshot(),
                historical_topologies: Vec::new(),
                custom_msg,
            })
            .await;

        if let EventRecord::CustomEvent { custom_event_path, .. } = record {
            let ack_path = PathCatalog::custom_event_ack_path(custom_event_path, self.loc_internal_id);
            self.store.create(&ack_path, Vec::new(), CreateMode::Persistent).await?;
        }
        Ok(())
    }

    /// Read-only diagnostics snapshot (spec.md §2 added, not part of the
    /// original core).
    pub async fn health(&self) -> DiscoveryHealth {
        DiscoveryHealth {
            local_node: self.topology.by_internal_id(self.loc_internal_id).cloned(),
            topology_size: self.topology.len(),
            is_coordinator: self.coordinator.is_some(),
            session_state: self.store.session_state().await,
        }
    }
}
