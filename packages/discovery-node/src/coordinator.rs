//! The coordinator role (spec.md §4.5 `Coordinator`).
//!
//! Owned by whichever [`crate::member::Member`] currently has the smallest
//! alive `internal_id`. Watches `alive/` and `customEvents/`, mutates the
//! working [`EventLog`]/[`TopologyIndex`] (owned by the caller, not by this
//! struct -- both live on the single dispatch task per spec.md §5), and
//! persists the updated log.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use discovery_core::clock::ClockSource;
use discovery_core::collab::{Exchange, ExchangeBag};
use discovery_core::eventlog::EventLog;
use discovery_core::model::{ClusterNode, JoinEventDataForJoined, JoiningNodeData};
use discovery_core::path::PathCatalog;

use crate::ack_tracker::CustomMessageAckTracker;
use crate::error::DiscoveryError;
use crate::store::client::StoreClient;
use crate::store::raw::CreateMode;
use crate::topology::TopologyIndex;

fn exceeds(seq: u64, proc_cust_evt: Option<u64>) -> bool {
    proc_cust_evt.is_none_or(|p| seq > p)
}

/// The coordinator half of a node's discovery role. A node holds one of
/// these only while it is the coordinator; demotion simply drops it.
pub struct Coordinator {
    catalog: PathCatalog,
    store: Arc<StoreClient>,
    exchange: Arc<dyn Exchange>,
    clock: Arc<dyn ClockSource>,
    ack_trackers: HashMap<u64, CustomMessageAckTracker>,
    member_last_acked: HashMap<u64, u64>,
    ack_paths: HashMap<String, u64>,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        catalog: PathCatalog,
        store: Arc<StoreClient>,
        exchange: Arc<dyn Exchange>,
        clock: Arc<dyn ClockSource>,
    ) -> Self {
        Self {
            catalog,
            store,
            exchange,
            clock,
            ack_trackers: HashMap::new(),
            member_last_acked: HashMap::new(),
            ack_paths: HashMap::new(),
        }
    }

    /// Reads the persisted log, or reports a fresh lineage if this is the
    /// first coordinator the cluster has ever had (spec.md §4.5
    /// `newClusterStarted` path: `evtsPath` exists as an empty persistent
    /// node from `ensurePathTree` but has never been written). The `bool`
    /// is `true` only in that genesis case; the caller is responsible for
    /// persisting the lineage once it has set up the genesis `top_ver`
    /// (spec.md §8 scenario 1: genesis carries no `NodeJoined` record).
    pub async fn on_become_coordinator(&self) -> Result<(EventLog, bool), DiscoveryError> {
        let bytes = self.store.get_data(self.catalog.evts_path()).await?;
        if bytes.is_empty() {
            Ok((EventLog::new_lineage(self.clock.now_millis()), true))
        } else {
            let log = rmp_serde::from_slice(&bytes)
                .map_err(|e| DiscoveryError::fatal(format!("corrupt event log: {e}")))?;
            Ok((log, false))
        }
    }

    pub(crate) async fn persist(&self, log: &EventLog) -> Result<(), DiscoveryError> {
        let bytes = rmp_serde::to_vec_named(log)
            .map_err(|e| DiscoveryError::fatal(format!("failed to marshal event log: {e}")))?;
        self.store.set_data(self.catalog.evts_path(), bytes).await
    }

    /// Applies the alive-children delta: generates joins then fails,
    /// mutating `topology` and `log` in place. Returns `true` (and persists
    /// `log`) iff at least one event was generated.
    pub async fn generate_topology_events(
        &mut self,
        alive_children: &[String],
        topology: &mut TopologyIndex,
        log: &mut EventLog,
    ) -> Result<bool, DiscoveryError> {
        let mut alives: BTreeMap<u64, String> = BTreeMap::new();
        for name in alive_children {
            if let Ok(decoded) = PathCatalog::decode_alive_name(name) {
                alives.insert(decoded.store_seq, name.clone());
            }
        }

        let current: HashSet<u64> = topology.internal_ids();
        let mut changed = false;

        for (&internal_id, child_name) in &alives {
            if !current.contains(&internal_id)
                && self
                    .generate_node_join(internal_id, child_name, topology, log)
                    .await?
            {
                changed = true;
            }
        }

        for internal_id in current {
            if !alives.contains_key(&internal_id) {
                self.generate_node_fail(internal_id, topology, log);
                changed = true;
            }
        }

        if changed {
            self.persist(log).await?;
        }
        Ok(changed)
    }

    /// Returns `Ok(true)` if a join event was generated, `Ok(false)` if the
    /// joiner left before its data could be read (spec.md §4.5 step 2).
    async fn generate_node_join(
        &self,
        internal_id: u64,
        child_name: &str,
        topology: &mut TopologyIndex,
        log: &mut EventLog,
    ) -> Result<bool, DiscoveryError> {
        let decoded = PathCatalog::decode_alive_name(child_name)
            .map_err(|e| DiscoveryError::fatal(e.to_string()))?;
        let join_data_path = self.catalog.join_data_path(&decoded);

        let raw_bytes = match self.store.get_data(&join_data_path).await {
            Ok(bytes) => bytes,
            Err(DiscoveryError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e),
        };

        let joining_data: JoiningNodeData = match rmp_serde::from_slice(&raw_bytes) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(internal_id, error = %e, "rejecting joiner: malformed join data");
                return Ok(false);
            }
        };

        let mut collect_bag = ExchangeBag {
            joining_node_data: Some(joining_data.joining_bag.clone()),
            common_data: None,
        };
        self.exchange.on_exchange(&collect_bag).await;
        self.exchange.collect(&mut collect_bag).await;
        let common_bag = collect_bag.common_data.unwrap_or_default();

        let snapshot_before_join = topology.snapshot();
        let next_order = log.top_ver + 1;

        let event_id = log
            .append_join(joining_data.node_id, internal_id, Some(joining_data.clone()))
            .event_id();

        topology.add_node(ClusterNode::new(
            joining_data.node_id,
            false,
            joining_data.attrs.clone(),
            internal_id,
            next_order,
        ));

        let joined_data = JoinEventDataForJoined {
            grid_start_time: log.grid_start_time,
            topology_snapshot: snapshot_before_join,
            common_bag,
        };
        let joined_bytes = rmp_serde::to_vec_named(&joined_data)
            .map_err(|e| DiscoveryError::fatal(format!("failed to marshal joined data: {e}")))?;

        self.store
            .create(&self.catalog.event_dir(event_id), raw_bytes, CreateMode::Persistent)
            .await?;
        self.store
            .create(
                &self.catalog.event_joined_path(event_id),
                joined_bytes,
                CreateMode::Persistent,
            )
            .await?;

        Ok(true)
    }

    fn generate_node_fail(
        &mut self,
        internal_id: u64,
        topology: &mut TopologyIndex,
        log: &mut EventLog,
    ) {
        topology.remove_node(internal_id);
        log.append_fail(internal_id);
        for tracker in self.ack_trackers.values_mut() {
            tracker.on_node_fail(internal_id);
        }
    }

    /// Applies the custom-events-children delta: appends one `CustomEvent`
    /// per unseen child in ascending sequence order (spec.md §4.5
    /// `generateCustomEvents`).
    pub async fn generate_custom_events(
        &mut self,
        custom_children: &[String],
        topology: &TopologyIndex,
        log: &mut EventLog,
    ) -> Result<bool, DiscoveryError> {
        let mut pending: BTreeMap<u64, (uuid::Uuid, String)> = BTreeMap::new();
        for name in custom_children {
            if let Ok((sender, seq)) = PathCatalog::decode_sequential_name(
                name,
                discovery_core::path::PathError::MalformedCustomEventName,
            ) {
                if exceeds(seq, log.proc_cust_evt) {
                    pending.insert(seq, (sender, name.clone()));
                }
            }
        }

        if pending.is_empty() {
            return Ok(false);
        }

        let mut max_seen = log.proc_cust_evt.unwrap_or(0);
        for (seq, (sender_node_id, child_name)) in pending {
            max_seen = max_seen.max(seq);
            let full_path = format!("{}/{child_name}", self.catalog.custom_evts_dir());

            if topology.by_id(sender_node_id).is_none() {
                self.store.delete_if_exists(&full_path).await?;
                continue;
            }

            let payload = self.store.get_data(&full_path).await?;
            let event_id = log
                .append_custom(sender_node_id, full_path.clone(), Some(payload))
                .event_id();

            let tracker = CustomMessageAckTracker::new(topology.internal_ids()).0;
            self.ack_trackers.insert(event_id, tracker);
            self.ack_paths.insert(full_path.clone(), event_id);
            // Arm a watch now so member.rs is woken as acks are posted; any
            // already-present children are swept up on the first event.
            self.store.children_watch(&full_path).await?;
        }
        log.proc_cust_evt = Some(max_seen);
        self.persist(log).await?;
        Ok(true)
    }

    /// Re-reads `custom_event_path`'s children and feeds any newly observed
    /// acks into its tracker (spec.md §4.7). No-op if `custom_event_path`
    /// isn't a currently tracked custom event (it may have just finished).
    pub async fn observe_acks(&mut self, custom_event_path: &str) -> Result<(), DiscoveryError> {
        let Some(&event_id) = self.ack_paths.get(custom_event_path) else {
            return Ok(());
        };
        let children = self.store.children_watch(custom_event_path).await?;
        let observed: HashSet<u64> = children.iter().filter_map(|c| c.parse().ok()).collect();
        self.record_acks(event_id, &observed);
        if !self.ack_trackers.contains_key(&event_id) {
            self.ack_paths.remove(custom_event_path);
        }
        Ok(())
    }

    /// Feeds freshly observed ack children for `event_id` into its tracker,
    /// updating the low-water-mark bookkeeping [`Self::compact`] uses.
    pub fn record_acks(&mut self, event_id: u64, observed: &HashSet<u64>) {
        for &internal_id in observed {
            self.member_last_acked
                .entry(internal_id)
                .and_modify(|v| *v = (*v).max(event_id))
                .or_insert(event_id);
        }
        if let Some(tracker) = self.ack_trackers.get_mut(&event_id) {
            tracker.on_acks_observed(observed);
            if tracker.is_done() {
                self.ack_trackers.remove(&event_id);
            }
        }
    }

    /// Lowest event id every current member is known to have acked.
    /// Members never observed are treated as acked-nothing, which keeps
    /// `compact` conservative rather than pruning prematurely.
    #[must_use]
    pub fn low_water_mark(&self, topology: &TopologyIndex) -> u64 {
        topology
            .internal_ids()
            .iter()
            .map(|id| self.member_last_acked.get(id).copied().unwrap_or(0))
            .min()
            .unwrap_or(0)
    }

    /// Explicit, caller-invoked garbage collection pass (spec.md §9 Open
    /// Questions invites this; not run automatically by any operation
    /// above).
    pub async fn compact(&self, topology: &TopologyIndex, log: &mut EventLog) -> Result<(), DiscoveryError> {
        let mark = self.low_water_mark(topology);
        log.gc_events(mark);
        self.persist(log).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemRawStore;
    use crate::store::raw::RawStore;
    use async_trait::async_trait;
    use discovery_core::clock::SystemClock;
    use discovery_core::path::PathCatalog;
    use std::time::Duration;
    use uuid::Uuid;

    struct EchoExchange;

    #[async_trait]
    impl Exchange for EchoExchange {
        async fn collect(&self, bag: &mut ExchangeBag) {
            bag.common_data = Some(vec![0xC0, 0x7E]);
        }
        async fn on_exchange(&self, _bag: &ExchangeBag) {}
    }

    async fn setup() -> (Coordinator, Arc<StoreClient>, PathCatalog) {
        let catalog = PathCatalog::new("/discovery", "prod").unwrap();
        let raw = Arc::new(MemRawStore::new());
        for path in catalog.tree() {
            raw.create(path, vec![], CreateMode::Persistent).await.unwrap();
        }
        let store = Arc::new(StoreClient::new(raw, Duration::from_secs(15)));
        tokio::spawn(store.clone().run_dispatch_loop());
        let coord = Coordinator::new(
            catalog.clone(),
            store.clone(),
            Arc::new(EchoExchange),
            Arc::new(SystemClock),
        );
        (coord, store, catalog)
    }

    #[tokio::test]
    async fn on_become_coordinator_starts_fresh_lineage_when_empty() {
        let (coord, _store, _catalog) = setup().await;
        let (log, is_new_lineage) = coord.on_become_coordinator().await.unwrap();
        assert_eq!(log.top_ver, 0);
        assert!(log.events.is_empty());
        assert!(is_new_lineage);
    }

    #[tokio::test]
    async fn generate_node_join_assigns_order_and_persists_joined_payload() {
        let (mut coord, store, catalog) = setup().await;
        let (mut log, _) = coord.on_become_coordinator().await.unwrap();
        let mut topology = TopologyIndex::new();

        let node_id = Uuid::new_v4();
        let joining = JoiningNodeData {
            node_id,
            attrs: vec![1],
            joining_bag: vec![2],
        };
        let join_data_path = format!("{}/{}|0000000000", catalog.join_data_dir(), node_id);
        store
            .create(
                &join_data_path,
                rmp_serde::to_vec_named(&joining).unwrap(),
                CreateMode::Persistent,
            )
            .await
            .unwrap();

        let alive_name = format!("{node_id}|0000000000|0000000000");
        let changed = coord
            .generate_topology_events(&[alive_name], &mut topology, &mut log)
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(log.top_ver, 1);
        assert_eq!(topology.len(), 1);
        assert!(topology.by_id(node_id).is_some());

        let joined_bytes = store
            .get_data(&catalog.event_joined_path(1))
            .await
            .unwrap();
        let joined: JoinEventDataForJoined = rmp_serde::from_slice(&joined_bytes).unwrap();
        assert_eq!(joined.common_bag, vec![0xC0, 0x7E]);
    }

    #[tokio::test]
    async fn generate_node_join_drops_silently_when_join_data_missing() {
        let (mut coord, _store, _catalog) = setup().await;
        let (mut log, _) = coord.on_become_coordinator().await.unwrap();
        let mut topology = TopologyIndex::new();

        let node_id = Uuid::new_v4();
        let alive_name = format!("{node_id}|0000000000|0000000000");
        let changed = coord
            .generate_topology_events(&[alive_name], &mut topology, &mut log)
            .await
            .unwrap();

        assert!(!changed);
        assert_eq!(log.top_ver, 0);
        assert!(topology.is_empty());
    }

    #[tokio::test]
    async fn generate_node_fail_removes_from_topology_and_bumps_top_ver() {
        let (mut coord, _store, _catalog) = setup().await;
        let mut log = EventLog::new_lineage(0);
        let mut topology = TopologyIndex::new();
        topology.add_node(ClusterNode::new(Uuid::new_v4(), false, vec![], 0, 1));
        log.top_ver = 1;

        let changed = coord
            .generate_topology_events(&[], &mut topology, &mut log)
            .await
            .unwrap();

        assert!(changed);
        assert_eq!(log.top_ver, 2);
        assert!(topology.is_empty());
    }

    #[tokio::test]
    async fn generate_custom_events_tracks_and_observes_acks() {
        let (mut coord, store, catalog) = setup().await;
        let (mut log, _) = coord.on_become_coordinator().await.unwrap();
        let mut topology = TopologyIndex::new();
        topology.add_node(ClusterNode::new(Uuid::new_v4(), false, vec![], 7, 1));

        let sender = Uuid::new_v4();
        let custom_path = store
            .create(
                &format!("{}/{sender}|", catalog.custom_evts_dir()),
                vec![42],
                CreateMode::PersistentSequential,
            )
            .await
            .unwrap();
        let joiner = JoiningNodeData {
            node_id: sender,
            attrs: vec![],
            joining_bag: vec![],
        };
        store
            .create(
                &format!("{}/{sender}|0000000000", catalog.join_data_dir()),
                rmp_serde::to_vec_named(&joiner).unwrap(),
                CreateMode::Persistent,
            )
            .await
            .unwrap();
        topology.add_node(ClusterNode::new(sender, false, vec![], 8, 1));

        let changed = coord
            .generate_custom_events(&[custom_path.rsplit_once('/').unwrap().1.to_string()], &topology, &mut log)
            .await
            .unwrap();
        assert!(changed);
        assert!(!coord.ack_trackers.is_empty());

        store
            .create(
                &PathCatalog::custom_event_ack_path(&custom_path, 7),
                vec![],
                CreateMode::Persistent,
            )
            .await
            .unwrap();
        coord.observe_acks(&custom_path).await.unwrap();
        assert_eq!(coord.low_water_mark(&topology), 0); // sender (8) never acked

        store
            .create(
                &PathCatalog::custom_event_ack_path(&custom_path, 8),
                vec![],
                CreateMode::Persistent,
            )
            .await
            .unwrap();
        coord.observe_acks(&custom_path).await.unwrap();
        assert!(coord.ack_trackers.is_empty());
    }
}
