//! Serialized, append-only discovery event log (spec.md §3 `EventLog`).
//!
//! The log is the single payload persisted at `evtsPath`; every member
//! replays it to learn the authoritative event history. Coordinator-local
//! records carry the full payload in memory so the coordinator can notify
//! itself without an extra store round-trip; the `#[serde(skip)]` payload
//! fields below ensure that payload never leaks into the marshaled bytes
//! other members read (see spec.md §9, "Mixed in-memory vs persisted event
//! payloads").

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::JoiningNodeData;

/// Sentinel value for "no events processed yet" (spec.md §4.4).
pub const LAST_PROCESSED_SENTINEL: i64 = -1;

/// A single recorded discovery event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventRecord {
    NodeJoined {
        event_id: u64,
        top_ver: u64,
        node_id: Uuid,
        joined_internal_id: u64,
        /// Present only on the coordinator's in-memory copy; never
        /// serialized (spec.md §9).
        #[serde(skip)]
        joining_data: Option<JoiningNodeData>,
    },
    NodeFailed {
        event_id: u64,
        top_ver: u64,
        failed_internal_id: u64,
    },
    CustomEvent {
        event_id: u64,
        top_ver: u64,
        sender_node_id: Uuid,
        custom_event_path: String,
        /// Present only on the coordinator's in-memory copy; never
        /// serialized (spec.md §9).
        #[serde(skip)]
        message: Option<Vec<u8>>,
    },
}

impl EventRecord {
    #[must_use]
    pub fn event_id(&self) -> u64 {
        match self {
            Self::NodeJoined { event_id, .. }
            | Self::NodeFailed { event_id, .. }
            | Self::CustomEvent { event_id, .. } => *event_id,
        }
    }

    #[must_use]
    pub fn top_ver(&self) -> u64 {
        match self {
            Self::NodeJoined { top_ver, .. }
            | Self::NodeFailed { top_ver, .. }
            | Self::CustomEvent { top_ver, .. } => *top_ver,
        }
    }
}

/// The authoritative, append-only discovery event history.
///
/// Invariants (spec.md §3): within a log, `top_ver` strictly increases
/// across join/fail events; custom events bump `evt_id_gen` but not
/// `top_ver`; `events` may be pruned from the low end but never reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub grid_start_time: u64,
    pub top_ver: u64,
    pub evt_id_gen: u64,
    /// Highest custom-event store-sequence already absorbed. `None` means
    /// no custom event has been processed yet.
    pub proc_cust_evt: Option<u64>,
    pub events: BTreeMap<u64, EventRecord>,
}

impl EventLog {
    /// Starts a brand-new cluster lineage (spec.md §4.5 "`newClusterStarted`
    /// path"): empty event map, `top_ver = 0`.
    #[must_use]
    pub fn new_lineage(grid_start_time: u64) -> Self {
        Self {
            grid_start_time,
            top_ver: 0,
            evt_id_gen: 0,
            proc_cust_evt: None,
            events: BTreeMap::new(),
        }
    }

    /// Appends a `NodeJoined` event, bumping `top_ver` and `evt_id_gen` by
    /// one each, and assigning the joining node `order = top_ver`.
    pub fn append_join(
        &mut self,
        node_id: Uuid,
        joined_internal_id: u64,
        joining_data: Option<JoiningNodeData>,
    ) -> &EventRecord {
        self.top_ver += 1;
        self.evt_id_gen += 1;
        let record = EventRecord::NodeJoined {
            event_id: self.evt_id_gen,
            top_ver: self.top_ver,
            node_id,
            joined_internal_id,
            joining_data,
        };
        self.events.entry(self.evt_id_gen).or_insert(record)
    }

    /// Appends a `NodeFailed` event, bumping `top_ver` and `evt_id_gen`.
    pub fn append_fail(&mut self, failed_internal_id: u64) -> &EventRecord {
        self.top_ver += 1;
        self.evt_id_gen += 1;
        let record = EventRecord::NodeFailed {
            event_id: self.evt_id_gen,
            top_ver: self.top_ver,
            failed_internal_id,
        };
        self.events.entry(self.evt_id_gen).or_insert(record)
    }

    /// Appends a `CustomEvent`, bumping only `evt_id_gen`; `top_ver` is
    /// unchanged.
    pub fn append_custom(
        &mut self,
        sender_node_id: Uuid,
        custom_event_path: String,
        message: Option<Vec<u8>>,
    ) -> &EventRecord {
        self.evt_id_gen += 1;
        let record = EventRecord::CustomEvent {
            event_id: self.evt_id_gen,
            top_ver: self.top_ver,
            sender_node_id,
            custom_event_path,
            message,
        };
        self.events.entry(self.evt_id_gen).or_insert(record)
    }

    /// Events strictly after `last_processed` in event-id order, exactly
    /// the replay discipline of spec.md §4.4.
    pub fn events_after(&self, last_processed: i64) -> impl Iterator<Item = &EventRecord> {
        self.events
            .values()
            .filter(move |e| i64::try_from(e.event_id()).unwrap_or(i64::MAX) > last_processed)
    }

    /// Drops all events with `event_id <= low_water_mark` (spec.md §9 —
    /// bounded garbage collection is invited, not mandated). Never touches
    /// `top_ver` or `evt_id_gen`.
    pub fn gc_events(&mut self, low_water_mark: u64) {
        self.events.retain(|id, _| *id > low_water_mark);
    }

    /// Validates the structural invariants from spec.md §8: `evt_id_gen`
    /// equals the max event id present, and `top_ver` is non-decreasing in
    /// event order with joins/fails bumping it by exactly one.
    #[must_use]
    pub fn check_invariants(&self) -> bool {
        if let Some(max_id) = self.events.keys().next_back() {
            if *max_id > self.evt_id_gen {
                return false;
            }
        }
        let mut last_top_ver = 0;
        for record in self.events.values() {
            match record {
                EventRecord::NodeJoined { top_ver, .. } | EventRecord::NodeFailed { top_ver, .. } => {
                    if *top_ver != last_top_ver + 1 {
                        return false;
                    }
                    last_top_ver = *top_ver;
                }
                EventRecord::CustomEvent { top_ver, .. } => {
                    if *top_ver < last_top_ver {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lineage_is_empty() {
        let log = EventLog::new_lineage(100);
        assert_eq!(log.top_ver, 0);
        assert_eq!(log.evt_id_gen, 0);
        assert!(log.events.is_empty());
        assert!(log.proc_cust_evt.is_none());
    }

    #[test]
    fn append_join_bumps_top_ver_and_evt_id() {
        let mut log = EventLog::new_lineage(100);
        let node_id = Uuid::new_v4();
        log.append_join(node_id, 0, None);
        assert_eq!(log.top_ver, 1);
        assert_eq!(log.evt_id_gen, 1);
        assert!(log.check_invariants());
    }

    #[test]
    fn append_fail_bumps_top_ver_and_evt_id() {
        let mut log = EventLog::new_lineage(100);
        log.append_join(Uuid::new_v4(), 0, None);
        log.append_fail(0);
        assert_eq!(log.top_ver, 2);
        assert_eq!(log.evt_id_gen, 2);
        assert!(log.check_invariants());
    }

    #[test]
    fn append_custom_does_not_bump_top_ver() {
        let mut log = EventLog::new_lineage(100);
        log.append_join(Uuid::new_v4(), 0, None);
        let top_ver_before = log.top_ver;
        log.append_custom(Uuid::new_v4(), "customEvents/x|1".to_string(), None);
        assert_eq!(log.top_ver, top_ver_before);
        assert_eq!(log.evt_id_gen, 2);
    }

    #[test]
    fn events_after_sentinel_returns_everything() {
        let mut log = EventLog::new_lineage(100);
        log.append_join(Uuid::new_v4(), 0, None);
        log.append_join(Uuid::new_v4(), 1, None);
        let all: Vec<_> = log.events_after(LAST_PROCESSED_SENTINEL).collect();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn events_after_high_water_mark_returns_nothing() {
        let mut log = EventLog::new_lineage(100);
        log.append_join(Uuid::new_v4(), 0, None);
        let none: Vec<_> = log.events_after(log.evt_id_gen as i64).collect();
        assert!(none.is_empty());
    }

    #[test]
    fn joining_data_never_serialized() {
        let mut log = EventLog::new_lineage(100);
        let node_id = Uuid::new_v4();
        log.append_join(
            node_id,
            0,
            Some(JoiningNodeData {
                node_id,
                attrs: vec![1, 2, 3],
                joining_bag: vec![4, 5],
            }),
        );

        let bytes = rmp_serde::to_vec_named(&log).unwrap();
        let decoded: EventLog = rmp_serde::from_slice(&bytes).unwrap();

        match decoded.events.get(&1).unwrap() {
            EventRecord::NodeJoined { joining_data, .. } => assert!(joining_data.is_none()),
            _ => panic!("expected NodeJoined"),
        }
    }

    #[test]
    fn gc_events_prunes_low_end_only() {
        let mut log = EventLog::new_lineage(100);
        log.append_join(Uuid::new_v4(), 0, None);
        log.append_join(Uuid::new_v4(), 1, None);
        log.append_join(Uuid::new_v4(), 2, None);
        log.gc_events(1);
        assert!(!log.events.contains_key(&1));
        assert!(log.events.contains_key(&2));
        assert!(log.events.contains_key(&3));
        assert_eq!(log.evt_id_gen, 3);
    }

    #[test]
    fn check_invariants_detects_skipped_top_ver() {
        let mut log = EventLog::new_lineage(100);
        log.append_join(Uuid::new_v4(), 0, None);
        log.evt_id_gen += 1;
        log.events.insert(
            log.evt_id_gen,
            EventRecord::NodeFailed {
                event_id: log.evt_id_gen,
                top_ver: 9, // skips ahead of the expected top_ver = 2
                failed_internal_id: 0,
            },
        );
        assert!(!log.check_invariants());
    }

    proptest::proptest! {
        /// Any mix of join/fail/custom appends keeps `check_invariants` true
        /// and `evt_id_gen` equal to the number of events appended
        /// (spec.md §8: `evtIdGen == max(events.eventId)`).
        #[test]
        fn check_invariants_holds_after_any_append_sequence(ops in proptest::collection::vec(0u8..3, 0..50)) {
            let mut log = EventLog::new_lineage(100);
            for op in ops {
                match op {
                    0 => { log.append_join(Uuid::new_v4(), 0, None); }
                    1 => { log.append_fail(0); }
                    _ => { log.append_custom(Uuid::new_v4(), "customEvents/x|1".to_string(), None); }
                }
                proptest::prop_assert!(log.check_invariants());
            }
            proptest::prop_assert_eq!(log.evt_id_gen as usize, log.events.len());
        }
    }
}
