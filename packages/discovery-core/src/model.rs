//! Discovery data model: cluster nodes, join payloads, and event kinds.
//!
//! These types cross the wire via the [`crate::collab::Marshaller`] the
//! embedder supplies; they carry no knowledge of the coordination store's
//! wire format.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A member of the cluster as tracked by [`crate::model`] consumers.
///
/// Invariants (spec.md §3): `(node_id, internal_id, order)` are unique and
/// stable for the node's lifetime; the coordinator is always the alive
/// member with the smallest `internal_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub node_id: Uuid,
    pub local: bool,
    /// Opaque attributes payload collected at join time.
    #[serde(with = "serde_bytes")]
    pub attrs: Vec<u8>,
    /// Monotone per-cluster-lifetime id, equal to the alive-node sequence.
    pub internal_id: u64,
    /// Monotone topology version at which this node joined.
    pub order: u64,
    /// Opaque, consumer-assigned slot. Not synchronized across members;
    /// set locally by the embedder after discovery notifies it.
    #[serde(skip)]
    pub attachment: Option<Vec<u8>>,
}

impl ClusterNode {
    #[must_use]
    pub fn new(node_id: Uuid, local: bool, attrs: Vec<u8>, internal_id: u64, order: u64) -> Self {
        Self {
            node_id,
            local,
            attrs,
            internal_id,
            order,
            attachment: None,
        }
    }
}

/// The joiner's descriptor plus its [`crate::collab::Exchange`]-collected
/// payload. Written once per join attempt at `joinData/{uuid}|{storeSeq}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoiningNodeData {
    pub node_id: Uuid,
    #[serde(with = "serde_bytes")]
    pub attrs: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub joining_bag: Vec<u8>,
}

/// Snapshot of the topology at join moment plus the
/// [`crate::collab::Exchange`]-collected common data, persisted under the
/// join event's `joined` child path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinEventDataForJoined {
    pub grid_start_time: u64,
    pub topology_snapshot: Vec<ClusterNode>,
    #[serde(with = "serde_bytes")]
    pub common_bag: Vec<u8>,
}

/// Discovery event categories delivered to [`crate::collab::Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryEventType {
    NodeJoined,
    NodeFailed,
    CustomEvent,
    /// Connection-loss window exceeded `connLossTimeout` while already
    /// joined (spec.md §7).
    NodeSegmented,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_node_new_has_no_attachment() {
        let node = ClusterNode::new(Uuid::nil(), true, vec![1, 2, 3], 0, 1);
        assert!(node.attachment.is_none());
        assert_eq!(node.internal_id, 0);
        assert_eq!(node.order, 1);
    }

    #[test]
    fn joining_node_data_msgpack_round_trip() {
        let data = JoiningNodeData {
            node_id: Uuid::new_v4(),
            attrs: vec![1, 2, 3],
            joining_bag: vec![4, 5],
        };
        let bytes = rmp_serde::to_vec_named(&data).unwrap();
        let decoded: JoiningNodeData = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(data, decoded);
    }

    #[test]
    fn join_event_data_for_joined_round_trip() {
        let node = ClusterNode::new(Uuid::new_v4(), false, vec![], 0, 1);
        let data = JoinEventDataForJoined {
            grid_start_time: 1_700_000_000_000,
            topology_snapshot: vec![node],
            common_bag: vec![9, 9, 9],
        };
        let bytes = rmp_serde::to_vec_named(&data).unwrap();
        let decoded: JoinEventDataForJoined = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(data, decoded);
    }
}
