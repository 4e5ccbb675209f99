//! In-memory cluster membership index (spec.md §4.3 `TopologyIndex`).
//!
//! Mutated only on the discovery event-dispatch task (spec.md §5); readers
//! take an owned snapshot rather than sharing references across threads.

use std::collections::BTreeMap;

use discovery_core::model::ClusterNode;

/// Three maps over the current membership, kept consistent by construction:
/// every mutation touches all three or none.
#[derive(Debug, Default)]
pub struct TopologyIndex {
    by_id: std::collections::HashMap<uuid::Uuid, ClusterNode>,
    by_internal_id: std::collections::HashMap<u64, uuid::Uuid>,
    by_order: BTreeMap<u64, uuid::Uuid>,
}

impl TopologyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: ClusterNode) {
        let node_id = node.node_id;
        self.by_internal_id.insert(node.internal_id, node_id);
        self.by_order.insert(node.order, node_id);
        self.by_id.insert(node_id, node);
    }

    /// Removes the node with the given `internal_id`, returning it if
    /// present.
    pub fn remove_node(&mut self, internal_id: u64) -> Option<ClusterNode> {
        let node_id = self.by_internal_id.remove(&internal_id)?;
        let node = self.by_id.remove(&node_id)?;
        self.by_order.remove(&node.order);
        Some(node)
    }

    #[must_use]
    pub fn by_id(&self, node_id: uuid::Uuid) -> Option<&ClusterNode> {
        self.by_id.get(&node_id)
    }

    #[must_use]
    pub fn by_internal_id(&self, internal_id: u64) -> Option<&ClusterNode> {
        self.by_internal_id
            .get(&internal_id)
            .and_then(|id| self.by_id.get(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// The coordinator is the alive member with the smallest `internal_id`
    /// (spec.md §3 invariant).
    #[must_use]
    pub fn coordinator_internal_id(&self) -> Option<u64> {
        self.by_internal_id.keys().min().copied()
    }

    /// Stable snapshot in ascending topology-order (spec.md §4.3).
    #[must_use]
    pub fn snapshot(&self) -> Vec<ClusterNode> {
        self.by_order
            .values()
            .filter_map(|id| self.by_id.get(id))
            .cloned()
            .collect()
    }

    /// All `internal_id`s currently tracked, for ack-tracker target sets
    /// (spec.md §4.7).
    #[must_use]
    pub fn internal_ids(&self) -> std::collections::HashSet<u64> {
        self.by_internal_id.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn node(internal_id: u64, order: u64) -> ClusterNode {
        ClusterNode::new(Uuid::new_v4(), false, vec![], internal_id, order)
    }

    #[test]
    fn add_node_populates_all_three_maps() {
        let mut idx = TopologyIndex::new();
        let n = node(0, 1);
        let id = n.node_id;
        idx.add_node(n);

        assert!(idx.by_id(id).is_some());
        assert!(idx.by_internal_id(0).is_some());
        assert_eq!(idx.snapshot().len(), 1);
    }

    #[test]
    fn remove_node_clears_all_three_maps() {
        let mut idx = TopologyIndex::new();
        let n = node(3, 1);
        let id = n.node_id;
        idx.add_node(n);

        let removed = idx.remove_node(3).unwrap();
        assert_eq!(removed.node_id, id);
        assert!(idx.by_id(id).is_none());
        assert!(idx.by_internal_id(3).is_none());
        assert!(idx.snapshot().is_empty());
    }

    #[test]
    fn remove_unknown_internal_id_is_none() {
        let mut idx = TopologyIndex::new();
        assert!(idx.remove_node(99).is_none());
    }

    #[test]
    fn coordinator_is_min_internal_id() {
        let mut idx = TopologyIndex::new();
        idx.add_node(node(5, 1));
        idx.add_node(node(2, 2));
        idx.add_node(node(9, 3));
        assert_eq!(idx.coordinator_internal_id(), Some(2));
    }

    #[test]
    fn snapshot_is_ordered_by_order_field() {
        let mut idx = TopologyIndex::new();
        let a = node(0, 3);
        let b = node(1, 1);
        let c = node(2, 2);
        let (a_id, b_id, c_id) = (a.node_id, b.node_id, c.node_id);
        idx.add_node(a);
        idx.add_node(b);
        idx.add_node(c);

        let ids: Vec<_> = idx.snapshot().into_iter().map(|n| n.node_id).collect();
        assert_eq!(ids, vec![b_id, c_id, a_id]);
    }

    proptest::proptest! {
        /// Whatever internal ids are added or removed, `coordinator_internal_id`
        /// always agrees with a plain min over what's left (spec.md §8:
        /// `coordinator == min(alive.internalId)`).
        #[test]
        fn coordinator_tracks_min_after_any_add_remove_sequence(
            adds in proptest::collection::vec(0u64..20, 1..20),
            drop_first_n in 0usize..20,
        ) {
            let mut idx = TopologyIndex::new();
            let mut live: std::collections::HashSet<u64> = std::collections::HashSet::new();
            for (order, internal_id) in adds.iter().enumerate() {
                idx.add_node(node(*internal_id, order as u64));
                live.insert(*internal_id);
            }
            for internal_id in adds.iter().take(drop_first_n) {
                idx.remove_node(*internal_id);
                live.remove(internal_id);
            }
            proptest::prop_assert_eq!(idx.coordinator_internal_id(), live.iter().min().copied());
        }
    }
}
