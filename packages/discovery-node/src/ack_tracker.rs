//! Per-custom-event ack tracking on the coordinator (spec.md §4.7
//! `CustomMessageAckTracker`).
//!
//! Completes a future once every member present in the target set at event
//! creation has posted its ack child, or has left in the meantime.

use std::collections::HashSet;

use tokio::sync::oneshot;

/// Tracks acks for one custom event. Dropping the tracker without
/// completion drops the associated `oneshot::Sender`, which resolves the
/// waiter with a `RecvError` -- callers should treat that the same as a
/// completed-without-data tracker since nothing further will arrive.
pub struct CustomMessageAckTracker {
    target: HashSet<u64>,
    done_tx: Option<oneshot::Sender<()>>,
}

impl CustomMessageAckTracker {
    /// `target` is the `TopologyIndex` membership snapshot at event
    /// creation time (spec.md §4.7).
    #[must_use]
    pub fn new(target: HashSet<u64>) -> (Self, oneshot::Receiver<()>) {
        let (done_tx, done_rx) = oneshot::channel();
        let mut tracker = Self {
            target,
            done_tx: Some(done_tx),
        };
        tracker.complete_if_done();
        (tracker, done_rx)
    }

    /// Intersects `observed` ack-child internal ids against the remaining
    /// target set, completing the tracker if nothing remains.
    pub fn on_acks_observed(&mut self, observed: &HashSet<u64>) {
        self.target.retain(|id| !observed.contains(id));
        self.complete_if_done();
    }

    /// Removes a failed member from the target set (spec.md §4.7
    /// `notifyNodeFail`).
    pub fn on_node_fail(&mut self, internal_id: u64) {
        self.target.remove(&internal_id);
        self.complete_if_done();
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done_tx.is_none()
    }

    #[must_use]
    pub fn remaining(&self) -> &HashSet<u64> {
        &self.target
    }

    fn complete_if_done(&mut self) {
        if self.target.is_empty() {
            if let Some(tx) = self.done_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_target_completes_immediately() {
        let (tracker, done_rx) = CustomMessageAckTracker::new(HashSet::new());
        assert!(tracker.is_done());
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn completes_once_all_acks_observed() {
        let (mut tracker, done_rx) =
            CustomMessageAckTracker::new([1, 2, 3].into_iter().collect());
        tracker.on_acks_observed(&[1].into_iter().collect());
        assert!(!tracker.is_done());
        tracker.on_acks_observed(&[1, 2, 3].into_iter().collect());
        assert!(tracker.is_done());
        done_rx.await.unwrap();
    }

    #[tokio::test]
    async fn node_fail_removes_member_from_target() {
        let (mut tracker, done_rx) = CustomMessageAckTracker::new([1, 2].into_iter().collect());
        tracker.on_node_fail(1);
        assert_eq!(tracker.remaining(), &[2].into_iter().collect());
        tracker.on_node_fail(2);
        assert!(tracker.is_done());
        done_rx.await.unwrap();
    }
}
