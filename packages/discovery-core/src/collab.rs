//! External collaborator interfaces (spec.md §1, §6).
//!
//! The core never implements these: user-payload serialization
//! ([`Marshaller`]), the discovery listener ([`Listener`]), the
//! application-level data-exchange hook ([`Exchange`]), and the
//! connection-lost notification ([`ConnectionLostCallback`]) are all
//! supplied by the embedding application. The core only moves opaque byte
//! payloads and node identifiers through them.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::model::{ClusterNode, DiscoveryEventType};

/// Errors from a [`Marshaller`] round-trip.
#[derive(Debug, Error)]
pub enum MarshalError {
    #[error("failed to marshal value: {0}")]
    Encode(String),
    #[error("failed to unmarshal value: {0}")]
    Decode(String),
}

/// Round-trips application objects to and from opaque bytes.
///
/// Not object-safe by design (generic methods) — implementations are
/// selected at compile time by whatever embeds this crate, the same way a
/// `serde::Serializer` is chosen at compile time rather than boxed.
pub trait Marshaller: Send + Sync {
    /// # Errors
    /// Returns [`MarshalError::Encode`] if `value` cannot be serialized.
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, MarshalError>;

    /// # Errors
    /// Returns [`MarshalError::Decode`] if `bytes` cannot be deserialized
    /// into `T`.
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError>;
}

/// Default [`Marshaller`] backed by named-field MsgPack, matching the wire
/// format the core itself uses for `EventLog` and friends.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackMarshaller;

impl Marshaller for MsgPackMarshaller {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, MarshalError> {
        rmp_serde::to_vec_named(value).map_err(|e| MarshalError::Encode(e.to_string()))
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, MarshalError> {
        rmp_serde::from_slice(bytes).map_err(|e| MarshalError::Decode(e.to_string()))
    }
}

/// A topology change or custom message, delivered to [`Listener`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEvent {
    pub event_type: DiscoveryEventType,
    pub top_ver: u64,
    pub event_node: ClusterNode,
    pub top_snapshot: Vec<ClusterNode>,
    /// Bounded window of recent `(top_ver, snapshot)` pairs preceding this
    /// event, for consumers that need to reconcile against a prior view.
    pub historical_topologies: Vec<(u64, Vec<ClusterNode>)>,
    #[allow(clippy::struct_field_names)]
    pub custom_msg: Option<Vec<u8>>,
}

/// Receives discovery events in the exact order and `(top_ver, eventId)`
/// every member observes them (spec.md §5 ordering guarantee).
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_discovery(&self, event: DiscoveryEvent);
}

/// Opaque payload carried through a join's data exchange (spec.md §6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeBag {
    pub joining_node_data: Option<Vec<u8>>,
    pub common_data: Option<Vec<u8>>,
}

/// Application-level hook for absorbing a joiner's data and producing the
/// common payload handed back to it.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Called by the coordinator once per join: `bag.joining_node_data` is
    /// the joiner's collected payload. Populate `bag.common_data` with the
    /// payload that should be handed to the joiner.
    async fn collect(&self, bag: &mut ExchangeBag);

    /// Called with a joiner's payload so local application state can
    /// absorb it (on the coordinator) or with the common payload so a
    /// joining node can absorb cluster-wide state (on the joiner).
    async fn on_exchange(&self, bag: &ExchangeBag);
}

/// Invoked exactly once when the local session transitions to `Lost`
/// (spec.md §4.2).
pub trait ConnectionLostCallback: Send + Sync {
    fn on_connection_lost(&self);
}

impl<F> ConnectionLostCallback for F
where
    F: Fn() + Send + Sync,
{
    fn on_connection_lost(&self) {
        self();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn msgpack_marshaller_round_trips() {
        let m = MsgPackMarshaller;
        let value = Sample {
            a: 1,
            b: "hi".to_string(),
        };
        let bytes = m.marshal(&value).unwrap();
        let decoded: Sample = m.unmarshal(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn msgpack_marshaller_rejects_garbage() {
        let m = MsgPackMarshaller;
        let err = m.unmarshal::<Sample>(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, MarshalError::Decode(_)));
    }

    #[test]
    fn connection_lost_callback_closure_adapter() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let cb: Box<dyn ConnectionLostCallback> = Box::new(move || {
            fired2.store(true, Ordering::SeqCst);
        });
        cb.on_connection_lost();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn listener_trait_object_is_callable() {
        struct Recording(std::sync::Mutex<Vec<DiscoveryEventType>>);

        #[async_trait]
        impl Listener for Recording {
            async fn on_discovery(&self, event: DiscoveryEvent) {
                self.0.lock().unwrap().push(event.event_type);
            }
        }

        let listener: Arc<dyn Listener> = Arc::new(Recording(std::sync::Mutex::new(Vec::new())));
        listener
            .on_discovery(DiscoveryEvent {
                event_type: DiscoveryEventType::NodeJoined,
                top_ver: 1,
                event_node: ClusterNode::new(Uuid::nil(), true, vec![], 0, 1),
                top_snapshot: vec![],
                historical_topologies: vec![],
                custom_msg: None,
            })
            .await;
    }
}
