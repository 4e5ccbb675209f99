//! Discovery core -- pure data model and algorithms for a
//! coordination-store-backed cluster membership service.
//!
//! This crate carries no I/O and no async runtime: it derives store paths,
//! defines the wire types persisted and exchanged over the coordination
//! store, and maintains the append-only event log those types flow through.
//! Everything that talks to a real store or a real network lives in
//! `discovery-node`.
//!
//! - **Path** ([`path`]): derives store paths and encodes/decodes
//!   sequential node names.
//! - **Clock** ([`clock`]): consumer-pluggable wall-clock source.
//! - **Model** ([`model`]): `ClusterNode`, join payloads, event type tags.
//! - **`EventLog`** ([`eventlog`]): the append-only, replayable event
//!   history.
//! - **Collab** ([`collab`]): traits the embedding application implements
//!   (`Marshaller`, `Listener`, `Exchange`, `ConnectionLostCallback`).

pub mod clock;
pub mod collab;
pub mod eventlog;
pub mod model;
pub mod path;

pub use clock::{ClockSource, SystemClock};
pub use collab::{
    ConnectionLostCallback, DiscoveryEvent, Exchange, ExchangeBag, MarshalError, Listener,
    Marshaller, MsgPackMarshaller,
};
pub use eventlog::{EventLog, EventRecord, LAST_PROCESSED_SENTINEL};
pub use model::{ClusterNode, DiscoveryEventType, JoinEventDataForJoined, JoiningNodeData};
pub use path::{AliveName, PathCatalog, PathError};
