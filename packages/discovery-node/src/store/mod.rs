//! Coordination-store backends and the resilient client wrapping them
//! (spec.md §2 C2, §2 added "`RawStore` trait + two backends").

pub mod client;
pub mod mem;
pub mod raw;

#[cfg(feature = "zookeeper")]
pub mod zk;

pub use client::{SessionState, StoreClient};
pub use mem::MemRawStore;
pub use raw::{CreateMode, RawStore, RawStoreError, StoreEvent};

#[cfg(feature = "zookeeper")]
pub use zk::ZkRawStore;
