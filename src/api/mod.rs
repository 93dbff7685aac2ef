//! Purpose: Define the stable public Rust API boundary for the persistence bridge.
//! Exports: Port message types, bridge configuration, the bridge itself, and storage handles.
//! Role: Public, additive-only surface used by the CLI, tests, and embedding shells.
//! Invariants: Storage is always passed in explicitly; there is no ambient storage singleton.

mod bridge;
mod config;
mod latency;
mod message;
mod observer;

pub use crate::core::codec;
pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::origin::{ContextId, Origin, StorageArea, StorageEvent, StorageEvents};
pub use crate::core::storage::{BackendKind, DEFAULT_QUOTA_BYTES, Quota};
pub use bridge::{InboundPort, OutboundPort, PortBridge, Ports, connect, spawn_bridge};
pub use config::{
    BridgeConfig, DEFAULT_PEER_LATENCY, DEFAULT_PEERS_KEY, DEFAULT_SESSION_KEY, KeyFilter,
};
pub use latency::{MinimumLatency, Reply};
pub use message::{FailureKind, PersistenceEvent, PersistenceRequest};
pub use observer::{ChangeObserver, ObserverState, WriteLedger};
