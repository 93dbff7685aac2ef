//! Purpose: Define the tagged messages exchanged between the application core and the bridge.
//! Exports: `PersistenceRequest`, `PersistenceEvent`, `FailureKind`.
//! Role: Typed port contract; one variant per port, dispatched on the `port` tag.
//! Invariants: Wire tags are camelCase and stable once published.
//! Invariants: An absent value omits `value`; an explicit null serializes as `"value": null`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::error::ErrorKind;

/// Outbound messages emitted by the application core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "port", rename_all = "camelCase")]
pub enum PersistenceRequest {
    Save { key: String, value: Value },
    Load { key: String },
    Remove { key: String },
    /// Session port: `null` clears the session key instead of storing it.
    SetStorage { value: Value },
    StorePeers { value: Value },
    FetchPeers,
}

impl PersistenceRequest {
    pub fn port(&self) -> &'static str {
        match self {
            PersistenceRequest::Save { .. } => "save",
            PersistenceRequest::Load { .. } => "load",
            PersistenceRequest::Remove { .. } => "remove",
            PersistenceRequest::SetStorage { .. } => "setStorage",
            PersistenceRequest::StorePeers { .. } => "storePeers",
            PersistenceRequest::FetchPeers => "fetchPeers",
        }
    }
}

/// Inbound messages delivered to the application core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "port", rename_all = "camelCase")]
pub enum PersistenceEvent {
    Loaded {
        key: String,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    ExternalChange {
        key: String,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    PeersLoaded {
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    /// Local-save acknowledgment, only sent when enabled in `BridgeConfig`.
    Stored {
        key: String,
        #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
    SaveFailed {
        key: String,
        kind: FailureKind,
        message: String,
    },
}

impl PersistenceEvent {
    pub fn key(&self) -> Option<&str> {
        match self {
            PersistenceEvent::Loaded { key, .. }
            | PersistenceEvent::ExternalChange { key, .. }
            | PersistenceEvent::Stored { key, .. }
            | PersistenceEvent::SaveFailed { key, .. } => Some(key),
            PersistenceEvent::PeersLoaded { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Encode,
    QuotaExceeded,
    Storage,
}

impl From<ErrorKind> for FailureKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Encode => FailureKind::Encode,
            ErrorKind::QuotaExceeded => FailureKind::QuotaExceeded,
            _ => FailureKind::Storage,
        }
    }
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
