//! Purpose: Configure one port bridge instance.
//! Exports: `BridgeConfig`, `KeyFilter`, default key and latency constants.
//! Role: Plain data handed to `PortBridge::new`; no ambient or global settings.
//! Invariants: Defaults reproduce the classic shell: session + peers keys, 200ms peer latency.

use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_SESSION_KEY: &str = "session";
pub const DEFAULT_PEERS_KEY: &str = "peers";
pub const DEFAULT_PEER_LATENCY: Duration = Duration::from_millis(200);

/// Keys whose foreign writes are republished as `externalChange`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyFilter {
    All,
    Keys(BTreeSet<String>),
}

impl KeyFilter {
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyFilter::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Keys(keys) => keys.contains(key),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub session_key: String,
    pub peers_key: String,
    pub watch: KeyFilter,
    pub peer_latency: Duration,
    pub acknowledge_local_save: bool,
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self {
            session_key: DEFAULT_SESSION_KEY.to_string(),
            peers_key: DEFAULT_PEERS_KEY.to_string(),
            watch: KeyFilter::keys([DEFAULT_SESSION_KEY]),
            peer_latency: DEFAULT_PEER_LATENCY,
            acknowledge_local_save: false,
        }
    }

    /// Change the session key; a default watch set follows it.
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if self.watch == KeyFilter::keys([self.session_key.as_str()]) {
            self.watch = KeyFilter::keys([key.as_str()]);
        }
        self.session_key = key;
        self
    }

    pub fn with_peers_key(mut self, key: impl Into<String>) -> Self {
        self.peers_key = key.into();
        self
    }

    pub fn with_watch(mut self, watch: KeyFilter) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_peer_latency(mut self, latency: Duration) -> Self {
        self.peer_latency = latency;
        self
    }

    pub fn with_acknowledge_local_save(mut self, enabled: bool) -> Self {
        self.acknowledge_local_save = enabled;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}
