//! Purpose: Run the port-mediated persistence protocol for one execution context.
//! Exports: `PortBridge`, `Ports`, `OutboundPort`, `InboundPort`, `spawn_bridge`, `connect`.
//! Role: Hub between the application core's ports, the codec, and the storage adapter.
//! Invariants: Requests are handled one at a time in emission order; a save is visible
//! Invariants: to every later load on the same key.
//! Invariants: No failure ends the bridge; each error is scoped to the request that caused it.
//! Notes: The bridge keeps no value cache; every load re-reads host storage. Read-modify-write
//! Notes: sequences built from separate load/save requests can lose a foreign update.
//! Notes: Requests against file origins run on the blocking pool, one at a time.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::core::codec;
use crate::core::error::{Error, ErrorKind};
use crate::core::origin::{Origin, StorageArea, StorageEvent, StorageEvents};
use crate::core::storage::BackendKind;

use super::config::BridgeConfig;
use super::latency::{MinimumLatency, Reply};
use super::message::{FailureKind, PersistenceEvent, PersistenceRequest};
use super::observer::{ChangeObserver, WriteLedger};

pub struct PortBridge {
    storage: StorageArea,
    config: BridgeConfig,
    latency: MinimumLatency,
    ledger: WriteLedger,
    observer: ChangeObserver,
}

impl PortBridge {
    pub fn new(storage: StorageArea, config: BridgeConfig) -> Self {
        let observer = ChangeObserver::new(storage.context(), config.watch.clone());
        Self {
            latency: MinimumLatency::new(config.peer_latency),
            ledger: WriteLedger::new(),
            observer,
            storage,
            config,
        }
    }

    pub fn storage(&self) -> &StorageArea {
        &self.storage
    }

    /// Startup configuration for the application core: the decoded session
    /// value, or `None` when it is missing or unreadable.
    pub fn flags(&self) -> Option<Value> {
        let flags = self.read(&self.config.session_key);
        tracing::debug!(key = %self.config.session_key, present = flags.is_some(), "loaded startup flags");
        flags
    }

    /// Perform one request; returns the reply owed to the core, if any.
    pub fn handle(&mut self, request: PersistenceRequest) -> Option<Reply> {
        tracing::debug!(port = request.port(), "handling request");
        match request {
            PersistenceRequest::Save { key, value } => self.write(&key, value),
            PersistenceRequest::Load { key } => {
                let value = self.read(&key);
                Some(Reply::now(PersistenceEvent::Loaded { key, value }))
            }
            PersistenceRequest::Remove { key } => self.erase(&key),
            PersistenceRequest::SetStorage { value } => {
                let key = self.config.session_key.clone();
                if value.is_null() {
                    self.erase(&key)
                } else {
                    self.write(&key, value)
                }
            }
            PersistenceRequest::StorePeers { value } => {
                let key = self.config.peers_key.clone();
                self.write(&key, value)
            }
            PersistenceRequest::FetchPeers => {
                let value = self.read(&self.config.peers_key);
                Some(self.latency.reply(PersistenceEvent::PeersLoaded { value }))
            }
        }
    }

    /// Feed one host storage notification through the change observer.
    pub fn observe(&mut self, event: &StorageEvent) -> Option<PersistenceEvent> {
        self.observer.observe(event, &mut self.ledger)
    }

    pub async fn run(
        self,
        mut requests: UnboundedReceiver<PersistenceRequest>,
        mut notifications: StorageEvents,
        events: UnboundedSender<PersistenceEvent>,
    ) {
        // File origins lock and rewrite a file per request; keep that off the workers.
        let blocking = matches!(self.storage.origin().backend_kind(), Ok(BackendKind::File));
        let mut bridge = self;
        let mut notifications_open = true;
        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else {
                        break;
                    };
                    let reply = if blocking {
                        match handle_blocking(bridge, request).await {
                            Some((returned, reply)) => {
                                bridge = returned;
                                reply
                            }
                            None => break,
                        }
                    } else {
                        bridge.handle(request)
                    };
                    if let Some(reply) = reply {
                        reply.deliver(&events);
                    }
                }
                notification = notifications.next(), if notifications_open => {
                    match notification {
                        Some(notification) => {
                            if let Some(event) = bridge.observe(&notification) {
                                let _ = events.send(event);
                            }
                        }
                        None => notifications_open = false,
                    }
                }
            }
            if events.is_closed() {
                tracing::debug!("inbound port closed; stopping bridge");
                break;
            }
        }
    }

    fn read(&self, key: &str) -> Option<Value> {
        let raw = match self.storage.get(key) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, error = %err, "storage read failed; treating as absent");
                return None;
            }
        };
        match codec::decode_slot(raw.as_deref()) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "corrupted entry treated as absent");
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: Value) -> Option<Reply> {
        let raw = match codec::encode(&value) {
            Ok(raw) => raw,
            Err(err) => return Some(save_failed(key, err)),
        };
        if let Err(err) = self.storage.set(key, &raw) {
            return Some(save_failed(key, err));
        }
        self.ledger.record(key, Some(&raw));
        self.acknowledge(key, Some(value))
    }

    fn erase(&mut self, key: &str) -> Option<Reply> {
        if let Err(err) = self.storage.remove(key) {
            tracing::warn!(key, error = %err, "storage remove failed");
            return None;
        }
        self.ledger.record(key, None);
        self.acknowledge(key, None)
    }

    fn acknowledge(&self, key: &str, value: Option<Value>) -> Option<Reply> {
        if !self.config.acknowledge_local_save {
            return None;
        }
        Some(Reply::now(PersistenceEvent::Stored {
            key: key.to_string(),
            value,
        }))
    }
}

async fn handle_blocking(
    mut bridge: PortBridge,
    request: PersistenceRequest,
) -> Option<(PortBridge, Option<Reply>)> {
    let task = tokio::task::spawn_blocking(move || {
        let reply = bridge.handle(request);
        (bridge, reply)
    });
    match task.await {
        Ok(done) => Some(done),
        Err(err) => {
            tracing::error!(error = %err, "blocking request handler failed; stopping bridge");
            None
        }
    }
}

fn save_failed(key: &str, err: Error) -> Reply {
    tracing::warn!(key, error = %err, "save failed");
    Reply::now(PersistenceEvent::SaveFailed {
        key: key.to_string(),
        kind: FailureKind::from(err.kind()),
        message: err.message().unwrap_or("save failed").to_string(),
    })
}

/// Sending half held by the application core.
#[derive(Clone, Debug)]
pub struct OutboundPort {
    tx: UnboundedSender<PersistenceRequest>,
}

impl OutboundPort {
    pub fn send(&self, request: PersistenceRequest) -> Result<(), Error> {
        self.tx.send(request).map_err(|_| {
            Error::new(ErrorKind::Unavailable).with_message("bridge is no longer running")
        })
    }

    /// Queue a save; values JSON cannot express fail here with `Encode`.
    pub fn save<T: Serialize + ?Sized>(&self, key: impl Into<String>, value: &T) -> Result<(), Error> {
        let key = key.into();
        let value = codec::to_value(value).map_err(|err| err.with_key(key.clone()))?;
        self.send(PersistenceRequest::Save { key, value })
    }

    pub fn load(&self, key: impl Into<String>) -> Result<(), Error> {
        self.send(PersistenceRequest::Load { key: key.into() })
    }

    pub fn remove(&self, key: impl Into<String>) -> Result<(), Error> {
        self.send(PersistenceRequest::Remove { key: key.into() })
    }

    pub fn set_storage<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        let value = codec::to_value(value)?;
        self.send(PersistenceRequest::SetStorage { value })
    }

    pub fn store_peers<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), Error> {
        let value = codec::to_value(value)?;
        self.send(PersistenceRequest::StorePeers { value })
    }

    pub fn fetch_peers(&self) -> Result<(), Error> {
        self.send(PersistenceRequest::FetchPeers)
    }
}

/// Receiving half held by the application core.
#[derive(Debug)]
pub struct InboundPort {
    rx: UnboundedReceiver<PersistenceEvent>,
}

impl InboundPort {
    pub async fn recv(&mut self) -> Option<PersistenceEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PersistenceEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Everything the application core needs: both ports and its startup flags.
#[derive(Debug)]
pub struct Ports {
    pub outbound: OutboundPort,
    pub inbound: InboundPort,
    pub flags: Option<Value>,
}

/// Start a bridge task on the current tokio runtime.
pub fn spawn_bridge(
    storage: StorageArea,
    notifications: StorageEvents,
    config: BridgeConfig,
) -> (Ports, JoinHandle<()>) {
    let bridge = PortBridge::new(storage, config);
    let flags = bridge.flags();
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(bridge.run(request_rx, notifications, event_tx));
    let ports = Ports {
        outbound: OutboundPort { tx: request_tx },
        inbound: InboundPort { rx: event_rx },
        flags,
    };
    (ports, handle)
}

/// Attach a new context to `origin` and start its bridge.
pub fn connect(origin: &Origin, config: BridgeConfig) -> Result<(Ports, JoinHandle<()>), Error> {
    let (storage, notifications) = origin.attach()?;
    Ok(spawn_bridge(storage, notifications, config))
}
