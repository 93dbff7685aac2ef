// A storage origin shared by execution contexts, plus the per-context adapter.
// Every mutation made through one context is announced to every other attached
// context as a `StorageEvent`; the writer itself is skipped unless the origin
// is configured to loop notifications back.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};

use crate::core::error::{Error, ErrorKind};
use crate::core::storage::{BackendKind, FileBackend, MemoryBackend, Quota, StorageBackend};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

/// Native "storage mutated" notification as delivered to one context.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Context that performed the write; `None` for writes made outside this
    /// process and picked up by `Origin::refresh`.
    pub writer: Option<ContextId>,
}

struct Listener {
    context: ContextId,
    tx: UnboundedSender<StorageEvent>,
}

struct OriginState {
    backend: Box<dyn StorageBackend>,
    listeners: Vec<Listener>,
    known: BTreeMap<String, String>,
    next_context: u64,
    loopback: bool,
}

#[derive(Clone)]
pub struct Origin {
    state: Arc<Mutex<OriginState>>,
}

impl Origin {
    pub fn with_backend(backend: Box<dyn StorageBackend>) -> Result<Self, Error> {
        let known = backend.snapshot()?;
        Ok(Self {
            state: Arc::new(Mutex::new(OriginState {
                backend,
                listeners: Vec::new(),
                known,
                next_context: 1,
                loopback: false,
            })),
        })
    }

    pub fn memory(quota: Quota) -> Self {
        Self {
            state: Arc::new(Mutex::new(OriginState {
                backend: Box::new(MemoryBackend::new(quota)),
                listeners: Vec::new(),
                known: BTreeMap::new(),
                next_context: 1,
                loopback: false,
            })),
        }
    }

    pub fn open_file(path: impl AsRef<Path>, quota: Quota) -> Result<Self, Error> {
        let backend = FileBackend::open(path, quota)?;
        Self::with_backend(Box::new(backend))
    }

    /// Open a file origin, substituting a private in-memory origin when the
    /// file primitive is unavailable.
    pub fn open_file_or_memory(path: impl AsRef<Path>, quota: Quota) -> Result<Self, Error> {
        let path = path.as_ref();
        match Self::open_file(path, quota) {
            Ok(origin) => Ok(origin),
            Err(err) if err.kind() == ErrorKind::Unavailable => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "storage unavailable; using in-memory fallback"
                );
                Ok(Self::memory(quota))
            }
            Err(err) => Err(err),
        }
    }

    /// Deliver each context's own writes back to it as well.
    pub fn with_loopback(self, loopback: bool) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.loopback = loopback;
        }
        self
    }

    pub fn backend_kind(&self) -> Result<BackendKind, Error> {
        Ok(self.lock()?.backend.kind())
    }

    /// Attach a new execution context to this origin.
    pub fn attach(&self) -> Result<(StorageArea, StorageEvents), Error> {
        let mut state = self.lock()?;
        let context = ContextId(state.next_context);
        state.next_context += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        state.listeners.push(Listener { context, tx });
        let area = StorageArea {
            origin: self.clone(),
            context,
        };
        Ok((area, StorageEvents { rx }))
    }

    /// Re-read the backend and announce keys changed outside this process.
    ///
    /// Returns the number of changed keys. Memory origins never change
    /// behind the origin's back, so this is a no-op for them.
    pub fn refresh(&self) -> Result<usize, Error> {
        let mut state = self.lock()?;
        let current = state.backend.snapshot()?;
        let mut changes = Vec::new();
        for (key, new_raw) in &current {
            let old_raw = state.known.get(key);
            if old_raw != Some(new_raw) {
                changes.push(StorageEvent {
                    key: key.clone(),
                    old_value: old_raw.cloned(),
                    new_value: Some(new_raw.clone()),
                    writer: None,
                });
            }
        }
        for (key, old_raw) in &state.known {
            if !current.contains_key(key) {
                changes.push(StorageEvent {
                    key: key.clone(),
                    old_value: Some(old_raw.clone()),
                    new_value: None,
                    writer: None,
                });
            }
        }
        state.known = current;
        let count = changes.len();
        for event in changes {
            state.announce(event);
        }
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, OriginState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("origin state poisoned"))
    }
}

impl OriginState {
    fn announce(&mut self, event: StorageEvent) {
        let loopback = self.loopback;
        self.listeners.retain(|listener| {
            if !loopback && event.writer == Some(listener.context) {
                return true;
            }
            if listener.tx.send(event.clone()).is_err() {
                tracing::debug!(context = listener.context.0, "dropping detached context");
                return false;
            }
            true
        });
    }
}

/// Storage adapter for one execution context.
///
/// `get`/`set`/`remove` are synchronous; each call is atomic with respect to
/// other contexts, but a read followed by a write is not. A foreign write that
/// lands between them is lost.
#[derive(Clone)]
pub struct StorageArea {
    origin: Origin,
    context: ContextId,
}

impl StorageArea {
    /// A private in-memory area with no sibling contexts.
    pub fn in_memory(quota: Quota) -> Self {
        Self {
            origin: Origin::memory(quota),
            context: ContextId(0),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let state = self.origin.lock()?;
        state.backend.get(key)
    }

    pub fn set(&self, key: &str, raw: &str) -> Result<(), Error> {
        let mut state = self.origin.lock()?;
        let old_value = state.backend.get(key)?;
        state.backend.set(key, raw)?;
        state.known.insert(key.to_string(), raw.to_string());
        state.announce(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: Some(raw.to_string()),
            writer: Some(self.context),
        });
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), Error> {
        let mut state = self.origin.lock()?;
        let old_value = state.backend.get(key)?;
        state.backend.remove(key)?;
        state.known.remove(key);
        if old_value.is_none() {
            return Ok(());
        }
        state.announce(StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: None,
            writer: Some(self.context),
        });
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<String>, Error> {
        let state = self.origin.lock()?;
        Ok(state.backend.snapshot()?.into_keys().collect())
    }
}

/// Receiving end of one context's storage notifications.
pub struct StorageEvents {
    rx: UnboundedReceiver<StorageEvent>,
}

impl StorageEvents {
    pub async fn next(&mut self) -> Option<StorageEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<StorageEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}
