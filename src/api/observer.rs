//! Purpose: Turn host storage notifications into `externalChange` events.
//! Exports: `ChangeObserver`, `ObserverState`, `WriteLedger`.
//! Role: Independent listener feeding the bridge's inbound channel.
//! Invariants: A context never receives `externalChange` for its own write.
//! Invariants: Deletions in other contexts surface as an absent value, never dropped.
//! Invariants: Corrupted foreign values surface as absent and are logged.

use std::collections::HashMap;

use crate::core::codec;
use crate::core::origin::{ContextId, StorageEvent};

use super::config::KeyFilter;
use super::message::PersistenceEvent;

/// Last raw value this context wrote per key (`None` after a removal).
#[derive(Clone, Debug, Default)]
pub struct WriteLedger {
    last: HashMap<String, Option<String>>,
}

impl WriteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: &str, raw: Option<&str>) {
        self.last
            .insert(key.to_string(), raw.map(|raw| raw.to_string()));
    }

    pub fn last_written(&self, key: &str) -> Option<Option<&str>> {
        self.last.get(key).map(|raw| raw.as_deref())
    }

    fn matches(&self, key: &str, raw: Option<&str>) -> bool {
        self.last_written(key) == Some(raw)
    }

    fn forget(&mut self, key: &str) {
        self.last.remove(key);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObserverState {
    Idle,
    Dispatching,
}

#[derive(Debug)]
pub struct ChangeObserver {
    context: ContextId,
    watch: KeyFilter,
    state: ObserverState,
}

impl ChangeObserver {
    pub fn new(context: ContextId, watch: KeyFilter) -> Self {
        Self {
            context,
            watch,
            state: ObserverState::Idle,
        }
    }

    pub fn state(&self) -> ObserverState {
        self.state
    }

    pub fn observe(
        &mut self,
        event: &StorageEvent,
        ledger: &mut WriteLedger,
    ) -> Option<PersistenceEvent> {
        if !self.watch.matches(&event.key) {
            return None;
        }
        if event.writer == Some(self.context) {
            tracing::trace!(key = %event.key, "ignoring looped-back local write");
            return None;
        }
        let raw = event.new_value.as_deref();
        if ledger.matches(&event.key, raw) {
            tracing::trace!(key = %event.key, "foreign write matches last local write");
            return None;
        }

        self.state = ObserverState::Dispatching;
        let value = match codec::decode_slot(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key = %event.key, error = %err, "corrupted foreign value treated as absent");
                None
            }
        };
        ledger.forget(&event.key);
        self.state = ObserverState::Idle;

        Some(PersistenceEvent::ExternalChange {
            key: event.key.clone(),
            value,
        })
    }
}
