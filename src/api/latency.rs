//! Purpose: Model replies that must not arrive faster than a configured floor.
//! Exports: `Reply`, `MinimumLatency`.
//! Role: Lets the peer-list path imitate a network round trip without special cases.
//! Invariants: A zero floor yields immediate replies, identical to any other reply.
//! Invariants: Deferred replies are not cancellable once scheduled.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use super::message::PersistenceEvent;

#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub event: PersistenceEvent,
    pub delay: Duration,
}

impl Reply {
    pub fn now(event: PersistenceEvent) -> Self {
        Self {
            event,
            delay: Duration::ZERO,
        }
    }

    pub fn is_immediate(&self) -> bool {
        self.delay.is_zero()
    }

    /// Send the reply, deferring it on the tokio runtime when it carries a delay.
    ///
    /// A closed inbound port drops the reply silently.
    pub fn deliver(self, events: &UnboundedSender<PersistenceEvent>) {
        if self.is_immediate() {
            let _ = events.send(self.event);
            return;
        }
        let events = events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(self.delay).await;
            let _ = events.send(self.event);
        });
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MinimumLatency {
    floor: Duration,
}

impl MinimumLatency {
    pub fn new(floor: Duration) -> Self {
        Self { floor }
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn reply(&self, event: PersistenceEvent) -> Reply {
        Reply {
            event,
            delay: self.floor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MinimumLatency, Reply};
    use crate::api::message::PersistenceEvent;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn peers() -> PersistenceEvent {
        PersistenceEvent::PeersLoaded { value: None }
    }

    #[test]
    fn zero_floor_is_an_immediate_reply() {
        let reply = MinimumLatency::none().reply(peers());
        assert_eq!(reply, Reply::now(peers()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        reply.deliver(&tx);
        assert_eq!(rx.try_recv().expect("event"), peers());
    }

    #[tokio::test(start_paused = true)]
    async fn floor_defers_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        MinimumLatency::new(Duration::from_millis(200))
            .reply(peers())
            .deliver(&tx);
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(199)).await;
        assert!(rx.try_recv().is_err());

        let event = rx.recv().await.expect("event");
        assert_eq!(event, peers());
    }
}
