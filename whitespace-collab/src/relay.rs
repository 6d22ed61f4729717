//! Ordered fan-out of operations to the other editors in a room.
//!
//! One tokio broadcast channel per room. The hub sends while holding the room
//! lock, so every receiver observes operations in hub arrival order. Each
//! editor's [`ChangeStream`] drops the operations it sent itself.
//!
//! Delivery is at-most-once: a receiver that falls more than `capacity`
//! messages behind loses the oldest ones. Such an editor resynchronizes by
//! joining again and loading the full snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use whitespace_core::Delta;

use crate::protocol::ClientId;

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub operations_relayed: u64,
    pub operations_dropped: u64,
}

#[derive(Default)]
struct RelayCounters {
    relayed: AtomicU64,
    dropped: AtomicU64,
}

/// An operation tagged with the editor that produced it.
#[derive(Debug)]
pub struct RelayedChange {
    pub from: ClientId,
    pub operation: Delta,
}

/// Fan-out group for a single room.
pub struct RelayGroup {
    sender: broadcast::Sender<Arc<RelayedChange>>,
    capacity: usize,
    counters: Arc<RelayCounters>,
}

impl RelayGroup {
    /// `capacity` is the number of operations buffered per receiver before a
    /// lagging editor starts losing them.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            counters: Arc::new(RelayCounters::default()),
        }
    }

    /// Subscribe `client` to operations relayed from now on.
    pub fn subscribe(&self, client: ClientId) -> ChangeStream {
        ChangeStream {
            client,
            receiver: self.sender.subscribe(),
            counters: self.counters.clone(),
        }
    }

    /// Deliver `operation` to every subscriber except `from`.
    ///
    /// Returns the number of live receivers, the sender's own stream included.
    pub fn relay(&self, from: ClientId, operation: Delta) -> usize {
        let change = Arc::new(RelayedChange { from, operation });
        let receivers = self.sender.send(change).unwrap_or(0);
        self.counters.relayed.fetch_add(1, Ordering::Relaxed);
        receivers
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            operations_relayed: self.counters.relayed.load(Ordering::Relaxed),
            operations_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// The receiving half held by one editor's connection.
pub struct ChangeStream {
    client: ClientId,
    receiver: broadcast::Receiver<Arc<RelayedChange>>,
    counters: Arc<RelayCounters>,
}

impl ChangeStream {
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Next operation from another editor, or `None` once the room is gone.
    pub async fn recv(&mut self) -> Option<Delta> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.from == self.client => continue,
                Ok(change) => return Some(change.operation.clone()),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.counters.dropped.fetch_add(missed, Ordering::Relaxed);
                    log::warn!("Client {} lagged, dropped {missed} operations", self.client);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv). `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<Delta> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if change.from == self.client => continue,
                Ok(change) => return Some(change.operation.clone()),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.counters.dropped.fetch_add(missed, Ordering::Relaxed);
                    log::warn!("Client {} lagged, dropped {missed} operations", self.client);
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let group = RelayGroup::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let mut alice_stream = group.subscribe(alice);
        let mut bob_stream = group.subscribe(bob);

        let receivers = group.relay(alice, Delta::new().insert("hi"));
        assert_eq!(receivers, 2);

        assert_eq!(bob_stream.recv().await, Some(Delta::new().insert("hi")));
        assert_eq!(alice_stream.try_recv(), None);
    }

    #[tokio::test]
    async fn test_relay_preserves_order() {
        let group = RelayGroup::new(64);
        let alice = Uuid::new_v4();
        let mut bob = group.subscribe(Uuid::new_v4());

        for i in 0..20 {
            group.relay(alice, Delta::new().insert(i.to_string()));
        }
        for i in 0..20 {
            assert_eq!(bob.recv().await, Some(Delta::new().insert(i.to_string())));
        }
    }

    #[tokio::test]
    async fn test_interleaved_senders_keep_arrival_order() {
        let group = RelayGroup::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut carol = group.subscribe(Uuid::new_v4());

        group.relay(alice, Delta::new().insert("a1"));
        group.relay(bob, Delta::new().insert("b1"));
        group.relay(alice, Delta::new().insert("a2"));

        assert_eq!(carol.recv().await, Some(Delta::new().insert("a1")));
        assert_eq!(carol.recv().await, Some(Delta::new().insert("b1")));
        assert_eq!(carol.recv().await, Some(Delta::new().insert("a2")));
    }

    #[tokio::test]
    async fn test_lagging_receiver_drops_oldest() {
        let group = RelayGroup::new(2);
        let alice = Uuid::new_v4();
        let mut bob = group.subscribe(Uuid::new_v4());

        for i in 0..5 {
            group.relay(alice, Delta::new().insert(i.to_string()));
        }

        // Only the newest `capacity` operations survive.
        assert_eq!(bob.recv().await, Some(Delta::new().insert("3")));
        assert_eq!(bob.recv().await, Some(Delta::new().insert("4")));

        let stats = group.stats();
        assert_eq!(stats.operations_relayed, 5);
        assert_eq!(stats.operations_dropped, 3);
    }

    #[tokio::test]
    async fn test_stream_ends_when_group_dropped() {
        let group = RelayGroup::new(4);
        let mut stream = group.subscribe(Uuid::new_v4());
        drop(group);
        assert_eq!(stream.recv().await, None);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_operations() {
        let group = RelayGroup::new(4);
        group.relay(Uuid::new_v4(), Delta::new().insert("before"));
        let mut late = group.subscribe(Uuid::new_v4());
        assert_eq!(late.try_recv(), None);
        assert_eq!(group.receiver_count(), 1);
        assert_eq!(group.capacity(), 4);
    }
}
