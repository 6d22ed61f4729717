//! Per-document room state.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use whitespace_core::RichText;

use crate::protocol::{ClientId, DocumentId};
use crate::relay::RelayGroup;

/// Lifecycle of a room. A room absent from the hub is "empty".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// First joiner is loading the record from storage.
    Loading,
    Active,
    /// Last client left; the final flush is running.
    Draining,
    /// Removed from the hub. Waiting joiners retry with a fresh room.
    Closed,
}

pub(crate) struct RoomState {
    pub buffer: RichText,
    pub clients: HashSet<ClientId>,
    /// Bumped on every applied operation.
    pub version: u64,
    /// Version covered by the last successful write.
    pub persisted_version: u64,
}

impl RoomState {
    pub fn is_dirty(&self) -> bool {
        self.version != self.persisted_version
    }
}

pub(crate) struct Room {
    pub id: DocumentId,
    pub state: Arc<Mutex<RoomState>>,
    /// Serializes periodic and drain flushes.
    pub flush_lock: Mutex<()>,
    pub relay: RelayGroup,
    phase: watch::Sender<RoomPhase>,
}

impl Room {
    pub fn new(id: DocumentId, relay_capacity: usize) -> Self {
        let (phase, _) = watch::channel(RoomPhase::Loading);
        Self {
            id,
            state: Arc::new(Mutex::new(RoomState {
                buffer: RichText::new(),
                clients: HashSet::new(),
                version: 0,
                persisted_version: 0,
            })),
            flush_lock: Mutex::new(()),
            relay: RelayGroup::new(relay_capacity),
            phase,
        }
    }

    pub fn phase(&self) -> RoomPhase {
        *self.phase.borrow()
    }

    pub fn set_phase(&self, phase: RoomPhase) {
        log::debug!("Room {} -> {phase:?}", self.id);
        self.phase.send_replace(phase);
    }

    pub fn watch_phase(&self) -> watch::Receiver<RoomPhase> {
        self.phase.subscribe()
    }

    /// Resolve once the room has been closed and removed from the hub.
    pub async fn closed(&self) {
        let mut rx = self.phase.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|phase| *phase == RoomPhase::Closed).await;
    }
}
