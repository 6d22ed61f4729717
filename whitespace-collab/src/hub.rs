//! Session hub: rooms, membership, apply-and-relay, persistence lifecycle.
//!
//! ```text
//! SessionHub
//!   ├── rooms: RwLock<HashMap<DocumentId, Arc<Room>>>   (lookup/insert/remove only)
//!   └── Room
//!         ├── Mutex<RoomState>  buffer + clients + versions
//!         ├── RelayGroup        ordered fan-out
//!         └── batcher task      periodic snapshot writes
//! ```
//!
//! Room lifecycle: absent → `Loading` → `Active` → `Draining` → `Closed`
//! (removed). The first joiner creates the room and loads it while holding
//! the room lock, so later joiners block until the snapshot is ready. A join
//! that lands on a draining room waits for it to close and then loads the
//! freshly persisted record.
//!
//! The hub has no transport dependency; [`crate::server`] drives it from
//! WebSocket connections and tests drive it directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use whitespace_core::Delta;

use crate::batcher;
use crate::protocol::{ClientId, DocumentId};
use crate::relay::ChangeStream;
use crate::room::{Room, RoomPhase};
use crate::storage::{DocumentRecord, SnapshotStore, StoreError};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Period of the persistence batcher (default: 500ms)
    pub flush_interval: Duration,
    /// Upper bound on the final flush when a room empties (default: 5s)
    pub drain_timeout: Duration,
    /// Operations buffered per receiver before a slow editor drops some
    pub relay_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(500),
            drain_timeout: Duration::from_secs(5),
            relay_capacity: 1024,
        }
    }
}

impl HubConfig {
    pub fn for_testing() -> Self {
        Self {
            flush_interval: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(1),
            relay_capacity: 64,
        }
    }
}

/// Result of a successful join.
pub struct JoinedRoom {
    pub document_id: DocumentId,
    /// Document content at the moment of joining.
    pub snapshot: Delta,
    /// Operations from other editors applied after `snapshot`.
    pub changes: ChangeStream,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub rooms_opened: u64,
    pub rooms_closed: u64,
    pub joins: u64,
    pub operations_applied: u64,
    /// Operations the buffer could not apply (still relayed).
    pub operations_rejected: u64,
    pub drain_failures: u64,
}

#[derive(Default)]
struct HubCounters {
    rooms_opened: AtomicU64,
    rooms_closed: AtomicU64,
    joins: AtomicU64,
    operations_applied: AtomicU64,
    operations_rejected: AtomicU64,
    drain_failures: AtomicU64,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Invalid document ID")]
    InvalidDocumentId(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Client {client} has not joined {document}")]
    NotJoined { document: DocumentId, client: ClientId },
    #[error("No open room for {0}")]
    RoomNotFound(DocumentId),
    #[error("Final flush of {0} timed out")]
    DrainTimeout(DocumentId),
}

pub struct SessionHub {
    config: HubConfig,
    store: Arc<dyn SnapshotStore>,
    rooms: RwLock<HashMap<DocumentId, Arc<Room>>>,
    counters: HubCounters,
}

impl SessionHub {
    pub fn new(config: HubConfig, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            config,
            store,
            rooms: RwLock::new(HashMap::new()),
            counters: HubCounters::default(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add `client` to the room for `document_id`, opening the room if needed.
    ///
    /// The returned snapshot and change stream are taken under the same room
    /// lock: every operation is either in the snapshot or delivered on the
    /// stream, never both.
    pub async fn join(&self, document_id: &str, client: ClientId) -> Result<JoinedRoom, HubError> {
        let id = DocumentId::parse(document_id)
            .map_err(|_| HubError::InvalidDocumentId(document_id.to_string()))?;

        loop {
            let (room, loading) = {
                let mut rooms = self.rooms.write().await;
                match rooms.get(&id) {
                    Some(room) => (room.clone(), None),
                    None => {
                        let room = Arc::new(Room::new(id.clone(), self.config.relay_capacity));
                        // Lock before publishing so joiners wait for the load.
                        let guard = room.state.clone().lock_owned().await;
                        rooms.insert(id.clone(), room.clone());
                        (room, Some(guard))
                    }
                }
            };

            let mut state = match loading {
                Some(mut state) => {
                    self.counters.rooms_opened.fetch_add(1, Ordering::Relaxed);
                    match self.load_or_create(&id) {
                        Ok(record) => match state.buffer.load(&record.content) {
                            Ok(()) => {
                                room.set_phase(RoomPhase::Active);
                                batcher::spawn(
                                    room.clone(),
                                    self.store.clone(),
                                    self.config.flush_interval,
                                );
                                log::info!("Opened room {id} ({} units)", state.buffer.len());
                                state
                            }
                            Err(e) => {
                                drop(state);
                                self.abandon(&room).await;
                                return Err(StoreError::Deserialization(e.to_string()).into());
                            }
                        },
                        Err(e) => {
                            log::error!("Failed to load {id}: {e}");
                            drop(state);
                            self.abandon(&room).await;
                            return Err(e.into());
                        }
                    }
                }
                None => {
                    let state = room.state.clone().lock_owned().await;
                    if room.phase() != RoomPhase::Active {
                        drop(state);
                        room.closed().await;
                        continue;
                    }
                    state
                }
            };

            state.clients.insert(client);
            let changes = room.relay.subscribe(client);
            let snapshot = state.buffer.snapshot();
            self.counters.joins.fetch_add(1, Ordering::Relaxed);
            log::debug!("Client {client} joined {id} ({} in room)", state.clients.len());

            return Ok(JoinedRoom { document_id: id, snapshot, changes });
        }
    }

    /// Remove `client` from the room. The last leaver drains the room: the
    /// final flush runs, then the room is discarded.
    pub async fn leave(&self, id: &DocumentId, client: ClientId) -> Result<(), HubError> {
        let room = self.room(id).await?;
        {
            let mut state = room.state.lock().await;
            if !state.clients.remove(&client) {
                return Err(HubError::NotJoined { document: id.clone(), client });
            }
            log::debug!("Client {client} left {id} ({} in room)", state.clients.len());
            if !state.clients.is_empty() {
                return Ok(());
            }
            room.set_phase(RoomPhase::Draining);
        }

        let drained = batcher::drain(&room, &self.store, self.config.drain_timeout).await;

        self.remove(&room).await;
        room.set_phase(RoomPhase::Closed);
        self.counters.rooms_closed.fetch_add(1, Ordering::Relaxed);

        match drained {
            Ok(Ok(_)) => {
                log::info!("Closed room {id}");
                Ok(())
            }
            Ok(Err(e)) => {
                self.counters.drain_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Final flush of {id} failed, unsaved edits lost: {e}");
                Err(e.into())
            }
            Err(_) => {
                self.counters.drain_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("Final flush of {id} timed out, unsaved edits lost");
                Err(HubError::DrainTimeout(id.clone()))
            }
        }
    }

    /// Apply `operation` to the room buffer and relay it to every other
    /// editor. Relay order equals the order operations reach the room lock.
    ///
    /// Returns the number of live receivers, the sender included.
    pub async fn apply_and_relay(
        &self,
        id: &DocumentId,
        from: ClientId,
        operation: Delta,
    ) -> Result<usize, HubError> {
        let room = self.room(id).await?;
        let mut state = room.state.lock().await;
        if !state.clients.contains(&from) {
            return Err(HubError::NotJoined { document: id.clone(), client: from });
        }

        if let Err(e) = state.buffer.apply(&operation) {
            self.counters.operations_rejected.fetch_add(1, Ordering::Relaxed);
            log::warn!("Operation from {from} on {id} did not apply cleanly: {e}");
        }
        state.version += 1;
        self.counters.operations_applied.fetch_add(1, Ordering::Relaxed);

        Ok(room.relay.relay(from, operation))
    }

    /// Persist the room snapshot now if it changed. Returns whether a write
    /// happened.
    pub async fn flush(&self, id: &DocumentId) -> Result<bool, HubError> {
        let room = self.room(id).await?;
        Ok(batcher::flush(&room, &self.store).await?)
    }

    /// Flush every open room, e.g. on shutdown. Returns the number of failures.
    pub async fn flush_all(&self) -> usize {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();
        let mut failures = 0;
        for room in rooms {
            if let Err(e) = batcher::flush(&room, &self.store).await {
                log::error!("Flush of {} failed: {e}", room.id);
                failures += 1;
            }
        }
        failures
    }

    pub async fn room_phase(&self, id: &DocumentId) -> Option<RoomPhase> {
        self.rooms.read().await.get(id).map(|room| room.phase())
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn client_count(&self, id: &DocumentId) -> usize {
        match self.room(id).await {
            Ok(room) => room.state.lock().await.clients.len(),
            Err(_) => 0,
        }
    }

    /// Current content of an open room.
    pub async fn snapshot(&self, id: &DocumentId) -> Result<Delta, HubError> {
        let room = self.room(id).await?;
        let state = room.state.lock().await;
        Ok(state.buffer.snapshot())
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            rooms_opened: self.counters.rooms_opened.load(Ordering::Relaxed),
            rooms_closed: self.counters.rooms_closed.load(Ordering::Relaxed),
            joins: self.counters.joins.load(Ordering::Relaxed),
            operations_applied: self.counters.operations_applied.load(Ordering::Relaxed),
            operations_rejected: self.counters.operations_rejected.load(Ordering::Relaxed),
            drain_failures: self.counters.drain_failures.load(Ordering::Relaxed),
        }
    }

    async fn room(&self, id: &DocumentId) -> Result<Arc<Room>, HubError> {
        self.rooms
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HubError::RoomNotFound(id.clone()))
    }

    fn load_or_create(&self, id: &DocumentId) -> Result<DocumentRecord, StoreError> {
        if let Some(record) = self.store.load(id)? {
            if !record.content.is_insert_only() {
                return Err(StoreError::Deserialization(format!(
                    "stored content of {id} is not a snapshot"
                )));
            }
            return Ok(record);
        }
        let record = DocumentRecord::new(id.clone());
        self.store.create(&record)?;
        log::info!("Created document {id}");
        Ok(record)
    }

    /// Close a room whose load failed so waiting joiners retry.
    async fn abandon(&self, room: &Arc<Room>) {
        self.remove(room).await;
        room.set_phase(RoomPhase::Closed);
        self.counters.rooms_closed.fetch_add(1, Ordering::Relaxed);
    }

    async fn remove(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(&room.id).is_some_and(|current| Arc::ptr_eq(current, room)) {
            rooms.remove(&room.id);
        }
    }
}
