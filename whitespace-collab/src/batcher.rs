//! Periodic snapshot persistence.
//!
//! Each active room gets one task that wakes every `flush_interval` and writes
//! the room's current snapshot if anything changed since the last write.
//! Edits between two ticks coalesce into a single write of the latest state.
//! A failed write is logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::room::{Room, RoomPhase};
use crate::storage::{SnapshotStore, StoreError};

/// Spawn the flush loop for `room`. It ends when the room leaves `Active`.
pub(crate) fn spawn(
    room: Arc<Room>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut phase = room.watch_phase();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        loop {
            if *phase.borrow_and_update() != RoomPhase::Active {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = flush(&room, &store).await {
                        log::warn!("Periodic flush of {} failed: {e}", room.id);
                    }
                }
                changed = phase.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::debug!("Batcher for {} stopped", room.id);
    })
}

/// Write the room snapshot if it is dirty. Returns whether a write happened.
///
/// Flushes of one room are serialized: a caller waits for the write in
/// progress, then writes whatever is newer. The store call runs on the
/// blocking pool so a slow disk never stalls the runtime.
pub(crate) async fn flush(
    room: &Room,
    store: &Arc<dyn SnapshotStore>,
) -> Result<bool, StoreError> {
    let _flush = room.flush_lock.lock().await;

    let (snapshot, version) = {
        let state = room.state.lock().await;
        if !state.is_dirty() {
            return Ok(false);
        }
        (state.buffer.snapshot(), state.version)
    };

    let writer = store.clone();
    let id = room.id.clone();
    tokio::task::spawn_blocking(move || writer.save_snapshot(&id, &snapshot))
        .await
        .map_err(|e| StoreError::Unavailable(format!("snapshot write aborted: {e}")))??;

    let mut state = room.state.lock().await;
    state.persisted_version = state.persisted_version.max(version);
    log::trace!("Flushed {} at version {version}", room.id);
    Ok(true)
}

/// Final flush for a draining room, bounded by `timeout`.
pub(crate) async fn drain(
    room: &Room,
    store: &Arc<dyn SnapshotStore>,
    timeout: Duration,
) -> Result<Result<bool, StoreError>, tokio::time::error::Elapsed> {
    tokio::time::timeout(timeout, flush(room, store)).await
}
