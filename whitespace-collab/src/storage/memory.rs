//! In-memory store for running without a data directory and for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use whitespace_core::Delta;

use super::{unix_now, DocumentRecord, SnapshotStore, StoreError};
use crate::protocol::DocumentId;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<DocumentId, DocumentRecord>>,
    snapshot_writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_snapshot` calls served so far.
    pub fn snapshot_writes(&self) -> u64 {
        self.snapshot_writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().map_or(0, |records| records.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current stored record, if any.
    pub fn get(&self, id: &DocumentId) -> Option<DocumentRecord> {
        self.lock().ok()?.get(id).cloned()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<DocumentId, DocumentRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn create(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        self.lock()?.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn save_snapshot(&self, id: &DocumentId, content: &Delta) -> Result<(), StoreError> {
        let mut records = self.lock()?;
        let record = records
            .entry(id.clone())
            .or_insert_with(|| DocumentRecord::new(id.clone()));
        record.content = content.clone();
        record.updated_at = unix_now();
        self.snapshot_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
