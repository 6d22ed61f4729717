//! Durable document records.
//!
//! ```text
//! ┌─────────────┐  load / create   ┌──────────────────┐
//! │ SessionHub  │ ───────────────► │ SnapshotStore    │
//! │ (rooms)     │                  │  ├ RocksStore    │
//! └──────┬──────┘                  │  └ MemoryStore   │
//!        │ save_snapshot           └──────────────────┘
//!        ▼  (batched, last snapshot wins)
//! ```
//!
//! One record per document id. Only the latest snapshot is kept; no
//! operation log is persisted.

pub mod memory;
pub mod rocks;

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use whitespace_core::Delta;

use crate::protocol::DocumentId;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

/// Title given to documents created on first join.
pub const DEFAULT_TITLE: &str = "Untitled Document";

/// The persisted state of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub title: String,
    /// Insert-only snapshot of the content.
    pub content: Delta,
    pub owner: Option<String>,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub updated_at: u64,
}

impl DocumentRecord {
    /// Empty document with the default title.
    pub fn new(id: DocumentId) -> Self {
        let now = unix_now();
        Self {
            id,
            title: DEFAULT_TITLE.to_string(),
            content: Delta::new(),
            owner: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage backend used by the hub.
///
/// Calls are synchronous. The hub runs writes on the blocking pool and
/// serializes them per document.
pub trait SnapshotStore: Send + Sync {
    /// Load a record, `Ok(None)` when the document does not exist.
    fn load(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, StoreError>;

    /// Persist a newly created record.
    fn create(&self, record: &DocumentRecord) -> Result<(), StoreError>;

    /// Overwrite the stored content of `id`, creating the record if needed.
    fn save_snapshot(&self, id: &DocumentId, content: &Delta) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
