//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents`: content snapshots (Quill JSON, LZ4 compressed)
//! - `metadata`: title, owner, timestamps and sizes (bincode)
//!
//! Both are keyed by the document id bytes and written in one batch, so a
//! record is never half-updated.

use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use whitespace_core::Delta;

use super::{unix_now, DocumentRecord, SnapshotStore, StoreError};
use crate::protocol::DocumentId;

const CF_DOCUMENTS: &str = "documents";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every write batch (default: false)
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("whitespace_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, caller-provided directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Everything in a record except the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentMeta {
    title: String,
    owner: Option<String>,
    created_at: u64,
    updated_at: u64,
    snapshot_size: u64,
    compressed_size: u64,
}

impl DocumentMeta {
    fn from_record(record: &DocumentRecord) -> Self {
        Self {
            title: record.title.clone(),
            owner: record.owner.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
            snapshot_size: 0,
            compressed_size: 0,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

/// Durable [`SnapshotStore`] on RocksDB.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened document store at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);

        match name {
            // Values are already LZ4 compressed.
            CF_DOCUMENTS => opts.set_compression_type(DBCompressionType::None),
            _ => opts.set_compression_type(DBCompressionType::Lz4),
        }
        opts.optimize_for_point_lookup(config.block_cache_size as u64);

        opts
    }

    fn write(&self, id: &DocumentId, content: &Delta, meta: &mut DocumentMeta) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let json =
            serde_json::to_vec(content).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&json);
        meta.snapshot_size = json.len() as u64;
        meta.compressed_size = compressed.len() as u64;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_docs, id.as_bytes(), &compressed);
        batch.put_cf(cf_meta, id.as_bytes(), meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn load_meta(&self, id: &DocumentId) -> Result<Option<DocumentMeta>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        self.db
            .get_cf(cf, id.as_bytes())?
            .map(|bytes| DocumentMeta::decode(&bytes))
            .transpose()
    }

    fn load_content(&self, id: &DocumentId) -> Result<Delta, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(compressed) => {
                let json = lz4_flex::decompress_size_prepended(&compressed)
                    .map_err(|e| StoreError::Compression(e.to_string()))?;
                serde_json::from_slice(&json).map_err(|e| StoreError::Deserialization(e.to_string()))
            }
            None => Ok(Delta::new()),
        }
    }

    /// Ids of every stored document.
    pub fn list_documents(&self) -> Result<Vec<DocumentId>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let raw = std::str::from_utf8(&key)
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            match DocumentId::parse(raw) {
                Ok(id) => ids.push(id),
                Err(e) => log::warn!("Skipping malformed key in metadata: {e}"),
            }
        }
        Ok(ids)
    }

    /// Stored and compressed content sizes in bytes.
    pub fn snapshot_sizes(&self, id: &DocumentId) -> Result<Option<(u64, u64)>, StoreError> {
        Ok(self
            .load_meta(id)?
            .map(|meta| (meta.snapshot_size, meta.compressed_size)))
    }

    /// Force memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl SnapshotStore for RocksStore {
    fn load(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        let Some(meta) = self.load_meta(id)? else {
            return Ok(None);
        };
        let content = self.load_content(id)?;
        Ok(Some(DocumentRecord {
            id: id.clone(),
            title: meta.title,
            content,
            owner: meta.owner,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        }))
    }

    fn create(&self, record: &DocumentRecord) -> Result<(), StoreError> {
        let mut meta = DocumentMeta::from_record(record);
        self.write(&record.id, &record.content, &mut meta)
    }

    fn save_snapshot(&self, id: &DocumentId, content: &Delta) -> Result<(), StoreError> {
        let mut meta = match self.load_meta(id)? {
            Some(meta) => meta,
            None => DocumentMeta::from_record(&DocumentRecord::new(id.clone())),
        };
        meta.updated_at = unix_now();
        self.write(id, content, &mut meta)?;
        log::debug!(
            "Saved snapshot for {id}: {} bytes ({} compressed)",
            meta.snapshot_size,
            meta.compressed_size
        );
        Ok(())
    }
}

fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
