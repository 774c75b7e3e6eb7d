//! File index
//!
//! Maps stored files to the ordered list of block fingerprints that make
//! them up. Records are created in one atomic write and never change
//! afterwards; a re-upload produces a new record with a new id.

mod database;
mod memory;

pub use database::SledFileIndex;
pub use memory::MemoryFileIndex;

use crate::chunk::Fingerprint;
use crate::config::{Config, IndexBackend};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the sled tree holding file records
pub const FILES_TREE: &str = "files";

/// A stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Unique id, increasing in creation order
    pub id: u64,
    /// Original file name
    pub file_name: String,
    /// Total original byte count
    pub size: u64,
    /// Block fingerprints in byte-offset order; may repeat
    pub block_hashes: Vec<Fingerprint>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn block_count(&self) -> usize {
        self.block_hashes.len()
    }
}

/// Everything needed to create a record; the index assigns the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub file_name: String,
    pub size: u64,
    pub block_hashes: Vec<Fingerprint>,
}

impl NewFileRecord {
    pub fn new(file_name: impl Into<String>, size: u64, block_hashes: Vec<Fingerprint>) -> Self {
        NewFileRecord {
            file_name: file_name.into(),
            size,
            block_hashes,
        }
    }

    /// Best-effort consistency check of the record's metadata
    ///
    /// Every block holds between 1 and `max_block_size` bytes, which bounds
    /// `size` by the block count. Exact lengths are reconciled by ingest.
    pub fn validate(&self, max_block_size: Option<usize>) -> Result<()> {
        if self.file_name.is_empty() {
            return Err(Error::InvalidRecord("file name is empty".to_string()));
        }

        let count = self.block_hashes.len() as u64;

        if count == 0 && self.size > 0 {
            return Err(Error::InvalidRecord(format!(
                "{}: {} bytes but no blocks",
                self.file_name, self.size
            )));
        }

        if self.size < count {
            return Err(Error::InvalidRecord(format!(
                "{}: {} blocks cannot hold only {} bytes",
                self.file_name, count, self.size
            )));
        }

        if let Some(max) = max_block_size {
            if self.size > count.saturating_mul(max as u64) {
                return Err(Error::InvalidRecord(format!(
                    "{}: {} bytes exceed {} blocks of {} bytes",
                    self.file_name, self.size, count, max
                )));
            }
        }

        Ok(())
    }

    pub(crate) fn into_record(self, id: u64) -> FileRecord {
        FileRecord {
            id,
            file_name: self.file_name,
            size: self.size,
            block_hashes: self.block_hashes,
            created_at: Utc::now(),
        }
    }
}

/// Storage of file records
#[async_trait]
pub trait FileIndex: Send + Sync {
    /// Validate and insert a record, assigning a fresh id
    async fn create(&self, record: NewFileRecord) -> Result<FileRecord>;

    /// All records in creation order
    async fn list(&self) -> Result<Vec<FileRecord>>;

    /// Look up a record by id
    ///
    /// Returns `Error::NotFound` if no record has this id.
    async fn get(&self, id: u64) -> Result<FileRecord>;

    /// Number of records
    async fn len(&self) -> Result<usize>;
}

pub(crate) fn not_found(id: u64) -> Error {
    Error::NotFound(format!("file {}", id))
}

/// Build the configured file index
pub fn open(config: &Config, db: Option<&sled::Db>) -> Result<Arc<dyn FileIndex>> {
    let max_block_size = Some(config.block.block_size);
    let index: Arc<dyn FileIndex> = match config.storage.index {
        IndexBackend::Memory => Arc::new(MemoryFileIndex::new(max_block_size)),
        IndexBackend::Sled => match db {
            Some(db) => Arc::new(SledFileIndex::new(db, max_block_size)?),
            None => Arc::new(SledFileIndex::new(&sled::open(config.db_path())?, max_block_size)?),
        },
    };
    Ok(index)
}
