//! Content-addressed block storage
//!
//! Blocks are keyed by their fingerprint and written at most once.
//! `put_if_absent` is the only deduplication mechanism: concurrent
//! writers of the same fingerprint race, exactly one persists the bytes.

mod database;
mod directory;
mod memory;

pub use database::SledBlockStore;
pub use directory::DirBlockStore;
pub use memory::MemoryBlockStore;

use crate::chunk::Fingerprint;
use crate::config::{Config, StorageBackend};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

/// Name of the sled tree holding blocks
pub const BLOCKS_TREE: &str = "blocks";

/// Block store usage figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of distinct blocks
    pub block_count: u64,
    /// Payload bytes held across all blocks, as stored (after any compression)
    pub stored_bytes: u64,
}

/// Content-addressed block storage
///
/// Blocks are immutable once written. Implementations must never expose
/// a block mid-write.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Check if a block exists
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Store a block unless one with this fingerprint is already present
    ///
    /// Returns `true` when this call performed the write.
    async fn put_if_absent(&self, fingerprint: &Fingerprint, data: Bytes) -> Result<bool>;

    /// Retrieve a block
    ///
    /// Returns `Error::NotFound` if the block doesn't exist.
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Bytes>;

    /// Drop a block, returning whether it was present
    ///
    /// Administrative only; the ingest and retrieval paths never delete.
    async fn remove(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Usage figures
    async fn stats(&self) -> Result<StoreStats>;
}

pub(crate) fn not_found(fingerprint: &Fingerprint) -> crate::Error {
    crate::Error::NotFound(format!("block {}", fingerprint))
}

/// Build the configured block store
///
/// The sled backend reuses `db` when given so blocks and records can
/// share one database.
pub fn open(config: &Config, db: Option<&sled::Db>) -> Result<Arc<dyn BlockStore>> {
    let store: Arc<dyn BlockStore> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryBlockStore::new()),
        StorageBackend::Sled => match db {
            Some(db) => Arc::new(SledBlockStore::new(db)?),
            None => Arc::new(SledBlockStore::open(config.db_path())?),
        },
        StorageBackend::Directory => Arc::new(
            DirBlockStore::new(config.blocks_dir())?.with_compression(
                config.block.compression_enabled,
                config.block.compression_threshold,
            ),
        ),
    };
    Ok(store)
}
