//! BitStore service
//!
//! Wires a block store, a file index and the pipelines together behind
//! the operations clients use: upload, list, inspect, download.

use crate::chunk::Chunker;
use crate::config::{Config, IndexBackend, StorageBackend};
use crate::error::Result;
use crate::index::{self, FileIndex, FileRecord, MemoryFileIndex};
use crate::pipeline::{CancelHandle, IngestOutcome, Ingestor, ProgressObserver, Retriever};
use crate::store::{self, BlockStore, MemoryBlockStore};
use crate::upload::{BatchReport, UploadQueue};
use bytes::Bytes;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::info;

/// Storage usage summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    /// Stored files
    pub files: u64,
    /// Distinct blocks
    pub blocks: u64,
    /// Bytes the block store holds
    pub stored_bytes: u64,
    /// Sum of all file sizes
    pub logical_bytes: u64,
}

impl StoreStatus {
    /// Logical bytes per stored byte; 1.0 when nothing is stored
    pub fn dedup_ratio(&self) -> f64 {
        if self.stored_bytes == 0 {
            1.0
        } else {
            self.logical_bytes as f64 / self.stored_bytes as f64
        }
    }
}

/// Content-addressed file storage
pub struct BitStore {
    store: Arc<dyn BlockStore>,
    index: Arc<dyn FileIndex>,
    ingestor: Ingestor,
    retriever: Retriever,
    db: Option<sled::Db>,
}

impl BitStore {
    /// Open the backends named by `config`
    ///
    /// When both backends are sled they share one database.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        config.ensure_directories()?;

        let needs_db = config.storage.backend == StorageBackend::Sled
            || config.storage.index == IndexBackend::Sled;
        let db = if needs_db {
            Some(sled::open(config.db_path())?)
        } else {
            None
        };

        let store = store::open(config, db.as_ref())?;
        let index = index::open(config, db.as_ref())?;
        let chunker = Chunker::from_config(&config.block)?;

        info!(
            "Opened store at {:?} ({:?} blocks, {:?} index, {} byte blocks)",
            config.data_dir,
            config.storage.backend,
            config.storage.index,
            chunker.block_size()
        );

        let mut bitstore = Self::with_chunker(store, index, chunker);
        bitstore.db = db;
        Ok(bitstore)
    }

    /// Assemble a service from existing backends
    pub fn new(store: Arc<dyn BlockStore>, index: Arc<dyn FileIndex>, block_size: usize) -> Result<Self> {
        Ok(Self::with_chunker(store, index, Chunker::new(block_size)?))
    }

    /// Service backed entirely by process memory
    pub fn in_memory(block_size: usize) -> Result<Self> {
        Self::new(
            Arc::new(MemoryBlockStore::new()),
            Arc::new(MemoryFileIndex::new(Some(block_size))),
            block_size,
        )
    }

    fn with_chunker(store: Arc<dyn BlockStore>, index: Arc<dyn FileIndex>, chunker: Chunker) -> Self {
        BitStore {
            ingestor: Ingestor::new(store.clone(), index.clone(), chunker),
            retriever: Retriever::new(store.clone(), index.clone()),
            store,
            index,
            db: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.ingestor.chunker().block_size()
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Every stored file in creation order
    pub async fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.index.list().await
    }

    /// Look up one file's record
    pub async fn get_file(&self, id: u64) -> Result<FileRecord> {
        self.index.get(id).await
    }

    /// Store one byte stream as a new file
    pub async fn upload_file<R>(
        &self,
        name: &str,
        reader: R,
        size_hint: Option<u64>,
        observer: &dyn ProgressObserver,
    ) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin,
    {
        Ok(self
            .upload_file_with(name, reader, size_hint, observer, &CancelHandle::new())
            .await?
            .record)
    }

    /// Store one byte stream, with cancellation and block counts
    pub async fn upload_file_with<R>(
        &self,
        name: &str,
        reader: R,
        size_hint: Option<u64>,
        observer: &dyn ProgressObserver,
        cancel: &CancelHandle,
    ) -> Result<IngestOutcome>
    where
        R: AsyncRead + Unpin,
    {
        self.ingestor
            .ingest(name, reader, size_hint, observer, cancel)
            .await
    }

    /// Upload everything in `queue`
    pub async fn upload_batch(
        &self,
        queue: &UploadQueue,
        observer: &dyn ProgressObserver,
    ) -> Result<BatchReport> {
        queue.run(&self.ingestor, self.index.as_ref(), observer).await
    }

    /// Reconstruct a file in memory
    pub async fn download_file(&self, id: u64) -> Result<Bytes> {
        self.retriever.fetch(id, &CancelHandle::new()).await
    }

    /// Reconstruct a file at `path`, returning the bytes written
    pub async fn download_to_path<P: AsRef<Path>>(&self, id: u64, path: P) -> Result<u64> {
        self.retriever
            .write_to(id, path.as_ref(), &CancelHandle::new())
            .await
    }

    /// Current usage figures
    pub async fn stats(&self) -> Result<StoreStatus> {
        let records = self.index.list().await?;
        let store = self.store.stats().await?;

        Ok(StoreStatus {
            files: records.len() as u64,
            blocks: store.block_count,
            stored_bytes: store.stored_bytes,
            logical_bytes: records.iter().map(|r| r.size).sum(),
        })
    }

    /// Flush the shared database, if any
    pub async fn flush(&self) -> Result<()> {
        if let Some(ref db) = self.db {
            db.flush_async().await?;
        }
        Ok(())
    }
}
