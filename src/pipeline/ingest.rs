//! Ingest pipeline
//!
//! Streams one source through chunk -> hash -> put-if-absent and, once the
//! source is exhausted, creates the file record. Nothing becomes visible
//! in the index unless the whole stream was stored.

use super::progress::{CancelHandle, MonotonicProgress, ProgressObserver};
use crate::chunk::{Chunker, Fingerprint};
use crate::error::{Error, Result};
use crate::index::{FileIndex, FileRecord, NewFileRecord};
use crate::store::BlockStore;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};

/// Result of a successful ingest
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// The newly created record
    pub record: FileRecord,
    /// Blocks this ingest wrote to the store
    pub blocks_written: usize,
    /// Blocks that were already present
    pub blocks_deduplicated: usize,
}

/// Turns byte streams into durable file records
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn BlockStore>,
    index: Arc<dyn FileIndex>,
    chunker: Chunker,
}

impl Ingestor {
    pub fn new(store: Arc<dyn BlockStore>, index: Arc<dyn FileIndex>, chunker: Chunker) -> Self {
        Ingestor {
            store,
            index,
            chunker,
        }
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    /// Store `reader` as a new file named `file_name`
    ///
    /// `total_size` is only used for progress; the record's size is the
    /// byte count actually read. An empty `file_name` is rejected before
    /// any block is written.
    pub async fn ingest<R>(
        &self,
        file_name: &str,
        reader: R,
        total_size: Option<u64>,
        observer: &dyn ProgressObserver,
        cancel: &CancelHandle,
    ) -> Result<IngestOutcome>
    where
        R: AsyncRead + Unpin,
    {
        if file_name.is_empty() {
            return Err(Error::InvalidRecord("file name is empty".to_string()));
        }

        let mut progress = MonotonicProgress::new(observer);
        let mut blocks = self.chunker.split_async(reader);
        let mut hashes: Vec<Fingerprint> = Vec::new();
        let mut processed = 0u64;
        let mut blocks_written = 0;
        let mut blocks_deduplicated = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                next = blocks.next_block() => next,
            };

            let block = match next {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => {
                    warn!("Ingest of {} aborted after {} bytes: {}", file_name, processed, e);
                    return Err(e);
                }
            };

            cancel.check()?;
            let len = block.len() as u64;
            if self.store.put_if_absent(&block.fingerprint, block.data).await? {
                debug!("Stored block {} ({} bytes)", block.fingerprint, len);
                blocks_written += 1;
            } else {
                debug!("Deduplicated block {}", block.fingerprint);
                blocks_deduplicated += 1;
            }

            processed += len;
            hashes.push(block.fingerprint);

            let denominator = match total_size {
                Some(total) if total > 0 => total,
                _ => processed,
            };
            progress.report(processed as f64 / denominator as f64);
        }

        cancel.check()?;

        let record = self
            .index
            .create(NewFileRecord::new(file_name, processed, hashes))
            .await?;
        progress.report(1.0);

        info!(
            "Ingested {} as file {} ({} bytes, {} new blocks, {} deduplicated)",
            record.file_name, record.id, record.size, blocks_written, blocks_deduplicated
        );

        Ok(IngestOutcome {
            record,
            blocks_written,
            blocks_deduplicated,
        })
    }
}
