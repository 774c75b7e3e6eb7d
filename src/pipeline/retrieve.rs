//! Retrieval pipeline
//!
//! Reconstructs a file from its record by fetching blocks in order.
//! Retrieval fails closed: callers receive either the complete, verified
//! byte sequence or an error, never a prefix.

use super::progress::CancelHandle;
use crate::chunk::{self, Fingerprint};
use crate::error::{Error, Result};
use crate::index::{FileIndex, FileRecord};
use crate::store::BlockStore;
use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Reassembles stored files
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn BlockStore>,
    index: Arc<dyn FileIndex>,
}

impl Retriever {
    pub fn new(store: Arc<dyn BlockStore>, index: Arc<dyn FileIndex>) -> Self {
        Retriever { store, index }
    }

    /// Reconstruct file `id` in memory
    pub async fn fetch(&self, id: u64, cancel: &CancelHandle) -> Result<Bytes> {
        let record = self.index.get(id).await?;
        let mut out = BytesMut::with_capacity(record.size as usize);

        for (position, fingerprint) in record.block_hashes.iter().enumerate() {
            cancel.check()?;
            let block = self.fetch_block(&record, position, fingerprint).await?;
            out.extend_from_slice(&block);
            check_not_oversized(&record, out.len() as u64)?;
        }

        check_complete(&record, out.len() as u64)?;
        info!("Retrieved file {} ({} bytes)", record.id, record.size);
        Ok(out.freeze())
    }

    /// Reconstruct file `id` into `dest`
    ///
    /// Blocks are streamed into a temp file beside `dest`, which is only
    /// renamed into place once the whole file verified. On error `dest`
    /// is left untouched.
    pub async fn write_to(&self, id: u64, dest: &Path, cancel: &CancelHandle) -> Result<u64> {
        let record = self.index.get(id).await?;
        let tmp = partial_path(dest);

        let result = match self.write_blocks(&record, &tmp, cancel).await {
            Ok(written) => fs::rename(&tmp, dest)
                .await
                .map(|()| written)
                .map_err(Error::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(written) => {
                info!("Retrieved file {} into {:?} ({} bytes)", record.id, dest, written);
                Ok(written)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&tmp).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {:?}: {}", tmp, rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn write_blocks(&self, record: &FileRecord, tmp: &Path, cancel: &CancelHandle) -> Result<u64> {
        let mut file = fs::File::create(tmp).await?;
        let mut written = 0u64;

        for (position, fingerprint) in record.block_hashes.iter().enumerate() {
            cancel.check()?;
            let block = self.fetch_block(record, position, fingerprint).await?;
            written += block.len() as u64;
            check_not_oversized(record, written)?;
            file.write_all(&block).await?;
        }

        check_complete(record, written)?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Fetch one block and confirm it still matches its fingerprint
    async fn fetch_block(
        &self,
        record: &FileRecord,
        position: usize,
        fingerprint: &Fingerprint,
    ) -> Result<Bytes> {
        let data = match self.store.get(fingerprint).await {
            Ok(data) => data,
            Err(Error::NotFound(_)) => {
                return Err(corrupt(
                    record,
                    format!("block {} ({}) is missing from the store", position, fingerprint),
                ))
            }
            Err(e) => return Err(e),
        };

        if chunk::hash(&data) != *fingerprint {
            return Err(corrupt(
                record,
                format!("block {} ({}) does not match its fingerprint", position, fingerprint),
            ));
        }

        Ok(data)
    }
}

fn corrupt(record: &FileRecord, reason: String) -> Error {
    warn!("File {} is corrupt: {}", record.id, reason);
    Error::CorruptIndex {
        id: record.id,
        reason,
    }
}

fn check_not_oversized(record: &FileRecord, so_far: u64) -> Result<()> {
    if so_far > record.size {
        return Err(corrupt(
            record,
            format!("blocks hold more than the recorded {} bytes", record.size),
        ));
    }
    Ok(())
}

fn check_complete(record: &FileRecord, total: u64) -> Result<()> {
    if total != record.size {
        return Err(corrupt(
            record,
            format!("blocks hold {} bytes, record says {}", total, record.size),
        ));
    }
    Ok(())
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{}.{}.part", name, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunker;
    use crate::index::{MemoryFileIndex, NewFileRecord};
    use crate::pipeline::ingest::Ingestor;
    use crate::pipeline::progress::NoProgress;
    use crate::store::MemoryBlockStore;
    use std::io::Cursor;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<MemoryBlockStore>,
        index: Arc<MemoryFileIndex>,
        ingestor: Ingestor,
        retriever: Retriever,
    }

    fn fixture(block_size: usize) -> Fixture {
        let store = Arc::new(MemoryBlockStore::new());
        let index = Arc::new(MemoryFileIndex::default());
        Fixture {
            ingestor: Ingestor::new(store.clone(), index.clone(), Chunker::new(block_size).unwrap()),
            retriever: Retriever::new(store.clone(), index.clone()),
            store,
            index,
        }
    }

    async fn put(f: &Fixture, name: &str, data: &[u8]) -> FileRecord {
        f.ingestor
            .ingest(name, Cursor::new(data.to_vec()), None, &NoProgress, &CancelHandle::new())
            .await
            .unwrap()
            .record
    }

    #[tokio::test]
    async fn test_roundtrip_sizes() {
        let f = fixture(1024);
        for len in [0usize, 1, 1023, 1024, 1025, 4096, 5000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + len) as u8).collect();
            let record = put(&f, "file", &data).await;
            let fetched = f.retriever.fetch(record.id, &CancelHandle::new()).await.unwrap();
            assert_eq!(fetched, data, "length {}", len);
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let f = fixture(1024);
        let result = f.retriever.fetch(42, &CancelHandle::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_missing_block_is_corrupt_index() {
        let f = fixture(1024);
        let data: Vec<u8> = (0..3000u32).map(|i| (i % 253) as u8).collect();
        let record = put(&f, "victim", &data).await;

        f.store.remove(&record.block_hashes[1]).await.unwrap();

        let result = f.retriever.fetch(record.id, &CancelHandle::new()).await;
        assert!(matches!(result, Err(Error::CorruptIndex { id, .. }) if id == record.id));
    }

    #[tokio::test]
    async fn test_stale_size_is_corrupt_index() {
        let f = fixture(1024);
        let data = vec![3u8; 100];
        let fp = chunk::hash(&data);
        f.store.put_if_absent(&fp, Bytes::from(data)).await.unwrap();

        // Record claims more bytes than its block holds
        let record = f
            .index
            .create(NewFileRecord::new("stale", 150, vec![fp]))
            .await
            .unwrap();

        let result = f.retriever.fetch(record.id, &CancelHandle::new()).await;
        assert!(matches!(result, Err(Error::CorruptIndex { .. })));
    }

    #[tokio::test]
    async fn test_tampered_block_is_corrupt_index() {
        let f = fixture(1024);
        let fp = chunk::hash(b"original bytes");
        f.store
            .put_if_absent(&fp, Bytes::from_static(b"tampered bytes"))
            .await
            .unwrap();
        let record = f
            .index
            .create(NewFileRecord::new("tampered", 14, vec![fp]))
            .await
            .unwrap();

        let result = f.retriever.fetch(record.id, &CancelHandle::new()).await;
        assert!(matches!(result, Err(Error::CorruptIndex { .. })));
    }

    #[tokio::test]
    async fn test_write_to_path() {
        let f = fixture(1024);
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 241) as u8).collect();
        let record = put(&f, "out.bin", &data).await;

        let dest = dir.path().join("out.bin");
        let written = f
            .retriever
            .write_to(record.id, &dest, &CancelHandle::new())
            .await
            .unwrap();

        assert_eq!(written, 5000);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_to_leaves_no_file() {
        let f = fixture(1024);
        let dir = TempDir::new().unwrap();
        let data = vec![9u8; 4000];
        let record = put(&f, "doomed.bin", &[data.clone(), vec![1u8; 10]].concat()).await;
        f.store.remove(&record.block_hashes[3]).await.unwrap();

        let dest = dir.path().join("doomed.bin");
        let result = f.retriever.write_to(record.id, &dest, &CancelHandle::new()).await;

        assert!(matches!(result, Err(Error::CorruptIndex { .. })));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_no_partial_file() {
        let f = fixture(1024);
        let dir = TempDir::new().unwrap();
        let record = put(&f, "blocked.bin", &[5u8; 3000]).await;

        // A non-empty directory at the destination makes the rename fail
        let dest = dir.path().join("blocked.bin");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("occupant"), b"x").unwrap();

        let result = f.retriever.write_to(record.id, &dest, &CancelHandle::new()).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(dest.is_dir());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_fetch() {
        let f = fixture(1024);
        let record = put(&f, "file", &[1u8; 2048]).await;
        let cancel = CancelHandle::new();
        cancel.cancel();

        let result = f.retriever.fetch(record.id, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
