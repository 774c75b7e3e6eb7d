//! sled-backed block store
//!
//! Blocks live in a dedicated tree keyed by raw fingerprint bytes.
//! `compare_and_swap` from an absent value is the atomic put-if-absent.

use super::{not_found, BlockStore, StoreStats, BLOCKS_TREE};
use crate::chunk::Fingerprint;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use tracing::debug;

pub struct SledBlockStore {
    tree: sled::Tree,
}

impl SledBlockStore {
    /// Use the blocks tree of an open database
    pub fn new(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(BLOCKS_TREE)?;
        Ok(Self { tree })
    }

    /// Open (or create) a database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        Self::new(&db)
    }
}

#[async_trait]
impl BlockStore for SledBlockStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.tree.contains_key(fingerprint.as_bytes())?)
    }

    async fn put_if_absent(&self, fingerprint: &Fingerprint, data: Bytes) -> Result<bool> {
        let swapped = self.tree.compare_and_swap(
            fingerprint.as_bytes(),
            None as Option<&[u8]>,
            Some(&data[..]),
        )?;

        match swapped {
            Ok(()) => {
                self.tree.flush_async().await?;
                Ok(true)
            }
            Err(_) => {
                debug!("Block {} already present", fingerprint);
                Ok(false)
            }
        }
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Bytes> {
        match self.tree.get(fingerprint.as_bytes())? {
            Some(value) => Ok(Bytes::copy_from_slice(&value)),
            None => Err(not_found(fingerprint)),
        }
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.tree.remove(fingerprint.as_bytes())?.is_some())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for item in self.tree.iter() {
            let (_, value) = item?;
            stats.block_count += 1;
            stats.stored_bytes += value.len() as u64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_concurrent_put, exercise_contract};
    use std::sync::Arc;

    fn temp_db() -> sled::Db {
        sled::Config::new()
            .temporary(true)
            .open()
            .expect("Failed to open database")
    }

    #[tokio::test]
    async fn test_contract() {
        let store = SledBlockStore::new(&temp_db()).unwrap();
        exercise_contract(Arc::new(store)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_if_absent() {
        let store = SledBlockStore::new(&temp_db()).unwrap();
        exercise_concurrent_put(Arc::new(store)).await;
    }
}
