//! In-memory block store
//!
//! Thread-safe via `DashMap`. Not persistent; data is lost on drop.

use super::{not_found, BlockStore, StoreStats};
use crate::chunk::Fingerprint;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<Fingerprint, Bytes>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.blocks.contains_key(fingerprint))
    }

    async fn put_if_absent(&self, fingerprint: &Fingerprint, data: Bytes) -> Result<bool> {
        // The entry holds the shard lock, so check-and-insert is atomic
        match self.blocks.entry(*fingerprint) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(data);
                Ok(true)
            }
        }
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Bytes> {
        self.blocks
            .get(fingerprint)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(fingerprint))
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        Ok(self.blocks.remove(fingerprint).is_some())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for entry in self.blocks.iter() {
            stats.block_count += 1;
            stats.stored_bytes += entry.value().len() as u64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{exercise_concurrent_put, exercise_contract};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_contract() {
        exercise_contract(Arc::new(MemoryBlockStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_put_if_absent() {
        exercise_concurrent_put(Arc::new(MemoryBlockStore::new())).await;
    }

    #[tokio::test]
    async fn test_len() {
        let store = MemoryBlockStore::new();
        assert!(store.is_empty());

        let data = Bytes::from_static(b"block");
        store
            .put_if_absent(&crate::chunk::hash(&data), data)
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
    }
}
