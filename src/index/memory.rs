//! In-memory file index

use super::{not_found, FileIndex, FileRecord, NewFileRecord};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// File index held in process memory
///
/// Id assignment and insertion happen under one write lock, so readers
/// never see a record before it is complete.
pub struct MemoryFileIndex {
    state: RwLock<IndexState>,
    max_block_size: Option<usize>,
}

struct IndexState {
    records: BTreeMap<u64, FileRecord>,
    next_id: u64,
}

impl MemoryFileIndex {
    pub fn new(max_block_size: Option<usize>) -> Self {
        MemoryFileIndex {
            state: RwLock::new(IndexState {
                records: BTreeMap::new(),
                next_id: 1,
            }),
            max_block_size,
        }
    }
}

impl Default for MemoryFileIndex {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl FileIndex for MemoryFileIndex {
    async fn create(&self, record: NewFileRecord) -> Result<FileRecord> {
        record.validate(self.max_block_size)?;

        let mut state = self.state.write();
        let record = record.into_record(state.next_id);
        state.next_id += 1;

        state.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<FileRecord>> {
        Ok(self.state.read().records.values().cloned().collect())
    }

    async fn get(&self, id: u64) -> Result<FileRecord> {
        self.state
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{exercise_concurrent_create, exercise_contract};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_contract() {
        exercise_contract(Arc::new(MemoryFileIndex::default())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create() {
        exercise_concurrent_create(Arc::new(MemoryFileIndex::default())).await;
    }

    #[tokio::test]
    async fn test_ids_start_at_one() {
        let index = MemoryFileIndex::default();
        let record = index
            .create(NewFileRecord::new("empty", 0, vec![]))
            .await
            .unwrap();
        assert_eq!(record.id, 1);
        assert_eq!(record.size, 0);
        assert!(record.block_hashes.is_empty());
    }
}
