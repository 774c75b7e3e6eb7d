//! sled-backed file index
//!
//! Records are bincode-encoded in the `files` tree under their big-endian
//! id, so tree iteration order is creation order.

use super::{not_found, FileIndex, FileRecord, NewFileRecord, FILES_TREE};
use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

pub struct SledFileIndex {
    db: sled::Db,
    tree: sled::Tree,
    max_block_size: Option<usize>,
}

impl SledFileIndex {
    /// Use the files tree of an open database
    pub fn new(db: &sled::Db, max_block_size: Option<usize>) -> Result<Self> {
        let tree = db.open_tree(FILES_TREE)?;
        Ok(SledFileIndex {
            db: db.clone(),
            tree,
            max_block_size,
        })
    }

    fn decode(value: &[u8]) -> Result<FileRecord> {
        Ok(bincode::deserialize(value)?)
    }
}

#[async_trait]
impl FileIndex for SledFileIndex {
    async fn create(&self, record: NewFileRecord) -> Result<FileRecord> {
        record.validate(self.max_block_size)?;

        // sled ids start at zero; file ids start at one
        let id = self.db.generate_id()? + 1;
        let record = record.into_record(id);
        let value = bincode::serialize(&record)?;

        self.tree.insert(id.to_be_bytes(), value)?;
        self.tree.flush_async().await?;

        debug!("Indexed file {} as id {}", record.file_name, id);
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<FileRecord>> {
        self.tree
            .iter()
            .values()
            .map(|value| Self::decode(&value?))
            .collect()
    }

    async fn get(&self, id: u64) -> Result<FileRecord> {
        match self.tree.get(id.to_be_bytes())? {
            Some(value) => Self::decode(&value),
            None => Err(not_found(id)),
        }
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.tree.len())
    }
}
