//! Local directory block store
//!
//! Stores each block as one file named by its fingerprint:
//! ```text
//! {root}/
//!   {hex[0..2]}/     # first byte of the fingerprint, for sharding
//!     {hex[2..]}     # rest of the fingerprint as filename
//!   tmp/             # in-flight writes
//! ```
//! A block is written to a private temp file, synced, then hard-linked
//! into place. Linking fails if the target exists, so of several racing
//! writers exactly one publishes, and readers only ever see whole files.

use super::{not_found, BlockStore, StoreStats};
use crate::chunk::{decode_block, encode_block, Fingerprint};
use crate::config::DEFAULT_COMPRESSION_THRESHOLD;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const TMP_DIR: &str = "tmp";

pub struct DirBlockStore {
    root: PathBuf,
    compression_enabled: bool,
    compression_threshold: usize,
}

impl DirBlockStore {
    /// Create storage at the given root directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            compression_enabled: false,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        })
    }

    /// Enable LZ4 compression for blocks at least `threshold` bytes long
    pub fn with_compression(mut self, enabled: bool, threshold: usize) -> Self {
        self.compression_enabled = enabled;
        self.compression_threshold = threshold;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn block_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hex = fingerprint.to_hex();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    async fn write_temp(&self, framed: &[u8]) -> Result<PathBuf> {
        let tmp = self
            .root
            .join(TMP_DIR)
            .join(format!("{}.tmp", uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&tmp)
            .await
            .map_err(|e| Error::storage("create temp block", e))?;
        file.write_all(framed)
            .await
            .map_err(|e| Error::storage("write temp block", e))?;
        file.sync_all()
            .await
            .map_err(|e| Error::storage("sync temp block", e))?;

        Ok(tmp)
    }

    async fn scan(&self) -> std::io::Result<StoreStats> {
        let mut stats = StoreStats::default();

        let mut shards = fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if shard.file_name() == TMP_DIR || !shard.file_type().await?.is_dir() {
                continue;
            }

            let mut blocks = fs::read_dir(shard.path()).await?;
            while let Some(block) = blocks.next_entry().await? {
                let len = block.metadata().await?.len();
                stats.block_count += 1;
                // One frame tag byte per block
                stats.stored_bytes += len.saturating_sub(1);
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl BlockStore for DirBlockStore {
    async fn exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
        fs::try_exists(self.block_path(fingerprint))
            .await
            .map_err(|e| Error::storage("stat block", e))
    }

    async fn put_if_absent(&self, fingerprint: &Fingerprint, data: Bytes) -> Result<bool> {
        let path = self.block_path(fingerprint);
        if self.exists(fingerprint).await? {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage("create shard directory", e))?;
        }

        let framed = encode_block(&data, self.compression_enabled, self.compression_threshold);
        let tmp = self.write_temp(&framed).await?;

        let linked = fs::hard_link(&tmp, &path).await;
        if let Err(e) = fs::remove_file(&tmp).await {
            warn!("Failed to remove temp block {:?}: {}", tmp, e);
        }

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Lost write race for block {}", fingerprint);
                Ok(false)
            }
            Err(e) => Err(Error::storage("publish block", e)),
        }
    }

    async fn get(&self, fingerprint: &Fingerprint) -> Result<Bytes> {
        match fs::read(self.block_path(fingerprint)).await {
            Ok(framed) => decode_block(&framed),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(fingerprint)),
            Err(e) => Err(Error::storage("read block", e)),
        }
    }

    async fn remove(&self, fingerprint: &Fingerprint) -> Result<bool> {
        match fs::remove_file(self.block_path(fingerprint)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage("remove block", e)),
        }
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.scan()
            .await
            .map_err(|e| Error::storage("scan blocks", e))
    }
}
