//! Byte sources that can be queued for upload

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// Boxed reader handed to the ingest pipeline
pub type SourceReader = Box<dyn AsyncRead + Send + Unpin>;

/// Something that can be opened as a byte stream and uploaded
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// File name the record will carry
    fn name(&self) -> &str;

    /// Expected length, used only for progress
    fn size_hint(&self) -> Option<u64>;

    /// Open a fresh reader over the content
    async fn open(&self) -> Result<SourceReader>;
}

/// A file on the local filesystem
#[derive(Debug, Clone)]
pub struct PathSource {
    path: PathBuf,
    name: String,
    size: Option<u64>,
}

impl PathSource {
    /// Describe the file at `path`
    ///
    /// The name is the path's final component. Fails if the path does not
    /// name a regular file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(Error::SourceRead)?;
        if !metadata.is_file() {
            return Err(Error::InvalidRecord(format!("{:?} is not a regular file", path)));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidRecord(format!("{:?} has no file name", path)))?;

        Ok(PathSource {
            path,
            name,
            size: Some(metadata.len()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UploadSource for PathSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_hint(&self) -> Option<u64> {
        self.size
    }

    async fn open(&self) -> Result<SourceReader> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(Error::SourceRead)?;
        Ok(Box::new(file))
    }
}

/// Content already held in memory
#[derive(Debug, Clone)]
pub struct BytesSource {
    name: String,
    data: Bytes,
}

impl BytesSource {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        BytesSource {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl UploadSource for BytesSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    async fn open(&self) -> Result<SourceReader> {
        Ok(Box::new(Cursor::new(self.data.clone())))
    }
}
