//! Error types for BitStore

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the block engine
#[derive(Error, Debug)]
pub enum Error {
    /// A file id or block fingerprint is unknown
    #[error("Not found: {0}")]
    NotFound(String),

    /// Index metadata is inconsistent at creation time
    #[error("Invalid file record: {0}")]
    InvalidRecord(String),

    /// A stored file can no longer be reconstructed faithfully
    #[error("Corrupt index for file {id}: {reason}")]
    CorruptIndex { id: u64, reason: String },

    /// The persistence layer failed on read or write
    #[error("Storage fault: {0}")]
    StorageFault(String),

    /// The byte stream being ingested failed before completion
    #[error("Source read error: {0}")]
    SourceRead(#[source] std::io::Error),

    /// The caller aborted an in-flight operation
    #[error("Operation cancelled")]
    Cancelled,

    /// An upload batch is already running on this queue
    #[error("Upload batch already in progress")]
    BatchInProgress,

    #[error("Invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for `Cancelled`
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub(crate) fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Error::StorageFault(format!("{}: {}", context, err))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Error::StorageFault(format!("database: {}", err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
