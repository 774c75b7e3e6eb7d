//! BitStore - content-addressable block storage
//!
//! Files are split into fixed-size blocks, each block is stored once under
//! its BLAKE3 fingerprint, and a file index maps every file to the ordered
//! list of fingerprints that rebuild it.

pub mod chunk;
pub mod config;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod service;
pub mod store;
pub mod upload;

pub use config::Config;
pub use error::{Error, Result};
pub use service::{BitStore, StoreStatus};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::chunk::{Chunker, Fingerprint};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::index::{FileIndex, FileRecord};
    pub use crate::pipeline::{CancelHandle, NoProgress, ProgressObserver};
    pub use crate::service::{BitStore, StoreStatus};
    pub use crate::store::BlockStore;
    pub use crate::upload::{BatchStatus, UploadQueue};
}
