//! Configuration management for BitStore

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default block size: 1024 KB
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Largest accepted block size: 64 MB
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Default minimum block size worth compressing
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Block configuration
    pub block: BlockConfig,

    /// Storage backend configuration
    pub storage: StorageConfig,

    /// Path to the data directory
    pub data_dir: PathBuf,
}

/// Block configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Block size in bytes. Larger blocks mean fewer, coarser dedup granules;
    /// smaller blocks dedup more finely at higher per-block overhead.
    pub block_size: usize,

    /// Enable LZ4 compression of blocks at rest (directory backend)
    pub compression_enabled: bool,

    /// Minimum block size to compress (bytes)
    pub compression_threshold: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where block bytes live
    pub backend: StorageBackend,

    /// Where file records live
    pub index: IndexBackend,
}

/// Block store backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory, lost on exit
    Memory,
    /// sled database under `data_dir/db`
    Sled,
    /// One file per block under `data_dir/blocks`
    Directory,
}

/// File index backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Memory,
    Sled,
}

impl FromStr for StorageBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "sled" => Ok(StorageBackend::Sled),
            "directory" | "dir" => Ok(StorageBackend::Directory),
            other => Err(Error::InvalidConfig(format!("Unknown storage backend: {}", other))),
        }
    }
}

impl FromStr for IndexBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(IndexBackend::Memory),
            "sled" => Ok(IndexBackend::Sled),
            other => Err(Error::InvalidConfig(format!("Unknown index backend: {}", other))),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bitstore");

        Config {
            block: BlockConfig::default(),
            storage: StorageConfig::default(),
            data_dir,
        }
    }
}

impl Default for BlockConfig {
    fn default() -> Self {
        BlockConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            compression_enabled: false,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageBackend::Directory,
            index: IndexBackend::Sled,
        }
    }
}

impl Config {
    /// Configuration rooted at `data_dir`, otherwise default
    pub fn with_data_dir<P: AsRef<Path>>(data_dir: P) -> Self {
        Config {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Config::default()
        }
    }

    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(block_size) = std::env::var("BITSTORE_BLOCK_SIZE") {
            if let Ok(size) = block_size.trim().parse::<usize>() {
                self.block.block_size = size;
            }
        }

        if let Ok(data_dir) = std::env::var("BITSTORE_DATA_DIR") {
            let dir = data_dir.trim();
            if !dir.is_empty() {
                self.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.block.block_size == 0 {
            return Err(Error::InvalidConfig(
                "Block size must be greater than 0".to_string(),
            ));
        }

        if self.block.block_size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidConfig(format!(
                "Block size exceeds the {} byte limit",
                MAX_BLOCK_SIZE
            )));
        }

        Ok(())
    }

    /// Directory holding block files
    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    /// Path of the sled database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if self.storage.backend == StorageBackend::Directory {
            std::fs::create_dir_all(self.blocks_dir())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.block.block_size, 1_048_576);
        assert_eq!(config.storage.backend, StorageBackend::Directory);
        assert_eq!(config.storage.index, IndexBackend::Sled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_block_size() {
        let mut config = Config::default();
        config.block.block_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.block.block_size = MAX_BLOCK_SIZE + 1;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::with_data_dir(dir.path().join("data"));
        config.block.block_size = 4096;
        config.storage.backend = StorageBackend::Sled;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.storage.backend, StorageBackend::Sled);
        assert_eq!(loaded.data_dir, config.data_dir);
    }

    #[test]
    fn test_backend_names_are_lowercase() {
        let json = serde_json::to_string(&StorageBackend::Directory).unwrap();
        assert_eq!(json, "\"directory\"");
    }

    #[test]
    fn test_parse_backends() {
        assert_eq!("Sled".parse::<StorageBackend>().unwrap(), StorageBackend::Sled);
        assert_eq!("dir".parse::<StorageBackend>().unwrap(), StorageBackend::Directory);
        assert_eq!("memory".parse::<IndexBackend>().unwrap(), IndexBackend::Memory);
        assert!("tape".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(dir.path().join("data"));
        config.ensure_directories().unwrap();
        assert!(config.blocks_dir().is_dir());
    }
}
