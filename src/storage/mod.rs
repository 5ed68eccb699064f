//! Key-value storage
//!
//! String key/value persistence used for the saved session, in the spirit of
//! browser local storage. It supports:
//! - File storage - default, one JSON document on disk
//! - Memory storage - for tests and throwaway sessions
//!
//! The driver is selected based on configuration.

pub mod file;
pub mod memory;

use std::sync::Arc;

use crate::config::{SessionConfig, StorageDriver};

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Storage file '{path}' is corrupt: {message}")]
    Corrupt { path: String, message: String },
}

/// Synchronous string key/value store.
pub trait KeyValueStorage: Send + Sync {
    /// Get the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

pub type DynStorage = Arc<dyn KeyValueStorage>;

/// Create a storage instance based on configuration
pub fn create_storage(config: &SessionConfig) -> Result<DynStorage, StorageError> {
    match config.storage {
        StorageDriver::File => {
            tracing::info!("Using file storage at {}", config.storage_path.display());
            Ok(Arc::new(FileStorage::open(&config.storage_path)?))
        }
        StorageDriver::Memory => {
            tracing::info!("Using in-memory storage; sessions will not survive restarts");
            Ok(Arc::new(MemoryStorage::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_memory_storage() {
        let config = SessionConfig {
            storage: StorageDriver::Memory,
            ..SessionConfig::default()
        };
        let storage = create_storage(&config).unwrap();

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_create_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            storage: StorageDriver::File,
            storage_path: dir.path().join("nested").join("storage.json"),
            ..SessionConfig::default()
        };
        let storage = create_storage(&config).unwrap();

        storage.set("k", "v").unwrap();
        assert!(config.storage_path.exists());
    }
}
