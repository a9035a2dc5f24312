use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::{StorageConfig, StorageDriver};
use crate::service::storage::local::LocalBlobStore;
use crate::service::storage::memory::MemoryBlobStore;
use crate::service::storage::types::{StorageError, StorageResult};

pub mod local;
pub mod memory;
pub mod types;

/// Per-origin string-keyed blob store. Every value is replaced as a whole;
/// there are no partial writes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn driver(&self) -> StorageDriver;
    async fn get_item(&self, key: &str) -> StorageResult<Option<Bytes>>;
    async fn set_item(&self, key: &str, data: Bytes) -> StorageResult<()>;
    async fn erase_item(&self, key: &str) -> StorageResult<()>;
    async fn erase_all(&self) -> StorageResult<()>;
}

pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && !key.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

pub fn new_blob_store(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config.driver {
        StorageDriver::Local => Ok(Arc::new(LocalBlobStore::new(&config.local.root)?)),
        StorageDriver::Memory => Ok(Arc::new(MemoryBlobStore::new())),
    }
}
