use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::config::StorageDriver;
use crate::service::storage::types::StorageResult;
use crate::service::storage::{validate_key, BlobStore};

/// Volatile blob store, used for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryBlobStore {
    data: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn driver(&self) -> StorageDriver {
        StorageDriver::Memory
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<Bytes>> {
        validate_key(key)?;
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn set_item(&self, key: &str, data: Bytes) -> StorageResult<()> {
        validate_key(key)?;
        self.data.insert(key.to_string(), data);
        Ok(())
    }

    async fn erase_item(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.data.remove(key);
        Ok(())
    }

    async fn erase_all(&self) -> StorageResult<()> {
        self.data.clear();
        cyder_tools::log::info!("In-memory blob store cleared.");
        Ok(())
    }
}
