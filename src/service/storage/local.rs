use async_trait::async_trait;
use bytes::Bytes;
use cyder_tools::log::error;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::StorageDriver;
use crate::service::storage::types::{StorageError, StorageResult};
use crate::service::storage::{validate_key, BlobStore};

const ITEM_EXTENSION: &str = "json";

/// Filesystem blob store: one file per key under `root`.
#[derive(Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: &str) -> StorageResult<Self> {
        let root_path = Path::new(root);
        if !root_path.exists() {
            fs::create_dir_all(root_path).map_err(|e| {
                StorageError::Config(format!(
                    "failed to create local storage directory {:?}: {}",
                    root_path, e
                ))
            })?;
        }
        Ok(Self {
            root: root_path.to_path_buf(),
        })
    }

    fn get_full_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{}.{}", key, ITEM_EXTENSION)))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn driver(&self) -> StorageDriver {
        StorageDriver::Local
    }

    async fn get_item(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let full_path = self.get_full_path(key)?;
        match fs::read(&full_path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Get(format!("Failed to read file: {}", e))),
        }
    }

    async fn set_item(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let full_path = self.get_full_path(key)?;
        // Readers only ever see a complete collection: write a sibling, then rename.
        let tmp_path = full_path.with_extension("json.tmp");
        fs::write(&tmp_path, &data).map_err(|e| {
            error!("Failed to write local blob {}: {}", key, e);
            StorageError::Put(format!("Failed to write to file: {}", e))
        })?;
        fs::rename(&tmp_path, &full_path)
            .map_err(|e| StorageError::Put(format!("Failed to move file into place: {}", e)))
    }

    async fn erase_item(&self, key: &str) -> StorageResult<()> {
        let full_path = self.get_full_path(key)?;
        match fs::remove_file(full_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete(format!("Failed to delete file: {}", e))),
        }
    }

    async fn erase_all(&self) -> StorageResult<()> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StorageError::Delete(format!("Failed to list storage root: {}", e)))?;
        for entry in entries {
            let path = entry
                .map_err(|e| StorageError::Delete(format!("Failed to read entry: {}", e)))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ITEM_EXTENSION) {
                fs::remove_file(&path)
                    .map_err(|e| StorageError::Delete(format!("Failed to delete file: {}", e)))?;
            }
        }
        Ok(())
    }
}
