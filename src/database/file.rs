use base64::{engine::general_purpose::STANDARD, Engine};
use cyder_tools::log::{error, info};
use serde::{Deserialize, Serialize};

use super::{to_record, KeyValueStore, StoreError, StoreResult};

/// An uploaded dataset. The filename is the key; there is no numeric id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    /// Base64 of the raw uploaded bytes.
    pub content: String,
}

impl FileRecord {
    pub fn decode(&self) -> StoreResult<Vec<u8>> {
        STANDARD.decode(&self.content).map_err(|e| {
            StoreError::InvalidArgument(format!(
                "file '{}' has invalid base64 content: {}",
                self.filename, e
            ))
        })
    }
}

#[derive(Clone)]
pub struct FileStore {
    kv: KeyValueStore,
    key: String,
}

impl FileStore {
    pub fn new(kv: KeyValueStore, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }

    async fn load(&self) -> StoreResult<Vec<FileRecord>> {
        self.kv.load(&self.key).await
    }

    async fn save(&self, files: &[FileRecord]) -> StoreResult<()> {
        self.kv.save(&self.key, files).await
    }

    /// Stores `data` under `filename`. Does not check for an existing file of
    /// the same name; callers check [`FileStore::exists`] first.
    pub async fn upload(&self, filename: &str, data: &[u8]) -> StoreResult<FileRecord> {
        let record = FileRecord {
            filename: filename.to_string(),
            content: STANDARD.encode(data),
        };
        self.kv.append(&self.key, to_record(&record)?).await.map_err(|e| {
            error!("Error uploading file '{}': {}", filename, e);
            e
        })?;
        info!("File '{}' uploaded ({} bytes).", filename, data.len());
        Ok(record)
    }

    pub async fn select_all(&self) -> Vec<FileRecord> {
        self.load().await.unwrap_or_else(|e| {
            error!("Error selecting files: {}", e);
            Vec::new()
        })
    }

    pub async fn select(&self, name: &str) -> StoreResult<FileRecord> {
        self.load()
            .await?
            .into_iter()
            .find(|f| f.filename == name)
            .ok_or_else(|| StoreError::FileNotFound(name.to_string()))
    }

    pub async fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.load().await?.iter().any(|f| f.filename == name))
    }

    /// Returns `false` without writing anything when `old_name` is absent.
    /// Unlike upload, a rename onto another existing file is refused.
    pub async fn rename(&self, old_name: &str, new_name: &str) -> StoreResult<bool> {
        let mut files = self.load().await?;
        if old_name != new_name && files.iter().any(|f| f.filename == new_name) {
            error!("Error renaming file: '{}' already exists", new_name);
            return Err(StoreError::FileAlreadyExists(new_name.to_string()));
        }

        let mut renamed = false;
        for file in files.iter_mut().filter(|f| f.filename == old_name) {
            file.filename = new_name.to_string();
            renamed = true;
        }
        if renamed {
            self.save(&files).await?;
            info!("File '{}' renamed to '{}'.", old_name, new_name);
        }
        Ok(renamed)
    }

    /// Filter-out semantics: succeeds even when nothing matched.
    pub async fn remove(&self, name: &str) -> StoreResult<()> {
        let mut files = self.load().await?;
        files.retain(|f| f.filename != name);
        self.save(&files).await
    }

    pub async fn remove_many(&self, names: &[String]) -> StoreResult<()> {
        let mut files = self.load().await?;
        files.retain(|f| !names.contains(&f.filename));
        self.save(&files).await
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.kv.clear(&self.key).await
    }
}
