use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cyder_tools::log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::service::storage::BlobStore;

pub mod error;
pub mod file;
pub mod history;
pub mod model;
pub mod prompt;

pub use error::{StoreError, StoreResult};

/// One stored record: a field-name → value map in insertion order.
pub type Record = Map<String, Value>;

const ID_FIELD: &str = "id";
const SEQUENCE_SUFFIX: &str = ".seq";

/// Collection-level access to the blob store. Each collection is one JSON
/// array persisted under its own key and rewritten whole on every change.
///
/// No locking: the last writer wins. The store is scoped to one interactive
/// session.
#[derive(Clone)]
pub struct KeyValueStore {
    blob_store: Arc<dyn BlobStore>,
    settle_delay: Duration,
}

impl KeyValueStore {
    pub fn new(blob_store: Arc<dyn BlobStore>, settle_delay: Duration) -> Self {
        Self {
            blob_store,
            settle_delay,
        }
    }

    /// Returns the stored collection. Absent or malformed values (anything
    /// that is not a JSON array) read as an empty collection; array elements
    /// that are not objects are skipped.
    pub async fn get(&self, key: &str) -> StoreResult<Vec<Record>> {
        let Some(raw) = self.blob_store.get_item(key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Array(items)) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(record) => Some(record),
                    other => {
                        warn!("Skipping non-object entry in '{}': {}", key, other);
                        None
                    }
                })
                .collect()),
            Ok(_) | Err(_) => {
                warn!("Collection '{}' is malformed, treating it as empty", key);
                Ok(Vec::new())
            }
        }
    }

    /// Appends `value` with a freshly assigned id placed first, persists the
    /// whole collection and returns the id. The id sequence is advanced before
    /// the collection is written, so a failed write leaves a gap and never a
    /// stored record behind an error.
    pub async fn insert(&self, key: &str, value: Record) -> StoreResult<i64> {
        let mut records = self.get(key).await?;
        let id = self.next_id(key, &records).await?;

        let mut record = Map::with_capacity(value.len() + 1);
        record.insert(ID_FIELD.to_string(), Value::from(id));
        record.extend(value.into_iter().filter(|(field, _)| field != ID_FIELD));
        records.push(record);

        self.write(&sequence_key(key), Bytes::from(id.to_string())).await?;
        self.replace(key, &records).await?;
        debug!("Inserted record {} into '{}'", id, key);
        Ok(id)
    }

    /// Appends `value` as-is, without assigning an id.
    pub async fn append(&self, key: &str, value: Record) -> StoreResult<()> {
        let mut records = self.get(key).await?;
        records.push(value);
        self.replace(key, &records).await
    }

    /// Overwrites the entire stored collection.
    pub async fn replace(&self, key: &str, records: &[Record]) -> StoreResult<()> {
        let data = serde_json::to_vec(records)?;
        self.write(key, Bytes::from(data)).await
    }

    /// Removes the collection. Its id sequence survives so ids are not reused.
    pub async fn clear(&self, key: &str) -> StoreResult<()> {
        self.blob_store.erase_item(key).await?;
        self.settle().await;
        Ok(())
    }

    /// Wipes every collection, id sequences included.
    pub async fn clear_all(&self) -> StoreResult<()> {
        self.blob_store.erase_all().await?;
        self.settle().await;
        Ok(())
    }

    /// Typed view of a collection. Records that do not match `T` are skipped
    /// with a warning and dropped by the next typed rewrite.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Vec<T>> {
        Ok(self
            .get(key)
            .await?
            .into_iter()
            .filter_map(|record| {
                let id = record.get(ID_FIELD).cloned().unwrap_or(Value::Null);
                match serde_json::from_value(Value::Object(record)) {
                    Ok(typed) => Some(typed),
                    Err(e) => {
                        warn!("Skipping malformed record {} in '{}': {}", id, key, e);
                        None
                    }
                }
            })
            .collect())
    }

    pub async fn save<T: Serialize>(&self, key: &str, records: &[T]) -> StoreResult<()> {
        let records = records
            .iter()
            .map(to_record)
            .collect::<StoreResult<Vec<Record>>>()?;
        self.replace(key, &records).await
    }

    /// Reads a single JSON document stored under `key`. Absent or malformed
    /// documents read as `T::default()`.
    pub async fn get_document<T: DeserializeOwned + Default>(&self, key: &str) -> StoreResult<T> {
        let Some(raw) = self.blob_store.get_item(key).await? else {
            return Ok(T::default());
        };
        Ok(serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!("Document '{}' is malformed, treating it as empty: {}", key, e);
            T::default()
        }))
    }

    pub async fn put_document<T: Serialize>(&self, key: &str, document: &T) -> StoreResult<()> {
        let data = serde_json::to_vec(document)?;
        self.write(key, Bytes::from(data)).await
    }

    // New id = 1 + max(highest id present, highest id ever handed out).
    async fn next_id(&self, key: &str, records: &[Record]) -> StoreResult<i64> {
        let max_present = records
            .iter()
            .filter_map(|r| r.get(ID_FIELD).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        let high_water = match self.blob_store.get_item(&sequence_key(key)).await? {
            Some(raw) => std::str::from_utf8(&raw)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(0),
            None => 0,
        };
        Ok(max_present.max(high_water) + 1)
    }

    async fn write(&self, key: &str, data: Bytes) -> StoreResult<()> {
        self.blob_store.set_item(key, data).await?;
        self.settle().await;
        Ok(())
    }

    async fn settle(&self) {
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

fn sequence_key(key: &str) -> String {
    format!("{}{}", key, SEQUENCE_SUFFIX)
}

/// Serializes a typed record into a field map.
pub fn to_record<T: Serialize>(value: &T) -> StoreResult<Record> {
    match serde_json::to_value(value)? {
        Value::Object(record) => Ok(record),
        other => Err(StoreError::InvalidArgument(format!(
            "expected a JSON object record, got {}",
            other
        ))),
    }
}
