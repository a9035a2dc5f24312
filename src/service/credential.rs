use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cyder_tools::log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::database::{KeyValueStore, StoreResult};
use crate::service::provider::{CredentialField, Provider};
use crate::utils::name::normalize;

/// `normalize("{provider}_{model}"):{field}`, e.g. `openai_gpt_4o:api_key`.
pub fn credential_key(provider: Provider, model: &str, field: CredentialField) -> String {
    format!("{}:{}", normalize(&format!("{}_{}", provider, model)), field)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub value: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

type Entries = BTreeMap<String, CredentialEntry>;

/// Small secret strings (API keys, endpoints) kept apart from the record
/// collections. All entries live in one document; expired ones read as
/// absent and are dropped on the next access.
#[derive(Clone)]
pub struct CredentialVault {
    kv: KeyValueStore,
    key: String,
}

impl CredentialVault {
    pub fn new(kv: KeyValueStore, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }

    async fn load(&self) -> StoreResult<Entries> {
        let mut entries: Entries = self.kv.get_document(&self.key).await?;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        if entries.len() != before {
            debug!("Purging {} expired credentials", before - entries.len());
            self.kv.put_document(&self.key, &entries).await?;
        }
        Ok(entries)
    }

    /// Stores `value` under `key`; with a `ttl` the entry expires that long from now.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let result = async {
            let mut entries = self.load().await?;
            let expires_at = ttl
                .and_then(|ttl| TimeDelta::from_std(ttl).ok())
                .and_then(|ttl| Utc::now().checked_add_signed(ttl));
            entries.insert(
                key.to_string(),
                CredentialEntry {
                    value: value.to_string(),
                    expires_at,
                },
            );
            self.kv.put_document(&self.key, &entries).await
        }
        .await;

        match &result {
            Ok(()) => debug!("Credential '{}' stored.", key),
            Err(e) => error!("Error storing credential '{}': {}", key, e),
        }
        result
    }

    pub async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.load().await?.remove(key).map(|entry| entry.value))
    }

    /// Returns whether an entry was removed.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.load().await?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.kv.put_document(&self.key, &entries).await?;
        debug!("Credential '{}' deleted.", key);
        Ok(true)
    }

    /// Moves the entry at `old_key` to `new_key`, keeping its expiry. Returns
    /// `false` when there is nothing to move.
    pub async fn rename(&self, old_key: &str, new_key: &str) -> StoreResult<bool> {
        let mut entries = self.load().await?;
        let Some(entry) = entries.remove(old_key) else {
            return Ok(false);
        };
        entries.insert(new_key.to_string(), entry);
        self.kv.put_document(&self.key, &entries).await?;
        debug!("Credential '{}' renamed to '{}'.", old_key, new_key);
        Ok(true)
    }

    /// Every live credential, key to value.
    pub async fn all(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .map(|(key, entry)| (key, entry.value))
            .collect())
    }

    pub async fn clear(&self) -> StoreResult<()> {
        self.kv.put_document(&self.key, &Entries::new()).await?;
        info!("All credentials cleared.");
        Ok(())
    }
}
