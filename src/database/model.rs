use std::collections::HashMap;

use cyder_tools::log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::{to_record, KeyValueStore, StoreError, StoreResult};
use crate::service::provider::Provider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: i64,
    pub name: String,
    pub provider: Provider,
}

#[derive(Serialize)]
struct NewModel<'a> {
    name: &'a str,
    provider: Provider,
}

/// A `(name, provider)` pair, the identity of a model.
pub type ModelKey = (String, Provider);

/// Models collection. No two records share the same `(name, provider)` pair.
#[derive(Clone)]
pub struct ModelStore {
    kv: KeyValueStore,
    key: String,
}

impl ModelStore {
    pub fn new(kv: KeyValueStore, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }

    async fn load(&self) -> StoreResult<Vec<ModelRecord>> {
        self.kv.load(&self.key).await
    }

    async fn save(&self, models: &[ModelRecord]) -> StoreResult<()> {
        self.kv.save(&self.key, models).await
    }

    pub async fn insert(&self, name: &str, provider: Provider) -> StoreResult<ModelRecord> {
        let result = async {
            let models = self.load().await?;
            if models.iter().any(|m| m.name == name && m.provider == provider) {
                return Err(StoreError::ModelAlreadyExists {
                    name: name.to_string(),
                    provider: provider.to_string(),
                });
            }
            let id = self
                .kv
                .insert(&self.key, to_record(&NewModel { name, provider })?)
                .await?;
            Ok::<_, StoreError>(ModelRecord {
                id,
                name: name.to_string(),
                provider,
            })
        }
        .await;

        match &result {
            Ok(_) => info!("Model '{}' inserted successfully.", name),
            Err(e) => error!("Error inserting model: {}", e),
        }
        result
    }

    pub async fn select(&self, provider: Provider) -> Vec<ModelRecord> {
        match self.load().await {
            Ok(models) => models.into_iter().filter(|m| m.provider == provider).collect(),
            Err(e) => {
                error!("Error selecting models: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn select_all(&self) -> Vec<ModelRecord> {
        self.load().await.unwrap_or_else(|e| {
            error!("Error selecting all models: {}", e);
            Vec::new()
        })
    }

    pub async fn find(&self, name: &str, provider: Provider) -> StoreResult<Option<ModelRecord>> {
        let models = self.load().await?;
        Ok(models
            .into_iter()
            .find(|m| m.name == name && m.provider == provider))
    }

    pub async fn remove(&self, name: &str, provider: Provider) -> StoreResult<()> {
        let result = async {
            let mut models = self.load().await?;
            let before = models.len();
            models.retain(|m| !(m.name == name && m.provider == provider));
            if models.len() == before {
                return Err(StoreError::ModelNotFound {
                    name: name.to_string(),
                    provider: provider.to_string(),
                });
            }
            self.save(&models).await
        }
        .await;

        match &result {
            Ok(()) => info!("Model '{}' ({}) removed successfully.", name, provider),
            Err(e) => error!("Error removing model: {}", e),
        }
        result
    }

    /// Removes every requested pair and reports, per pair, whether it existed.
    /// The collection is written once, after all pairs are processed. Any
    /// storage failure reports every pair as not removed.
    pub async fn remove_many(&self, pairs: &[ModelKey]) -> HashMap<ModelKey, bool> {
        let result = async {
            let mut models = self.load().await?;
            let mut results = HashMap::with_capacity(pairs.len());
            for (name, provider) in pairs {
                let before = models.len();
                models.retain(|m| !(&m.name == name && m.provider == *provider));
                let removed = models.len() != before;
                if removed {
                    info!("Model '{}' ({}) removed successfully.", name, provider);
                } else {
                    warn!("Model '{}' ({}) not found.", name, provider);
                }
                results.entry((name.clone(), *provider)).or_insert(removed);
            }
            self.save(&models).await?;
            Ok::<_, StoreError>(results)
        }
        .await;

        result.unwrap_or_else(|e| {
            error!("Error removing models: {}", e);
            pairs.iter().map(|pair| (pair.clone(), false)).collect()
        })
    }

    /// Renames one model. The provider never changes.
    pub async fn rename(
        &self,
        old_name: &str,
        new_name: &str,
        provider: Provider,
    ) -> StoreResult<()> {
        let result = async {
            let mut models = self.load().await?;
            if !models.iter().any(|m| m.name == old_name && m.provider == provider) {
                return Err(StoreError::ModelNotFound {
                    name: old_name.to_string(),
                    provider: provider.to_string(),
                });
            }
            if models.iter().any(|m| m.name == new_name && m.provider == provider) {
                return Err(StoreError::ModelAlreadyExists {
                    name: new_name.to_string(),
                    provider: provider.to_string(),
                });
            }
            if let Some(model) = models
                .iter_mut()
                .find(|m| m.name == old_name && m.provider == provider)
            {
                model.name = new_name.to_string();
            }
            self.save(&models).await
        }
        .await;

        match &result {
            Ok(()) => info!("Model '{}' renamed to '{}'.", old_name, new_name),
            Err(e) => error!("Error renaming model: {}", e),
        }
        result
    }
}
