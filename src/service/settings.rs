use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use cyder_tools::log::{error, info, warn};

use crate::database::model::{ModelKey, ModelRecord, ModelStore};
use crate::database::{StoreError, StoreResult};
use crate::service::credential::{credential_key, CredentialVault};
use crate::service::provider::{CredentialField, Provider};

pub type Credentials = BTreeMap<CredentialField, String>;

/// Keeps a model record and its credential entries in step. Every mutation
/// of a model goes through here so the two never drift apart.
#[derive(Clone)]
pub struct ModelSettings {
    models: ModelStore,
    vault: CredentialVault,
    credential_ttl: Option<Duration>,
}

impl ModelSettings {
    pub fn new(
        models: ModelStore,
        vault: CredentialVault,
        credential_ttl: Option<Duration>,
    ) -> Self {
        Self {
            models,
            vault,
            credential_ttl,
        }
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    /// Inserts the model, then writes its credentials. A credential write
    /// failure removes the model again.
    pub async fn register_model(
        &self,
        name: &str,
        provider: Provider,
        credentials: &Credentials,
    ) -> StoreResult<ModelRecord> {
        if let Some(field) = credentials
            .keys()
            .find(|field| !provider.credential_fields().contains(field))
        {
            return Err(StoreError::InvalidArgument(format!(
                "provider '{}' does not take credential '{}'",
                provider, field
            )));
        }

        let record = self.models.insert(name, provider).await?;

        let written = async {
            for (field, value) in credentials {
                self.vault
                    .set(&credential_key(provider, name, *field), value, self.credential_ttl)
                    .await?;
            }
            Ok::<_, StoreError>(())
        }
        .await;

        if let Err(e) = written {
            error!("Error saving credentials for '{}' ({}): {}", name, provider, e);
            self.delete_credentials(name, provider).await;
            if let Err(rollback) = self.models.remove(name, provider).await {
                error!("Rollback of model '{}' failed: {}", name, rollback);
            }
            return Err(e);
        }
        info!("Model '{}' ({}) registered.", name, provider);
        Ok(record)
    }

    /// Renames the model and moves its credentials to the new key. If the
    /// credentials cannot be moved the model keeps its old name.
    pub async fn rename_model(
        &self,
        old_name: &str,
        new_name: &str,
        provider: Provider,
    ) -> StoreResult<()> {
        self.models.rename(old_name, new_name, provider).await?;

        let mut moved = Vec::new();
        let result = async {
            for field in provider.credential_fields() {
                let old_key = credential_key(provider, old_name, *field);
                let new_key = credential_key(provider, new_name, *field);
                if old_key == new_key {
                    continue;
                }
                if self.vault.rename(&old_key, &new_key).await? {
                    moved.push((old_key, new_key));
                }
            }
            Ok::<_, StoreError>(())
        }
        .await;

        if let Err(e) = result {
            error!("Error moving credentials of '{}': {}", old_name, e);
            for (old_key, new_key) in moved.iter().rev() {
                if let Err(undo) = self.vault.rename(new_key, old_key).await {
                    error!("Could not restore credential '{}': {}", old_key, undo);
                }
            }
            if let Err(rollback) = self.models.rename(new_name, old_name, provider).await {
                error!("Rollback of model rename '{}' failed: {}", new_name, rollback);
            }
            return Err(e);
        }
        Ok(())
    }

    pub async fn remove_model(&self, name: &str, provider: Provider) -> StoreResult<()> {
        self.models.remove(name, provider).await?;
        self.delete_credentials(name, provider).await;
        Ok(())
    }

    /// Bulk removal. Credentials are deleted only for models that existed.
    pub async fn remove_models(&self, pairs: &[ModelKey]) -> HashMap<ModelKey, bool> {
        let results = self.models.remove_many(pairs).await;
        for ((name, provider), removed) in &results {
            if *removed {
                self.delete_credentials(name, *provider).await;
            }
        }
        results
    }

    /// Which credential fields are currently set for a model. Values are never returned.
    pub async fn configured_fields(
        &self,
        name: &str,
        provider: Provider,
    ) -> StoreResult<Vec<CredentialField>> {
        let stored = self.vault.all().await?;
        Ok(provider
            .credential_fields()
            .iter()
            .copied()
            .filter(|field| stored.contains_key(&credential_key(provider, name, *field)))
            .collect())
    }

    async fn delete_credentials(&self, name: &str, provider: Provider) {
        for field in provider.credential_fields() {
            let key = credential_key(provider, name, *field);
            if let Err(e) = self.vault.delete(&key).await {
                warn!("Could not delete credential '{}': {}", key, e);
            }
        }
    }
}
