use std::sync::Arc;

use axum::Router;
use cyder_tools::log::{debug, info};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FinalConfig;
use crate::database::file::FileStore;
use crate::database::history::HistoryStore;
use crate::database::model::{ModelKey, ModelStore};
use crate::database::prompt::PromptStore;
use crate::database::KeyValueStore;
use crate::service::credential::CredentialVault;
use crate::service::provider::{HttpModelClient, ModelClient, ProviderDispatcher, ProviderError};
use crate::service::settings::ModelSettings;
use crate::service::storage::types::StorageError;
use crate::service::storage::{new_blob_store, BlobStore};
use crate::service::workflow::ConfirmationFlow;

#[derive(Debug, Error)]
pub enum AppStateError {
    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),
    #[error("model client setup failed: {0}")]
    Provider(#[from] ProviderError),
}

/// What a confirmed history purge removes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum HistoryPurge {
    Matching {
        dataset: String,
        prompt_types: Vec<String>,
    },
    All,
}

/// Pending destructive actions of one dashboard session.
#[derive(Debug, Default)]
pub struct SessionFlows {
    pub delete_models: ConfirmationFlow<Vec<ModelKey>>,
    pub delete_prompts: ConfirmationFlow<Vec<String>>,
    pub delete_files: ConfirmationFlow<Vec<String>>,
    pub purge_history: ConfirmationFlow<HistoryPurge>,
}

impl SessionFlows {
    fn is_idle(&self) -> bool {
        self.delete_models.is_idle()
            && self.delete_prompts.is_idle()
            && self.delete_files.is_idle()
            && self.purge_history.is_idle()
    }
}

pub struct AppState {
    pub kv: KeyValueStore,
    pub history: HistoryStore,
    pub prompts: PromptStore,
    pub files: FileStore,
    pub vault: CredentialVault,
    pub settings: ModelSettings,
    pub dispatcher: ProviderDispatcher,
    sessions: DashMap<String, SessionFlows>,
}

impl AppState {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        config: &FinalConfig,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        let kv = KeyValueStore::new(blob_store, config.storage.settle_delay());
        let collections = &config.storage.collections;
        let vault = CredentialVault::new(kv.clone(), collections.credentials.as_str());

        Self {
            history: HistoryStore::new(kv.clone(), collections.history.as_str()),
            prompts: PromptStore::new(kv.clone(), collections.prompts.as_str()),
            files: FileStore::new(kv.clone(), collections.uploads.as_str()),
            settings: ModelSettings::new(
                ModelStore::new(kv.clone(), collections.models.as_str()),
                vault.clone(),
                Some(config.credentials.ttl()),
            ),
            dispatcher: ProviderDispatcher::new(
                vault.clone(),
                client,
                config.providers.lm_studio_base_url.as_str(),
            ),
            vault,
            kv,
            sessions: DashMap::new(),
        }
    }

    pub fn models(&self) -> &ModelStore {
        self.settings.models()
    }

    /// Runs `f` against the session's flows, creating them on first use.
    /// A session whose flows are all Idle afterwards is dropped again, so
    /// only sessions with pending work are kept.
    /// `f` must not await: the session entry stays locked while it runs.
    pub fn with_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut SessionFlows) -> R,
    ) -> R {
        let result = {
            let mut flows = self.sessions.entry(session_id.to_string()).or_default();
            f(&mut flows)
        };
        if self
            .sessions
            .remove_if(session_id, |_, flows| flows.is_idle())
            .is_some()
        {
            debug!("Session '{}' has no pending actions", session_id);
        }
        result
    }
}

pub fn create_app_state(config: &FinalConfig) -> Result<Arc<AppState>, AppStateError> {
    let blob_store = new_blob_store(&config.storage)?;
    let timeout = config
        .providers
        .request_timeout_seconds
        .map(std::time::Duration::from_secs);
    let client = HttpModelClient::new(config.proxy.as_deref(), timeout)?;
    info!(
        "Storage driver {:?}, collections under {:?}",
        blob_store.driver(),
        config.storage.local.root
    );
    Ok(Arc::new(AppState::new(blob_store, config, Arc::new(client))))
}

pub type StateRouter = Router<Arc<AppState>>;

pub fn create_state_router() -> StateRouter {
    Router::<Arc<AppState>>::new()
}
