use std::{fs, path::Path, time::Duration};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// --- START STORAGE CONFIG ---

/// Storage driver type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageDriver {
    #[default]
    Local,
    Memory,
}

/// Local storage specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_storage_root")]
    pub root: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: default_local_storage_root(),
        }
    }
}

/// Names of the persisted collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionsConfig {
    #[serde(default = "default_history_collection")]
    pub history: String,
    #[serde(default = "default_models_collection")]
    pub models: String,
    #[serde(default = "default_prompts_collection")]
    pub prompts: String,
    #[serde(default = "default_uploads_collection")]
    pub uploads: String,
    #[serde(default = "default_credentials_collection")]
    pub credentials: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            history: default_history_collection(),
            models: default_models_collection(),
            prompts: default_prompts_collection(),
            uploads: default_uploads_collection(),
            credentials: default_credentials_collection(),
        }
    }
}

/// Overall storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub driver: StorageDriver,
    #[serde(default)]
    pub local: LocalStorageConfig,
    /// Pause after every write so asynchronous persistence below the blob store can settle.
    #[serde(default)]
    pub settle_delay_ms: u64,
    #[serde(default)]
    pub collections: CollectionsConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::default(),
            local: LocalStorageConfig::default(),
            settle_delay_ms: 0,
            collections: CollectionsConfig::default(),
        }
    }
}

impl StorageConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

// --- PARTIAL STORAGE CONFIG for merging ---

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialLocalStorageConfig {
    pub root: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialCollectionsConfig {
    pub history: Option<String>,
    pub models: Option<String>,
    pub prompts: Option<String>,
    pub uploads: Option<String>,
    pub credentials: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialStorageConfig {
    pub driver: Option<StorageDriver>,
    pub local: Option<PartialLocalStorageConfig>,
    pub settle_delay_ms: Option<u64>,
    pub collections: Option<PartialCollectionsConfig>,
}

impl PartialStorageConfig {
    fn merge_into(self, final_config: &mut StorageConfig) {
        if let Some(driver) = self.driver {
            final_config.driver = driver;
        }
        if let Some(local_partial) = self.local {
            if let Some(root) = local_partial.root {
                final_config.local.root = root;
            }
        }
        if let Some(settle_delay_ms) = self.settle_delay_ms {
            final_config.settle_delay_ms = settle_delay_ms;
        }
        if let Some(collections) = self.collections {
            let target = &mut final_config.collections;
            if let Some(history) = collections.history {
                target.history = history;
            }
            if let Some(models) = collections.models {
                target.models = models;
            }
            if let Some(prompts) = collections.prompts {
                target.prompts = prompts;
            }
            if let Some(uploads) = collections.uploads {
                target.uploads = uploads;
            }
            if let Some(credentials) = collections.credentials {
                target.credentials = credentials;
            }
        }
    }
}

// --- START CREDENTIALS / PROVIDERS CONFIG ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_credential_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_credential_ttl_seconds(),
        }
    }
}

impl CredentialsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_lm_studio_base_url")]
    pub lm_studio_base_url: String,
    /// No deadline is applied to model calls unless this is set.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            lm_studio_base_url: default_lm_studio_base_url(),
            request_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialCredentialsConfig {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialProvidersConfig {
    pub lm_studio_base_url: Option<String>,
    pub request_timeout_seconds: Option<u64>,
}

fn default_local_storage_root() -> String {
    "storage/data".to_string()
}

fn default_history_collection() -> String {
    "history".to_string()
}

fn default_models_collection() -> String {
    "models".to_string()
}

fn default_prompts_collection() -> String {
    "prompts".to_string()
}

fn default_uploads_collection() -> String {
    "uploads".to_string()
}

fn default_credentials_collection() -> String {
    "credentials".to_string()
}

fn default_credential_ttl_seconds() -> u64 {
    30 * 24 * 60 * 60 // 30 days
}

fn default_lm_studio_base_url() -> String {
    "http://localhost:1234/v1".to_string()
}

// Used for deserializing user-provided config files where all fields are optional.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub base_path: Option<String>,
    pub proxy: Option<String>,
    pub log_level: Option<String>,
    pub storage: Option<PartialStorageConfig>,
    pub credentials: Option<PartialCredentialsConfig>,
    pub providers: Option<PartialProvidersConfig>,
}

impl PartialConfig {
    /// Merges the fields of this partial config into a final config, overwriting existing values.
    fn merge_into(self, final_config: &mut FinalConfig) {
        if let Some(host) = self.host { final_config.host = host; }
        if let Some(port) = self.port { final_config.port = port; }
        if let Some(base_path) = self.base_path { final_config.base_path = base_path; }
        if let Some(proxy) = self.proxy { final_config.proxy = Some(proxy); }
        if let Some(log_level) = self.log_level { final_config.log_level = log_level; }
        if let Some(storage) = self.storage {
            storage.merge_into(&mut final_config.storage)
        }
        if let Some(credentials) = self.credentials {
            if let Some(ttl_seconds) = credentials.ttl_seconds {
                final_config.credentials.ttl_seconds = ttl_seconds;
            }
        }
        if let Some(providers) = self.providers {
            if let Some(url) = providers.lm_studio_base_url {
                final_config.providers.lm_studio_base_url = url;
            }
            if let Some(timeout) = providers.request_timeout_seconds {
                final_config.providers.request_timeout_seconds = Some(timeout);
            }
        }
    }
}

// The fully resolved configuration used by the application.
// This is also the format for the default configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FinalConfig {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub proxy: Option<String>,
    pub log_level: String,
    pub storage: StorageConfig,
    pub credentials: CredentialsConfig,
    pub providers: ProvidersConfig,
}

impl Default for FinalConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_path: "/api".to_string(),
            proxy: None,
            log_level: "info".to_string(),
            storage: StorageConfig::default(),
            credentials: CredentialsConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn get_config_from_env() -> PartialConfig {
    let storage_root: Option<String> = get_env_var("STORAGE_ROOT");
    PartialConfig {
        host: get_env_var("HOST"),
        port: get_env_var("PORT"),
        base_path: get_env_var("BASE_PATH"),
        proxy: get_env_var("PROXY"),
        log_level: get_env_var("LOG_LEVEL"),
        storage: storage_root.map(|root| PartialStorageConfig {
            local: Some(PartialLocalStorageConfig { root: Some(root) }),
            ..Default::default()
        }),
        credentials: None,
        providers: None,
    }
}

fn read_partial_config(path: &Path) -> Option<PartialConfig> {
    let config_str = fs::read_to_string(path).ok()?;
    let partial: PartialConfig = serde_yaml::from_str(&config_str)
        .unwrap_or_else(|e| panic!("Failed to parse configuration file at {:?}: {}", path, e));
    Some(partial)
}

pub static CONFIG: Lazy<FinalConfig> = Lazy::new(|| {
    let default_config_path = Path::new("config.default.yaml");
    let user_config_path_dev_primary = Path::new("config.local.yaml");
    let user_config_path = Path::new("config.yaml");

    // Determine which user config file to use for overrides
    let user_config_path = if cfg!(debug_assertions) && user_config_path_dev_primary.exists() {
        user_config_path_dev_primary
    } else {
        user_config_path
    };

    let mut final_config = FinalConfig::default();

    if let Some(file_defaults) = read_partial_config(default_config_path) {
        file_defaults.merge_into(&mut final_config);
    }

    if let Some(user_config) = read_partial_config(user_config_path) {
        user_config.merge_into(&mut final_config);
    }

    // Environment variables have the highest priority.
    get_config_from_env().merge_into(&mut final_config);

    final_config
});
