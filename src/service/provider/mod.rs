use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cyder_tools::log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

use crate::database::StoreError;
use crate::service::credential::{credential_key, CredentialVault};

pub mod client;

pub use client::HttpModelClient;

/// Model-serving backends.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
pub enum Provider {
    #[serde(rename = "lm_studio")]
    #[strum(serialize = "lm_studio")]
    LmStudio,
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    #[serde(rename = "azure")]
    #[strum(serialize = "azure")]
    Azure,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CredentialField {
    ApiKey,
    BaseUrl,
    Endpoint,
    ApiVersion,
}

impl Provider {
    /// Secrets stored per model for this provider. The local runtime needs none.
    pub fn credential_fields(&self) -> &'static [CredentialField] {
        match self {
            Provider::LmStudio => &[],
            Provider::OpenAi => &[CredentialField::ApiKey, CredentialField::BaseUrl],
            Provider::Azure => &[
                CredentialField::ApiKey,
                CredentialField::Endpoint,
                CredentialField::ApiVersion,
            ],
        }
    }
}

/// Extra request-body fields forwarded verbatim to the model (`max_tokens`, `top_p`, ...).
pub type PredictOptions = Map<String, Value>;

/// Uniform result of a model call. On failure `raw` carries the error text and
/// every other field is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub raw: String,
    pub predicted: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Seconds.
    pub time: Option<f64>,
}

impl ModelResponse {
    pub fn failure(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            predicted: None,
            input_tokens: None,
            output_tokens: None,
            time: None,
        }
    }
}

/// Connection settings for one call, built from the stored credentials.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientConfig {
    LmStudio {
        base_url: String,
    },
    OpenAi {
        api_key: String,
        base_url: String,
    },
    Azure {
        api_key: String,
        endpoint: String,
        api_version: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("missing credential '{0}'")]
    MissingCredential(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("credential lookup failed: {0}")]
    Credential(#[from] StoreError),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        config: &ClientConfig,
        model: &str,
        content: &str,
        temperature: f64,
        options: &PredictOptions,
    ) -> Result<Completion, ProviderError>;
}

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Body of the first fenced code block in `text`, or the whole trimmed text
/// when there is none.
pub fn extract_prediction(text: &str) -> String {
    let fenced = text.split_once("```").and_then(|(_, after_open)| {
        // Skip the info string (```json, ```csv, ...).
        let body = after_open.split_once('\n').map_or("", |(_, body)| body);
        body.split_once("```").map(|(block, _)| block.trim().to_string())
    });
    fenced.unwrap_or_else(|| text.trim().to_string())
}

/// Routes a prompt to the right backend and folds every failure into a
/// [`ModelResponse`]. Never returns an error.
#[derive(Clone)]
pub struct ProviderDispatcher {
    vault: CredentialVault,
    client: Arc<dyn ModelClient>,
    lm_studio_base_url: String,
}

impl ProviderDispatcher {
    pub fn new(
        vault: CredentialVault,
        client: Arc<dyn ModelClient>,
        lm_studio_base_url: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            client,
            lm_studio_base_url: lm_studio_base_url.into(),
        }
    }

    pub async fn respond(
        &self,
        model: &str,
        provider: Provider,
        content: &str,
        temperature: f64,
        options: &PredictOptions,
    ) -> ModelResponse {
        let result = async {
            let config = self.client_config(model, provider).await?;
            let started = Instant::now();
            let completion = self
                .client
                .complete(&config, model, content, temperature, options)
                .await?;
            Ok::<_, ProviderError>((completion, started.elapsed().as_secs_f64()))
        }
        .await;

        match result {
            Ok((completion, elapsed)) => {
                let predicted = extract_prediction(&completion.text);
                info!("Response: {}", predicted);
                info!("Input Tokens: {:?}", completion.input_tokens);
                info!("Output Tokens: {:?}", completion.output_tokens);
                info!("Time: {:.2} seconds", elapsed);
                ModelResponse {
                    raw: completion.text,
                    predicted: Some(predicted),
                    input_tokens: completion.input_tokens,
                    output_tokens: completion.output_tokens,
                    time: Some(elapsed),
                }
            }
            Err(e) => {
                error!("Error generating response: {}", e);
                ModelResponse::failure(e.to_string())
            }
        }
    }

    /// Same as [`ProviderDispatcher::respond`] for a provider named by string.
    pub async fn respond_tagged(
        &self,
        model: &str,
        provider_tag: &str,
        content: &str,
        temperature: f64,
        options: &PredictOptions,
    ) -> ModelResponse {
        match provider_tag.parse::<Provider>() {
            Ok(provider) => {
                self.respond(model, provider, content, temperature, options)
                    .await
            }
            Err(_) => {
                error!("Unknown provider: {}", provider_tag);
                ModelResponse::failure(format!("Unknown provider: {}", provider_tag))
            }
        }
    }

    async fn client_config(
        &self,
        model: &str,
        provider: Provider,
    ) -> Result<ClientConfig, ProviderError> {
        match provider {
            Provider::LmStudio => Ok(ClientConfig::LmStudio {
                base_url: self.lm_studio_base_url.clone(),
            }),
            Provider::OpenAi => {
                let api_key = self.required(provider, model, CredentialField::ApiKey).await?;
                let base_url = self
                    .vault
                    .get(&credential_key(provider, model, CredentialField::BaseUrl))
                    .await?
                    .filter(|url| !url.is_empty())
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
                info!("BASE_URL: {}", base_url);
                Ok(ClientConfig::OpenAi { api_key, base_url })
            }
            Provider::Azure => {
                let api_key = self.required(provider, model, CredentialField::ApiKey).await?;
                let endpoint = self.required(provider, model, CredentialField::Endpoint).await?;
                let api_version = self
                    .required(provider, model, CredentialField::ApiVersion)
                    .await?;
                info!("ENDPOINT: {}", endpoint);
                info!("API_VERSION: {}", api_version);
                Ok(ClientConfig::Azure {
                    api_key,
                    endpoint,
                    api_version,
                })
            }
        }
    }

    async fn required(
        &self,
        provider: Provider,
        model: &str,
        field: CredentialField,
    ) -> Result<String, ProviderError> {
        let key = credential_key(provider, model, field);
        self.vault
            .get(&key)
            .await?
            .filter(|value| !value.is_empty())
            .ok_or(ProviderError::MissingCredential(key))
    }
}
