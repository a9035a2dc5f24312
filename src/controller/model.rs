use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::{cancel_flow, confirm_flow, flow_state, request_flow, FlowSelector};
use crate::{
    controller::BaseError,
    database::{
        model::{ModelKey, ModelRecord},
        StoreError,
    },
    service::{
        app_state::{create_state_router, AppState, SessionFlows, StateRouter},
        provider::{CredentialField, Provider},
        settings::Credentials,
        workflow::{ConfirmationFlow, FlowState},
    },
    utils::HttpResult,
};

fn delete_models_flow(flows: &mut SessionFlows) -> &mut ConfirmationFlow<Vec<ModelKey>> {
    &mut flows.delete_models
}

const DELETE_MODELS: FlowSelector<Vec<ModelKey>> = delete_models_flow;

#[derive(Debug, Serialize)]
struct ProviderInfo {
    provider: Provider,
    credential_fields: &'static [CredentialField],
}

#[derive(Debug, Deserialize)]
struct InsertModelRequest {
    name: String,
    provider: Provider,
    #[serde(default)]
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct RenameModelRequest {
    new_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ModelRef {
    name: String,
    provider: Provider,
}

#[derive(Debug, Deserialize)]
struct DeleteModelsRequest {
    models: Vec<ModelRef>,
}

#[derive(Debug, Serialize)]
struct RemovedModel {
    name: String,
    provider: Provider,
    removed: bool,
}

async fn list_providers() -> HttpResult<Vec<ProviderInfo>> {
    HttpResult::new(
        Provider::iter()
            .map(|provider| ProviderInfo {
                provider,
                credential_fields: provider.credential_fields(),
            })
            .collect(),
    )
}

async fn list_models(State(app_state): State<Arc<AppState>>) -> HttpResult<Vec<ModelRecord>> {
    HttpResult::new(app_state.models().select_all().await)
}

async fn list_models_by_provider(
    State(app_state): State<Arc<AppState>>,
    Path(provider): Path<Provider>,
) -> HttpResult<Vec<ModelRecord>> {
    HttpResult::new(app_state.models().select(provider).await)
}

async fn insert_model(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<InsertModelRequest>,
) -> Result<HttpResult<ModelRecord>, BaseError> {
    if request.name.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("model name is required".to_string())));
    }
    let record = app_state
        .settings
        .register_model(&request.name, request.provider, &request.credentials)
        .await?;
    Ok(HttpResult::new(record))
}

async fn get_model(
    State(app_state): State<Arc<AppState>>,
    Path((provider, name)): Path<(Provider, String)>,
) -> Result<HttpResult<ModelRecord>, BaseError> {
    let model = app_state
        .models()
        .find(&name, provider)
        .await?
        .ok_or_else(|| StoreError::ModelNotFound {
            name,
            provider: provider.to_string(),
        })?;
    Ok(HttpResult::new(model))
}

/// Forgets every stored secret. Model records are kept.
async fn clear_credentials(
    State(app_state): State<Arc<AppState>>,
) -> Result<HttpResult<()>, BaseError> {
    app_state.vault.clear().await?;
    Ok(HttpResult::new(()))
}

async fn get_credential_fields(
    State(app_state): State<Arc<AppState>>,
    Path((provider, name)): Path<(Provider, String)>,
) -> Result<HttpResult<Vec<CredentialField>>, BaseError> {
    let fields = app_state.settings.configured_fields(&name, provider).await?;
    Ok(HttpResult::new(fields))
}

async fn rename_model(
    State(app_state): State<Arc<AppState>>,
    Path((provider, name)): Path<(Provider, String)>,
    Json(request): Json<RenameModelRequest>,
) -> Result<HttpResult<()>, BaseError> {
    if request.new_name.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("new name is required".to_string())));
    }
    app_state
        .settings
        .rename_model(&name, &request.new_name, provider)
        .await?;
    Ok(HttpResult::new(()))
}

async fn delete_model(
    State(app_state): State<Arc<AppState>>,
    Path((provider, name)): Path<(Provider, String)>,
) -> Result<HttpResult<()>, BaseError> {
    app_state.settings.remove_model(&name, provider).await?;
    Ok(HttpResult::new(()))
}

async fn get_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<FlowState<Vec<ModelKey>>> {
    HttpResult::new(flow_state(&app_state, &headers, DELETE_MODELS))
}

async fn request_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DeleteModelsRequest>,
) -> Result<HttpResult<FlowState<Vec<ModelKey>>>, BaseError> {
    let pairs = request
        .models
        .into_iter()
        .map(|m| (m.name, m.provider))
        .collect();
    let state = request_flow(&app_state, &headers, DELETE_MODELS, pairs)?;
    Ok(HttpResult::new(state))
}

async fn cancel_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    cancel_flow(&app_state, &headers, DELETE_MODELS)?;
    Ok(HttpResult::new(()))
}

async fn confirm_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<Vec<RemovedModel>>, BaseError> {
    let settings = &app_state.settings;
    let removed = confirm_flow(&app_state, &headers, DELETE_MODELS, |pairs| async move {
        let results = settings.remove_models(&pairs).await;
        let mut seen = std::collections::HashSet::new();
        Ok::<Vec<RemovedModel>, BaseError>(pairs
            .into_iter()
            .filter(|pair| seen.insert(pair.clone()))
            .map(|(name, provider)| RemovedModel {
                removed: results.get(&(name.clone(), provider)).copied().unwrap_or(false),
                name,
                provider,
            })
            .collect())
    })
    .await?;
    Ok(HttpResult::new(removed))
}

pub fn create_model_router() -> StateRouter {
    create_state_router().nest(
        "/model",
        create_state_router()
            .route("/", post(insert_model))
            .route("/list", get(list_models))
            .route("/providers", get(list_providers))
            .route("/provider/{provider}", get(list_models_by_provider))
            .route("/bulk_delete", get(get_bulk_delete).post(request_bulk_delete))
            .route("/bulk_delete/confirm", post(confirm_bulk_delete))
            .route("/bulk_delete/cancel", post(cancel_bulk_delete))
            .route("/credentials", delete(clear_credentials))
            .route("/{provider}/{name}", get(get_model).delete(delete_model))
            .route("/{provider}/{name}/rename", put(rename_model))
            .route("/{provider}/{name}/credentials", get(get_credential_fields)),
    )
}
