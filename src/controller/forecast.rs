use std::sync::Arc;

use axum::{extract::State, response::Json, routing::post};
use serde::Deserialize;

use crate::{
    controller::BaseError,
    database::prompt::PromptVariables,
    service::{
        app_state::{create_state_router, AppState, StateRouter},
        provider::{ModelResponse, PredictOptions},
    },
    utils::HttpResult,
};

#[derive(Debug, Deserialize)]
pub struct ForecastRequest {
    pub model: String,
    /// Provider tag as stored with the model, e.g. `openai`.
    pub provider: String,
    /// Literal prompt text. Ignored when `prompt_name` is set.
    #[serde(default)]
    pub content: Option<String>,
    /// Stored prompt template to render instead of `content`.
    #[serde(default)]
    pub prompt_name: Option<String>,
    #[serde(default)]
    pub variables: PromptVariables,
    pub temperature: f64,
    #[serde(default)]
    pub options: PredictOptions,
}

/// Model failures still answer 200 with a null-filled response.
async fn forecast(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<ForecastRequest>,
) -> Result<HttpResult<ModelResponse>, BaseError> {
    if !(0.0..=1.0).contains(&request.temperature) {
        return Err(BaseError::ParamInvalid(Some(
            "temperature must be between 0 and 1".to_string(),
        )));
    }
    let content = match (&request.prompt_name, request.content) {
        (Some(name), _) => app_state.prompts.render(name, &request.variables).await?,
        (None, Some(content)) => content,
        (None, None) => {
            return Err(BaseError::ParamInvalid(Some(
                "either content or prompt_name is required".to_string(),
            )))
        }
    };

    let response = app_state
        .dispatcher
        .respond_tagged(
            &request.model,
            &request.provider,
            &content,
            request.temperature,
            &request.options,
        )
        .await;
    Ok(HttpResult::new(response))
}

pub fn create_forecast_router() -> StateRouter {
    create_state_router().route("/forecast", post(forecast))
}
