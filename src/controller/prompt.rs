use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{cancel_flow, confirm_flow, flow_state, request_flow, FlowSelector};
use crate::{
    controller::BaseError,
    database::prompt::{PromptRecord, PromptVariables},
    service::{
        app_state::{create_state_router, AppState, SessionFlows, StateRouter},
        workflow::{ConfirmationFlow, FlowState},
    },
    utils::HttpResult,
};

fn delete_prompts_flow(flows: &mut SessionFlows) -> &mut ConfirmationFlow<Vec<String>> {
    &mut flows.delete_prompts
}

const DELETE_PROMPTS: FlowSelector<Vec<String>> = delete_prompts_flow;

#[derive(Debug, Deserialize)]
pub struct InsertPromptRequest {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub variables: PromptVariables,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePromptRequest {
    pub content: String,
    #[serde(default)]
    pub variables: PromptVariables,
}

#[derive(Debug, Deserialize)]
pub struct RenamePromptRequest {
    pub new_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RenderPromptRequest {
    #[serde(default)]
    pub variables: PromptVariables,
}

#[derive(Debug, Deserialize)]
pub struct DeletePromptsRequest {
    pub names: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RemovedPrompt {
    pub name: String,
    pub removed: bool,
}

async fn list_prompts(State(app_state): State<Arc<AppState>>) -> HttpResult<Vec<PromptRecord>> {
    HttpResult::new(app_state.prompts.select_all().await)
}

async fn get_prompt(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<HttpResult<PromptRecord>, BaseError> {
    Ok(HttpResult::new(app_state.prompts.select(&name).await?))
}

async fn insert_prompt(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<InsertPromptRequest>,
) -> Result<HttpResult<PromptRecord>, BaseError> {
    if request.name.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("prompt name is required".to_string())));
    }
    let prompt = app_state
        .prompts
        .insert(&request.name, &request.content, request.variables)
        .await?;
    Ok(HttpResult::new(prompt))
}

async fn update_prompt(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<UpdatePromptRequest>,
) -> Result<HttpResult<PromptRecord>, BaseError> {
    let prompt = app_state
        .prompts
        .update(&name, &request.content, request.variables)
        .await?;
    Ok(HttpResult::new(prompt))
}

async fn rename_prompt(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<RenamePromptRequest>,
) -> Result<HttpResult<()>, BaseError> {
    if request.new_name.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("new name is required".to_string())));
    }
    app_state.prompts.rename(&name, &request.new_name).await?;
    Ok(HttpResult::new(()))
}

async fn delete_prompt(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<HttpResult<()>, BaseError> {
    app_state.prompts.remove(&name).await?;
    Ok(HttpResult::new(()))
}

async fn render_prompt(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<HttpResult<String>, BaseError> {
    let request: RenderPromptRequest = if body.is_empty() {
        RenderPromptRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| BaseError::ParamInvalid(Some(e.to_string())))?
    };
    let rendered = app_state.prompts.render(&name, &request.variables).await?;
    Ok(HttpResult::new(rendered))
}

async fn get_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<FlowState<Vec<String>>> {
    HttpResult::new(flow_state(&app_state, &headers, DELETE_PROMPTS))
}

async fn request_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DeletePromptsRequest>,
) -> Result<HttpResult<FlowState<Vec<String>>>, BaseError> {
    let state = request_flow(&app_state, &headers, DELETE_PROMPTS, request.names)?;
    Ok(HttpResult::new(state))
}

async fn cancel_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    cancel_flow(&app_state, &headers, DELETE_PROMPTS)?;
    Ok(HttpResult::new(()))
}

async fn confirm_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<Vec<RemovedPrompt>>, BaseError> {
    let prompts = &app_state.prompts;
    let removed = confirm_flow(&app_state, &headers, DELETE_PROMPTS, |names| async move {
        let mut results = prompts.remove_many(&names).await;
        Ok::<Vec<RemovedPrompt>, BaseError>(names
            .into_iter()
            .filter_map(|name| {
                results
                    .remove(&name)
                    .map(|removed| RemovedPrompt { name, removed })
            })
            .collect())
    })
    .await?;
    Ok(HttpResult::new(removed))
}

pub fn create_prompt_router() -> StateRouter {
    create_state_router().nest(
        "/prompt",
        create_state_router()
            .route("/", post(insert_prompt))
            .route("/list", get(list_prompts))
            .route("/bulk_delete", get(get_bulk_delete).post(request_bulk_delete))
            .route("/bulk_delete/confirm", post(confirm_bulk_delete))
            .route("/bulk_delete/cancel", post(cancel_bulk_delete))
            .route(
                "/{name}",
                get(get_prompt).put(update_prompt).delete(delete_prompt),
            )
            .route("/{name}/rename", put(rename_prompt))
            .route("/{name}/render", post(render_prompt)),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::controller::test_support::{app, call};
    use crate::service::app_state::tests::test_state;
    use crate::service::provider::tests::StubClient;

    #[tokio::test]
    async fn test_prompt_lifecycle() {
        let app = app(test_state(StubClient::replying("ok")));

        let (status, _) = call(
            &app,
            Method::POST,
            "/prompt",
            None,
            Some(json!({"name": "P", "content": "hi {x}", "variables": {"x": "1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/prompt/P", None, None).await;
        assert_eq!(body["data"]["content"], "hi {x}");
        assert_eq!(body["data"]["variables"], json!({"x": "1"}));

        let (_, body) = call(
            &app,
            Method::POST,
            "/prompt/P/render",
            None,
            Some(json!({"variables": {"x": "there"}})),
        )
        .await;
        assert_eq!(body["data"], "hi there");

        let (_, body) = call(&app, Method::POST, "/prompt/P/render", None, None).await;
        assert_eq!(body["data"], "hi 1");

        let (status, _) = call(
            &app,
            Method::PUT,
            "/prompt/P",
            None,
            Some(json!({"content": "bye {x}"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/prompt/P/rename",
            None,
            Some(json!({"new_name": "Q"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, Method::GET, "/prompt/P", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], 1002);

        let (status, _) = call(&app, Method::DELETE, "/prompt/Q", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, Method::GET, "/prompt/list", None, None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn test_staged_bulk_delete_can_be_cancelled() {
        let app = app(test_state(StubClient::replying("ok")));
        for name in ["a", "b"] {
            call(
                &app,
                Method::POST,
                "/prompt",
                None,
                Some(json!({"name": name, "content": "x"})),
            )
            .await;
        }

        call(
            &app,
            Method::POST,
            "/prompt/bulk_delete",
            None,
            Some(json!({"names": ["a"]})),
        )
        .await;
        let (status, _) = call(&app, Method::POST, "/prompt/bulk_delete/cancel", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::POST, "/prompt/bulk_delete/confirm", None, None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        call(
            &app,
            Method::POST,
            "/prompt/bulk_delete",
            None,
            Some(json!({"names": ["a", "zzz"]})),
        )
        .await;
        let (_, body) = call(&app, Method::POST, "/prompt/bulk_delete/confirm", None, None).await;
        assert_eq!(
            body["data"],
            json!([{"name": "a", "removed": true}, {"name": "zzz", "removed": false}])
        );

        let (_, body) = call(&app, Method::GET, "/prompt/list", None, None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }
}
