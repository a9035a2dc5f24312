use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
    routing::{delete, get, post},
};
use serde::Deserialize;

use super::{cancel_flow, confirm_flow, flow_state, request_flow, FlowSelector};
use crate::{
    controller::BaseError,
    database::history::{HistoryEntry, HistoryRecord},
    service::{
        app_state::{create_state_router, AppState, HistoryPurge, SessionFlows, StateRouter},
        workflow::{ConfirmationFlow, FlowState},
    },
    utils::HttpResult,
};

fn purge_history_flow(flows: &mut SessionFlows) -> &mut ConfirmationFlow<HistoryPurge> {
    &mut flows.purge_history
}

const PURGE_HISTORY: FlowSelector<HistoryPurge> = purge_history_flow;

#[derive(Debug, Deserialize)]
pub struct SelectHistoryRequest {
    pub dataset: String,
    pub prompt_types: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupHistoryRequest {
    pub columns: Vec<String>,
}

async fn insert_history(
    State(app_state): State<Arc<AppState>>,
    Json(entry): Json<HistoryEntry>,
) -> Result<HttpResult<HistoryRecord>, BaseError> {
    Ok(HttpResult::new(app_state.history.insert(entry).await?))
}

async fn list_history(State(app_state): State<Arc<AppState>>) -> HttpResult<Vec<HistoryRecord>> {
    HttpResult::new(app_state.history.select_all().await)
}

async fn select_history(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<SelectHistoryRequest>,
) -> HttpResult<Vec<HistoryRecord>> {
    HttpResult::new(
        app_state
            .history
            .select(&request.dataset, &request.prompt_types)
            .await,
    )
}

async fn group_history(
    State(app_state): State<Arc<AppState>>,
    Json(request): Json<GroupHistoryRequest>,
) -> Result<HttpResult<Vec<HistoryRecord>>, BaseError> {
    Ok(HttpResult::new(app_state.history.group_by(&request.columns).await?))
}

async fn delete_history(
    State(app_state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<HttpResult<()>, BaseError> {
    app_state.history.remove(id).await?;
    Ok(HttpResult::new(()))
}

async fn get_purge(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<FlowState<HistoryPurge>> {
    HttpResult::new(flow_state(&app_state, &headers, PURGE_HISTORY))
}

async fn request_purge(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(purge): Json<HistoryPurge>,
) -> Result<HttpResult<FlowState<HistoryPurge>>, BaseError> {
    let state = request_flow(&app_state, &headers, PURGE_HISTORY, purge)?;
    Ok(HttpResult::new(state))
}

async fn cancel_purge(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    cancel_flow(&app_state, &headers, PURGE_HISTORY)?;
    Ok(HttpResult::new(()))
}

/// Returns the number of records removed.
async fn confirm_purge(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<usize>, BaseError> {
    let history = &app_state.history;
    let removed = confirm_flow(&app_state, &headers, PURGE_HISTORY, |purge| async move {
        let removed = match purge {
            HistoryPurge::Matching {
                dataset,
                prompt_types,
            } => history.remove_many(&dataset, &prompt_types).await?,
            HistoryPurge::All => {
                let count = history.select_all().await.len();
                history.remove_all().await?;
                count
            }
        };
        Ok::<_, BaseError>(removed)
    })
    .await?;
    Ok(HttpResult::new(removed))
}

pub fn create_history_router() -> StateRouter {
    create_state_router().nest(
        "/history",
        create_state_router()
            .route("/", post(insert_history))
            .route("/list", get(list_history))
            .route("/select", post(select_history))
            .route("/group_by", post(group_history))
            .route("/purge", get(get_purge).post(request_purge))
            .route("/purge/confirm", post(confirm_purge))
            .route("/purge/cancel", post(cancel_purge))
            .route("/{id}", delete(delete_history)),
    )
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};

    use crate::controller::test_support::{app, call};
    use crate::database::history::tests::entry;
    use crate::service::app_state::tests::test_state;
    use crate::service::provider::tests::StubClient;

    fn entry_json(dataset: &str, prompt_type: &str, smape: Option<f64>) -> Value {
        let mut value = serde_json::to_value(entry(dataset, prompt_type)).unwrap();
        if let Some(smape) = smape {
            value["metrics"] = json!([{"sMAPE": smape, "MAE": 1.0, "RMSE": 1.0}]);
        }
        value
    }

    #[tokio::test]
    async fn test_insert_select_and_group() {
        let app = app(test_state(StubClient::replying("ok")));
        for (dataset, prompt_type, smape) in [
            ("d1", "ZERO_SHOT", Some(9.0)),
            ("d2", "ZERO_SHOT", None),
            ("d1", "FEW_SHOT", Some(3.0)),
        ] {
            let (status, _) = call(
                &app,
                Method::POST,
                "/history",
                None,
                Some(entry_json(dataset, prompt_type, smape)),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (_, body) = call(
            &app,
            Method::POST,
            "/history/select",
            None,
            Some(json!({"dataset": "d1", "prompt_types": ["ZERO_SHOT"]})),
        )
        .await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["id"], 1);
        assert_eq!(body["data"][0]["smape"], 9.0);

        let (_, body) = call(
            &app,
            Method::POST,
            "/history/group_by",
            None,
            Some(json!({"columns": ["smape"]})),
        )
        .await;
        let ids: Vec<i64> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![3, 1]);

        let (status, _) = call(
            &app,
            Method::POST,
            "/history/group_by",
            None,
            Some(json!({"columns": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_and_purge() {
        let app = app(test_state(StubClient::replying("ok")));
        for prompt_type in ["ZERO_SHOT", "FEW_SHOT", "COT"] {
            call(
                &app,
                Method::POST,
                "/history",
                None,
                Some(entry_json("d1", prompt_type, None)),
            )
            .await;
        }

        let (status, _) = call(&app, Method::DELETE, "/history/3", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::DELETE, "/history/3", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["msg"], "Record with id 3 not found.");

        call(
            &app,
            Method::POST,
            "/history/purge",
            None,
            Some(json!({"scope": "matching", "dataset": "d1", "prompt_types": ["ZERO_SHOT"]})),
        )
        .await;
        let (_, body) = call(&app, Method::POST, "/history/purge/confirm", None, None).await;
        assert_eq!(body["data"], 1);

        call(&app, Method::POST, "/history/purge", None, Some(json!({"scope": "all"}))).await;
        let (_, body) = call(&app, Method::POST, "/history/purge/confirm", None, None).await;
        assert_eq!(body["data"], 1);

        let (_, body) = call(&app, Method::GET, "/history/list", None, None).await;
        assert_eq!(body["data"], json!([]));
    }
}
