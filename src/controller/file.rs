use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};

use super::{cancel_flow, confirm_flow, flow_state, request_flow, FlowSelector};
use crate::{
    controller::BaseError,
    database::StoreError,
    service::{
        app_state::{create_state_router, AppState, SessionFlows, StateRouter},
        workflow::{ConfirmationFlow, FlowState},
    },
    utils::HttpResult,
};

fn delete_files_flow(flows: &mut SessionFlows) -> &mut ConfirmationFlow<Vec<String>> {
    &mut flows.delete_files
}

const DELETE_FILES: FlowSelector<Vec<String>> = delete_files_flow;

#[derive(Debug, Serialize)]
pub struct FileSummary {
    pub filename: String,
    /// Length of the stored base64 payload.
    pub encoded_size: usize,
}

#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteFilesRequest {
    pub filenames: Vec<String>,
}

async fn list_files(State(app_state): State<Arc<AppState>>) -> HttpResult<Vec<FileSummary>> {
    let files = app_state.files.select_all().await;
    HttpResult::new(
        files
            .into_iter()
            .map(|f| FileSummary {
                encoded_size: f.content.len(),
                filename: f.filename,
            })
            .collect(),
    )
}

async fn file_exists(
    State(app_state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<HttpResult<bool>, BaseError> {
    Ok(HttpResult::new(app_state.files.exists(&filename).await?))
}

/// Raw request body is the file content. An existing file is never overwritten.
async fn upload_file(
    State(app_state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Result<HttpResult<FileSummary>, BaseError> {
    if app_state.files.exists(&filename).await? {
        return Err(StoreError::FileAlreadyExists(filename).into());
    }
    let record = app_state.files.upload(&filename, &body).await?;
    Ok(HttpResult::new(FileSummary {
        encoded_size: record.content.len(),
        filename: record.filename,
    }))
}

async fn download_file(
    State(app_state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, BaseError> {
    let data = app_state.files.select(&filename).await?.decode()?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

async fn rename_file(
    State(app_state): State<Arc<AppState>>,
    Path(filename): Path<String>,
    Json(request): Json<RenameFileRequest>,
) -> Result<HttpResult<()>, BaseError> {
    if request.new_name.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some("new name is required".to_string())));
    }
    if !app_state.files.rename(&filename, &request.new_name).await? {
        return Err(StoreError::FileNotFound(filename).into());
    }
    Ok(HttpResult::new(()))
}

async fn delete_file(
    State(app_state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<HttpResult<()>, BaseError> {
    app_state.files.remove(&filename).await?;
    Ok(HttpResult::new(()))
}

async fn clear_files(State(app_state): State<Arc<AppState>>) -> Result<HttpResult<()>, BaseError> {
    app_state.files.clear().await?;
    Ok(HttpResult::new(()))
}

async fn get_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> HttpResult<FlowState<Vec<String>>> {
    HttpResult::new(flow_state(&app_state, &headers, DELETE_FILES))
}

async fn request_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DeleteFilesRequest>,
) -> Result<HttpResult<FlowState<Vec<String>>>, BaseError> {
    let state = request_flow(&app_state, &headers, DELETE_FILES, request.filenames)?;
    Ok(HttpResult::new(state))
}

async fn cancel_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    cancel_flow(&app_state, &headers, DELETE_FILES)?;
    Ok(HttpResult::new(()))
}

async fn confirm_bulk_delete(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<HttpResult<()>, BaseError> {
    let files = &app_state.files;
    confirm_flow(&app_state, &headers, DELETE_FILES, |filenames| async move {
        files.remove_many(&filenames).await.map_err(BaseError::from)
    })
    .await?;
    Ok(HttpResult::new(()))
}

pub fn create_file_router() -> StateRouter {
    create_state_router().nest(
        "/file",
        create_state_router()
            .route("/", delete(clear_files))
            .route("/list", get(list_files))
            .route("/bulk_delete", get(get_bulk_delete).post(request_bulk_delete))
            .route("/bulk_delete/confirm", post(confirm_bulk_delete))
            .route("/bulk_delete/cancel", post(cancel_bulk_delete))
            .route(
                "/{filename}",
                get(download_file).post(upload_file).delete(delete_file),
            )
            .route("/{filename}/exists", get(file_exists))
            .route("/{filename}/rename", put(rename_file)),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use crate::controller::test_support::{app, call};
    use crate::service::app_state::tests::test_state;
    use crate::service::provider::tests::StubClient;

    async fn upload(app: &axum::Router, name: &str, data: &'static [u8]) -> StatusCode {
        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/file/{}", name))
            .body(Body::from(data))
            .unwrap();
        app.clone().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_upload_download_and_no_overwrite() {
        let state = test_state(StubClient::replying("ok"));
        let app = app(Arc::clone(&state));

        assert_eq!(upload(&app, "load.csv", b"a,b\n1,2\n").await, StatusCode::OK);
        assert_eq!(upload(&app, "load.csv", b"other").await, StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(Request::get("/file/load.csv").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"a,b\n1,2\n");

        let (_, body) = call(&app, Method::GET, "/file/load.csv/exists", None, None).await;
        assert_eq!(body["data"], true);
        assert_eq!(state.files.select_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_and_bulk_delete() {
        let app = app(test_state(StubClient::replying("ok")));
        upload(&app, "a.csv", b"a").await;
        upload(&app, "b.csv", b"b").await;

        let (status, _) = call(
            &app,
            Method::PUT,
            "/file/a.csv/rename",
            None,
            Some(json!({"new_name": "b.csv"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/file/ghost.csv/rename",
            None,
            Some(json!({"new_name": "c.csv"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        call(
            &app,
            Method::POST,
            "/file/bulk_delete",
            Some("s"),
            Some(json!({"filenames": ["a.csv", "b.csv"]})),
        )
        .await;
        let (status, _) =
            call(&app, Method::POST, "/file/bulk_delete/confirm", Some("s"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/file/list", None, None).await;
        assert_eq!(body["data"], json!([]));
    }
}
