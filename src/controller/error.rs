use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::database::StoreError;
use crate::service::workflow::WorkflowError;

#[derive(Debug)]
pub enum BaseError {
    ParamInvalid(Option<String>),
    DatabaseFatal(Option<String>),
    DatabaseDup(Option<String>),
    NotFound(Option<String>),
    StoreError(Option<String>),
    Conflict(Option<String>),
}

impl From<StoreError> for BaseError {
    fn from(err: StoreError) -> Self {
        let msg = Some(err.to_string());
        match err {
            e if e.is_not_found() => BaseError::NotFound(msg),
            e if e.is_already_exists() => BaseError::DatabaseDup(msg),
            StoreError::InvalidArgument(_) => BaseError::ParamInvalid(msg),
            StoreError::Serialization(_) => BaseError::DatabaseFatal(msg),
            _ => BaseError::StoreError(msg),
        }
    }
}

impl From<WorkflowError> for BaseError {
    fn from(err: WorkflowError) -> Self {
        BaseError::Conflict(Some(err.to_string()))
    }
}

impl IntoResponse for BaseError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message) = match self {
            BaseError::ParamInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                1001,
                msg.unwrap_or("request params invalid".to_string()),
            ),
            BaseError::DatabaseFatal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1100,
                msg.unwrap_or("stored data is corrupt".to_string()),
            ),
            BaseError::DatabaseDup(msg) => (
                StatusCode::BAD_REQUEST,
                1101,
                msg.unwrap_or("some unique keys have conflicted".to_string()),
            ),
            BaseError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                1002,
                msg.unwrap_or("data not found".to_string()),
            ),
            BaseError::StoreError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1200,
                msg.unwrap_or("storage operation failed".to_string()),
            ),
            BaseError::Conflict(msg) => (
                StatusCode::CONFLICT,
                1300,
                msg.unwrap_or("action not allowed in the current state".to_string()),
            ),
        };
        let body = Json(json!({
            "code": error_code,
            "msg": error_message,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::storage::types::StorageError;

    fn status_of(err: StoreError) -> StatusCode {
        BaseError::from(err).into_response().status()
    }

    #[test]
    fn test_store_errors_map_to_status() {
        assert_eq!(status_of(StoreError::HistoryNotFound(3)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(StoreError::PromptAlreadyExists("p".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::InvalidArgument("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::Storage(StorageError::Put("disk full".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_workflow_error_is_conflict() {
        let err = WorkflowError {
            action: "confirm",
            state: "idle",
        };
        assert_eq!(BaseError::from(err).into_response().status(), StatusCode::CONFLICT);
    }
}
