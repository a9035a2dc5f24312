use std::future::Future;
use std::sync::Arc;

use axum::{
    http::{self, header::CACHE_CONTROL, HeaderMap, HeaderValue},
    response::IntoResponse,
    extract::State,
    routing::{delete, get},
};
use file::create_file_router;
use forecast::create_forecast_router;
use history::create_history_router;
use model::create_model_router;
use prompt::create_prompt_router;
use tower_http::{
    services::{ServeDir, ServeFile},
    set_header::SetResponseHeaderLayer,
};

use cyder_tools::log::warn;

use crate::service::app_state::{create_state_router, AppState, SessionFlows, StateRouter};
use crate::service::workflow::{ConfirmationFlow, FlowState};
use crate::utils::HttpResult;

mod error;
mod file;
mod forecast;
mod history;
mod model;
mod prompt;

pub use error::BaseError;

pub const SESSION_HEADER: &str = "x-session-id";
const DEFAULT_SESSION: &str = "default";

/// API routes, mounted under the configured base path.
pub fn create_router() -> StateRouter {
    create_state_router()
        .route("/session", get(new_session))
        .route("/storage", delete(reset_storage))
        .merge(create_model_router())
        .merge(create_prompt_router())
        .merge(create_file_router())
        .merge(create_history_router())
        .merge(create_forecast_router())
}

/// Static dashboard assets served from `public/`.
pub fn create_ui_router() -> StateRouter {
    let serve_dir = ServeDir::new("public").fallback(ServeFile::new("public/index.html"));
    create_state_router()
        .nest_service("/ui", serve_dir)
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
}

pub async fn handle_404() -> impl IntoResponse {
    (http::StatusCode::NOT_FOUND, "not found")
}

async fn new_session() -> HttpResult<String> {
    HttpResult::new(uuid::Uuid::new_v4().to_string())
}

/// Wipes every collection, credentials and id sequences included.
async fn reset_storage(
    State(app_state): State<Arc<AppState>>,
) -> Result<HttpResult<()>, BaseError> {
    app_state.kv.clear_all().await?;
    Ok(HttpResult::new(()))
}

/// Session a request belongs to; requests without the header share one.
pub(crate) fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

pub(crate) type FlowSelector<T> = fn(&mut SessionFlows) -> &mut ConfirmationFlow<T>;

pub(crate) fn flow_state<T: Clone>(
    state: &AppState,
    headers: &HeaderMap,
    select: FlowSelector<T>,
) -> FlowState<T> {
    state.with_session(&session_id(headers), |flows| select(flows).state().clone())
}

pub(crate) fn request_flow<T: Clone>(
    state: &AppState,
    headers: &HeaderMap,
    select: FlowSelector<T>,
    pending: T,
) -> Result<FlowState<T>, BaseError> {
    state.with_session(&session_id(headers), |flows| {
        let flow = select(flows);
        flow.request(pending)?;
        Ok::<_, BaseError>(flow.state().clone())
    })
}

pub(crate) fn cancel_flow<T>(
    state: &AppState,
    headers: &HeaderMap,
    select: FlowSelector<T>,
) -> Result<(), BaseError> {
    state.with_session(&session_id(headers), |flows| select(flows).cancel())?;
    Ok(())
}

/// Returns a flow to Idle when dropped, so a confirm whose future is
/// abandoned mid-apply (client disconnect) cannot leave it in Applying.
struct FinishOnDrop<'a, T> {
    state: &'a AppState,
    session: String,
    select: FlowSelector<T>,
}

impl<T> Drop for FinishOnDrop<'_, T> {
    fn drop(&mut self) {
        let select = self.select;
        if let Err(e) = self
            .state
            .with_session(&self.session, |flows| select(flows).finish())
        {
            warn!("Session '{}': {}", self.session, e);
        }
    }
}

/// Takes the pending payload, runs `apply` on it and returns the flow to
/// Idle whether `apply` succeeded, failed or was dropped.
pub(crate) async fn confirm_flow<T, R, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    select: FlowSelector<T>,
    apply: impl FnOnce(T) -> Fut,
) -> Result<R, BaseError>
where
    Fut: Future<Output = Result<R, BaseError>>,
{
    let session = session_id(headers);
    let pending = state.with_session(&session, |flows| select(flows).confirm())?;
    let _finish = FinishOnDrop {
        state,
        session,
        select,
    };
    apply(pending).await
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::service::app_state::AppState;

    pub fn app(state: Arc<AppState>) -> Router {
        super::create_router().with_state(state)
    }

    /// Sends one request and returns the status plus the JSON body.
    pub async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        session: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder.header(super::SESSION_HEADER, session);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::service::app_state::tests::test_state;
    use crate::service::provider::tests::StubClient;

    fn delete_files_flow(flows: &mut SessionFlows) -> &mut ConfirmationFlow<Vec<String>> {
        &mut flows.delete_files
    }

    #[tokio::test]
    async fn test_abandoned_confirm_returns_flow_to_idle() {
        let state = test_state(StubClient::replying("ok"));
        let headers = HeaderMap::new();
        request_flow(&state, &headers, delete_files_flow, vec!["a".to_string()]).unwrap();

        let confirm = confirm_flow(&state, &headers, delete_files_flow, |_| async {
            std::future::pending::<Result<(), BaseError>>().await
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), confirm).await;
        assert!(timed_out.is_err());

        assert_eq!(flow_state(&state, &headers, delete_files_flow), FlowState::Idle);
        let again = request_flow(&state, &headers, delete_files_flow, vec!["b".to_string()]);
        assert_eq!(
            again.unwrap(),
            FlowState::Confirming(vec!["b".to_string()])
        );
        cancel_flow(&state, &headers, delete_files_flow).unwrap();
    }

    #[tokio::test]
    async fn test_failed_apply_returns_flow_to_idle() {
        let state = test_state(StubClient::replying("ok"));
        let headers = HeaderMap::new();
        request_flow(&state, &headers, delete_files_flow, vec!["a".to_string()]).unwrap();

        let result = confirm_flow(&state, &headers, delete_files_flow, |_| async {
            Err::<(), _>(BaseError::ParamInvalid(None))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(flow_state(&state, &headers, delete_files_flow), FlowState::Idle);
    }

    #[test]
    fn test_session_id_defaults() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), "default");
        headers.insert(SESSION_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_id(&headers), "abc");
    }
}
