use crate::api::state::AppState;
use crate::error::LogviewerError;
use crate::BYTES_IN_1MB;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use backtraced_error::error_chain_to_pretty_formatted;
use std::net::SocketAddr;
use tracing::{error, info, instrument, warn};

pub mod handlers;
pub mod state;

#[derive(Debug)]
pub struct ApiError {
    pub code: StatusCode,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code, self.message).into_response()
    }
}

impl From<LogviewerError> for ApiError {
    fn from(value: LogviewerError) -> Self {
        match &value {
            LogviewerError::InvalidFilter(_) | LogviewerError::InvalidRecord { .. } => ApiError {
                code: StatusCode::BAD_REQUEST,
                message: value.to_string(),
            },
            LogviewerError::ConcurrentUpdateConflict { .. } => {
                warn!("{value}");
                ApiError {
                    code: StatusCode::CONFLICT,
                    message: value.to_string(),
                }
            }
            LogviewerError::StorageFailure(_) => {
                error!("{}", error_chain_to_pretty_formatted(&value));
                ApiError {
                    code: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Storage error when handling the request".to_string(),
                }
            }
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ready", get(ready))
        .route("/api/list-traces", get(handlers::list_traces_get))
        .route("/api/list-spans", get(handlers::list_spans_get))
        .route("/api/list-logs", get(handlers::list_logs_get))
        .route("/api/collect/span", post(handlers::collect_span_post))
        .route("/api/collect/spans", post(handlers::collect_spans_post))
        .route("/api/collect/log", post(handlers::collect_log_post))
        .route("/api/collect/logs", post(handlers::collect_logs_post))
        .route("/api/traces", get(handlers::traces_search_get))
        .route("/api/traces/:trace_id", get(handlers::trace_get))
        .with_state(app_state)
        .layer(axum::extract::DefaultBodyLimit::max(BYTES_IN_1MB))
        .layer(tower_http::cors::CorsLayer::very_permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serves until the server fails.
#[instrument(skip_all)]
pub async fn serve(
    app_state: AppState,
    api_port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let address = SocketAddr::from(([0, 0, 0, 0], api_port));
    info!("Starting API on {address}");
    axum::Server::try_bind(&address)?
        .serve(router(app_state).into_make_service())
        .await?;
    Ok(())
}

async fn ready() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; charset=UTF-8",
        )],
        "ok",
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{RecordKind, StorageError};
    use crate::store::memory::MemoryRowStore;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use tracing_config_helper::setup_tracing_console_logging_for_test;

    fn app() -> Router {
        setup_tracing_console_logging_for_test();
        router(AppState::new(Arc::new(MemoryRowStore::new())))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        let body = match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn collected_span_shows_up_in_listings() {
        let app = app();
        let span = json!({"id": 1, "trace_id": 1, "name": "root", "start_timestamp": 100, "duration": 50, "finished": true});
        let (status, body) = send(&app, Method::POST, "/api/collect/span", Some(span)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
        let log = json!({"id": 10, "timestamp": 150, "trace_id": 1, "span_id": 1, "fields": {"event": "x"}});
        let (status, _) = send(&app, Method::POST, "/api/collect/logs", Some(json!([log]))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::GET, "/api/list-traces?min_duration=40&size=oops", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"][0]["id"], json!(1));
        assert_eq!(body["cursor"], Value::Null);

        let (_, body) = send(&app, Method::GET, "/api/list-spans?trace_id=1", None).await;
        assert_eq!(body["content"][0]["name"], json!("root"));
        let (_, body) = send(&app, Method::GET, "/api/list-logs?trace_id=1&cursor=bad", None).await;
        assert_eq!(body["content"][0]["fields"]["event"], json!("x"));

        let (status, body) = send(&app, Method::GET, "/api/traces/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["spans"][0]["logs"][0]["timestamp"], json!(150));
        assert_eq!(body["total"], json!(1));

        let (_, body) = send(&app, Method::GET, "/api/traces?min_duration=60", None).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn bad_requests_are_rejected() {
        let app = app();
        let (status, _) = send(&app, Method::GET, "/api/list-spans", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::GET, "/api/list-traces?min_duration=50&max_duration=10", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let span = json!({"id": u64::MAX, "trace_id": 1, "name": "root", "start_timestamp": 100});
        let (status, _) = send(&app, Method::POST, "/api/collect/span", Some(span)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ready_says_ok() {
        let response = app()
            .oneshot(Request::builder().uri("/api/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[test]
    fn errors_map_to_status_codes() {
        let conflict = ApiError::from(LogviewerError::ConcurrentUpdateConflict {
            kind: RecordKind::Span,
            id: 1,
            attempts: 3,
        });
        assert_eq!(conflict.code, StatusCode::CONFLICT);
        let storage = ApiError::from(LogviewerError::StorageFailure(StorageError::Corrupted {
            kind: RecordKind::Log,
            reason: "negative id -1".to_string(),
        }));
        assert_eq!(storage.code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!storage.message.contains("negative"));
    }
}
