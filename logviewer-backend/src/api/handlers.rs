use crate::api::state::AppState;
use crate::api::ApiError;
use api_structs::jaeger::{PagedResponse, TraceView};
use api_structs::{Cursor, Log, NewSpan, Page, Span, Trace, TraceQueryCondition};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

/// `cursor` and `size` are kept as raw strings, garbage in either means "not given".
#[derive(Debug, Deserialize)]
pub struct ListTracesParams {
    cursor: Option<String>,
    size: Option<String>,
    min_duration: Option<i64>,
    max_duration: Option<i64>,
    begin_ts: Option<i64>,
    end_ts: Option<i64>,
    finished: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TraceScopedParams {
    trace_id: u64,
    cursor: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchTracesParams {
    min_duration: Option<i64>,
    max_duration: Option<i64>,
    begin_ts: Option<i64>,
    end_ts: Option<i64>,
    finished: Option<bool>,
    limit: Option<u32>,
}

fn lenient_cursor(cursor: Option<&str>) -> Option<Cursor> {
    cursor.and_then(|c| c.parse().ok())
}

fn lenient_size(size: Option<&str>) -> Option<u32> {
    size.and_then(|s| s.trim().parse().ok())
}

fn collected() -> Json<Value> {
    Json(Value::Object(serde_json::Map::new()))
}

#[instrument(level = "error", skip_all, err(Debug))]
pub(crate) async fn list_traces_get(
    State(app_state): State<AppState>,
    Query(params): Query<ListTracesParams>,
) -> Result<Json<Page<Trace>>, ApiError> {
    let condition = TraceQueryCondition {
        min_duration: params.min_duration,
        max_duration: params.max_duration,
        begin_ts: params.begin_ts,
        end_ts: params.end_ts,
        finished: params.finished,
    };
    let page = app_state
        .queries
        .list_traces(
            Some(&condition),
            lenient_cursor(params.cursor.as_deref()),
            lenient_size(params.size.as_deref()),
        )
        .await?;
    Ok(Json(page))
}

#[instrument(level = "error", skip_all, fields(trace_id = params.trace_id), err(Debug))]
pub(crate) async fn list_spans_get(
    State(app_state): State<AppState>,
    Query(params): Query<TraceScopedParams>,
) -> Result<Json<Page<Span>>, ApiError> {
    let page = app_state
        .queries
        .list_trace_spans(
            params.trace_id,
            lenient_cursor(params.cursor.as_deref()),
            lenient_size(params.size.as_deref()),
        )
        .await?;
    Ok(Json(page))
}

#[instrument(level = "error", skip_all, fields(trace_id = params.trace_id), err(Debug))]
pub(crate) async fn list_logs_get(
    State(app_state): State<AppState>,
    Query(params): Query<TraceScopedParams>,
) -> Result<Json<Page<Log>>, ApiError> {
    let page = app_state
        .queries
        .list_trace_logs(
            params.trace_id,
            lenient_cursor(params.cursor.as_deref()),
            lenient_size(params.size.as_deref()),
        )
        .await?;
    Ok(Json(page))
}

#[instrument(level = "error", skip_all, err(Debug))]
pub(crate) async fn collect_span_post(
    State(app_state): State<AppState>,
    Json(span): Json<NewSpan>,
) -> Result<Json<Value>, ApiError> {
    app_state.ingestor.ingest_span(&span).await?;
    Ok(collected())
}

#[instrument(level = "error", skip_all, err(Debug))]
pub(crate) async fn collect_spans_post(
    State(app_state): State<AppState>,
    Json(spans): Json<Vec<NewSpan>>,
) -> Result<Json<Value>, ApiError> {
    app_state.ingestor.ingest_spans(&spans).await?;
    Ok(collected())
}

#[instrument(level = "error", skip_all, err(Debug))]
pub(crate) async fn collect_log_post(
    State(app_state): State<AppState>,
    Json(log): Json<Log>,
) -> Result<Json<Value>, ApiError> {
    app_state.ingestor.ingest_log(&log).await?;
    Ok(collected())
}

#[instrument(level = "error", skip_all, err(Debug))]
pub(crate) async fn collect_logs_post(
    State(app_state): State<AppState>,
    Json(logs): Json<Vec<Log>>,
) -> Result<Json<Value>, ApiError> {
    app_state.ingestor.ingest_logs(&logs).await?;
    Ok(collected())
}

/// Single trace, in the Jaeger query API envelope.
#[instrument(level = "error", skip_all, fields(trace_id = trace_id), err(Debug))]
pub(crate) async fn trace_get(
    State(app_state): State<AppState>,
    Path(trace_id): Path<u64>,
) -> Result<Json<PagedResponse<TraceView>>, ApiError> {
    let view = app_state.assembler.assemble_trace(trace_id).await?;
    Ok(Json(PagedResponse::new(vec![view], 0)))
}

/// Jaeger search: the newest matching traces, fully assembled.
#[instrument(level = "error", skip_all, err(Debug))]
pub(crate) async fn traces_search_get(
    State(app_state): State<AppState>,
    Query(params): Query<SearchTracesParams>,
) -> Result<Json<PagedResponse<TraceView>>, ApiError> {
    let condition = TraceQueryCondition {
        min_duration: params.min_duration,
        max_duration: params.max_duration,
        begin_ts: params.begin_ts,
        end_ts: params.end_ts,
        finished: params.finished,
    };
    let page = app_state
        .assembler
        .list_assembled_traces(Some(&condition), params.limit)
        .await?;
    let limit = u32::try_from(page.content.len()).unwrap_or(u32::MAX);
    Ok(Json(PagedResponse::new(
        page.content,
        params.limit.unwrap_or(limit),
    )))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn garbage_paging_params_are_ignored() {
        assert_eq!(lenient_cursor(Some("42")), Some(Cursor::after(42)));
        assert_eq!(lenient_cursor(Some("abc")), None);
        assert_eq!(lenient_cursor(None), None);
        assert_eq!(lenient_size(Some(" 5 ")), Some(5));
        assert_eq!(lenient_size(Some("-5")), None);
    }
}
