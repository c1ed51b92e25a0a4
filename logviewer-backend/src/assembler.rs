//! Rebuilds whole traces from their span and log rows, in the shape the Jaeger UI reads.
use crate::error::LogviewerError;
use crate::query::QueryEngine;
use api_structs::jaeger::{
    FieldView, LogView, ProcessView, ReferenceView, SpanView, TraceView, PROCESS_ID,
};
use api_structs::{Cursor, KeyValues, Log, Page, Span, TraceQueryCondition};
use std::collections::HashMap;
use tracing::{instrument, warn};

/// Most spans, and separately most logs, a single assembled trace holds.
pub const ASSEMBLY_FETCH_LIMIT: u32 = 1000;

fn fields_of(values: KeyValues) -> Vec<FieldView> {
    values
        .into_iter()
        .map(|(key, value)| FieldView::string(key, value))
        .collect()
}

fn span_view(span: Span, logs: Vec<LogView>) -> SpanView {
    SpanView {
        trace_id: span.trace_id.to_string(),
        span_id: span.id.to_string(),
        operation_name: span.name,
        references: span
            .parent_id
            .map(|parent_id| ReferenceView::child_of(span.trace_id, parent_id))
            .into_iter()
            .collect(),
        start_time: span.start_timestamp,
        duration: span.duration,
        tags: fields_of(span.tags),
        logs,
        process_id: PROCESS_ID.to_string(),
        flags: 1,
    }
}

/// Which scans had rows left beyond [`ASSEMBLY_FETCH_LIMIT`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Truncation {
    spans: bool,
    logs: bool,
}

fn build_view(
    trace_id: u64,
    spans: Vec<Span>,
    logs: Vec<Log>,
    truncation: Truncation,
) -> TraceView {
    let mut warnings = vec![];
    if truncation.spans {
        warn!(trace_id, "Trace has more than {ASSEMBLY_FETCH_LIMIT} spans, truncating");
        warnings.push(format!("spans truncated to the first {ASSEMBLY_FETCH_LIMIT}"));
    }
    if truncation.logs {
        warn!(trace_id, "Trace has more than {ASSEMBLY_FETCH_LIMIT} logs, truncating");
        warnings.push(format!("logs truncated to the first {ASSEMBLY_FETCH_LIMIT}"));
    }
    let mut logs_by_span = logs.into_iter().fold(
        HashMap::<u64, Vec<LogView>>::new(),
        |mut acc, log| {
            acc.entry(log.span_id).or_default().push(LogView {
                timestamp: log.timestamp,
                fields: fields_of(log.fields),
            });
            acc
        },
    );
    let spans = spans
        .into_iter()
        .map(|span| {
            let logs = logs_by_span.remove(&span.id).unwrap_or_default();
            span_view(span, logs)
        })
        .collect();
    TraceView {
        trace_id: trace_id.to_string(),
        spans,
        processes: ProcessView::synthetic(),
        warnings: (!warnings.is_empty()).then_some(warnings),
    }
}

#[derive(Clone)]
pub struct TraceAssembler {
    queries: QueryEngine,
}

impl TraceAssembler {
    pub fn new(queries: QueryEngine) -> Self {
        Self { queries }
    }

    /// A trace nobody reported spans for comes back as a view with no spans.
    #[instrument(skip_all, fields(trace_id = trace_id))]
    pub async fn assemble_trace(&self, trace_id: u64) -> Result<TraceView, LogviewerError> {
        let (spans, logs) = tokio::try_join!(
            self.queries
                .list_trace_spans(trace_id, None, Some(ASSEMBLY_FETCH_LIMIT)),
            self.queries
                .list_trace_logs(trace_id, None, Some(ASSEMBLY_FETCH_LIMIT)),
        )?;
        // a full page only means truncation if something follows it
        let (spans_truncated, logs_truncated) = tokio::try_join!(
            self.spans_follow(trace_id, spans.cursor),
            self.logs_follow(trace_id, logs.cursor),
        )?;
        let truncation = Truncation {
            spans: spans_truncated,
            logs: logs_truncated,
        };
        Ok(build_view(trace_id, spans.content, logs.content, truncation))
    }

    async fn spans_follow(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
    ) -> Result<bool, LogviewerError> {
        let Some(cursor) = cursor else {
            return Ok(false);
        };
        let next = self
            .queries
            .list_trace_spans(trace_id, Some(cursor), Some(1))
            .await?;
        Ok(!next.content.is_empty())
    }

    async fn logs_follow(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
    ) -> Result<bool, LogviewerError> {
        let Some(cursor) = cursor else {
            return Ok(false);
        };
        let next = self
            .queries
            .list_trace_logs(trace_id, Some(cursor), Some(1))
            .await?;
        Ok(!next.content.is_empty())
    }

    /// Lists traces like [`QueryEngine::list_traces`] and expands every one of them.
    #[instrument(skip_all, fields(page_size = ?page_size))]
    pub async fn list_assembled_traces(
        &self,
        condition: Option<&TraceQueryCondition>,
        page_size: Option<u32>,
    ) -> Result<Page<TraceView>, LogviewerError> {
        let traces = self.queries.list_traces(condition, None, page_size).await?;
        let views = futures::future::try_join_all(
            traces
                .content
                .iter()
                .map(|trace| self.assemble_trace(trace.id)),
        )
        .await?;
        Ok(Page {
            content: views,
            cursor: traces.cursor,
        })
    }
}
