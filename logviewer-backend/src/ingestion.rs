//! Merges span and log reports into the [`RowStore`].
//!
//! Trace and span rows follow the same monotonic merge: identity fields are set once
//! at insert, progress (`duration`, `finished`) follows the report with the latest
//! `start_timestamp`, and every change goes through a version compare-and-swap.
use crate::error::{LogviewerError, RecordKind, StorageError};
use crate::store::{Progress, RowStore, MAX_STORABLE_ID};
use api_structs::{Log, NewSpan, Span, Trace};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Read-merge-CAS cycles tried before giving up with a conflict.
pub const MAX_MERGE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
    /// Report carried the progress already on record.
    Unchanged,
    /// Report describes an earlier observation than the stored one, discarded.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanIngestion {
    /// Only root spans touch their trace row.
    pub trace: Option<MergeOutcome>,
    pub span: MergeOutcome,
}

#[async_trait]
trait MergeTarget: Sized + Send + Sync {
    const KIND: RecordKind;

    fn key(&self) -> u64;
    fn start_timestamp(&self) -> i64;
    fn version(&self) -> u32;
    fn progress(&self) -> Progress;

    async fn load(store: &dyn RowStore, id: u64) -> Result<Option<Self>, StorageError>;
    async fn insert_if_absent(&self, store: &dyn RowStore) -> Result<bool, StorageError>;
    async fn update_if_version(
        store: &dyn RowStore,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError>;
}

#[async_trait]
impl MergeTarget for Trace {
    const KIND: RecordKind = RecordKind::Trace;

    fn key(&self) -> u64 {
        self.id
    }
    fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn progress(&self) -> Progress {
        Progress::of_trace(self)
    }

    async fn load(store: &dyn RowStore, id: u64) -> Result<Option<Self>, StorageError> {
        store.get_trace(id).await
    }
    async fn insert_if_absent(&self, store: &dyn RowStore) -> Result<bool, StorageError> {
        store.insert_trace_if_absent(self).await
    }
    async fn update_if_version(
        store: &dyn RowStore,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError> {
        store
            .update_trace_if_version(id, expected_version, progress)
            .await
    }
}

#[async_trait]
impl MergeTarget for Span {
    const KIND: RecordKind = RecordKind::Span;

    fn key(&self) -> u64 {
        self.id
    }
    fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }
    fn version(&self) -> u32 {
        self.version
    }
    fn progress(&self) -> Progress {
        Progress::of_span(self)
    }

    async fn load(store: &dyn RowStore, id: u64) -> Result<Option<Self>, StorageError> {
        store.get_span(id).await
    }
    async fn insert_if_absent(&self, store: &dyn RowStore) -> Result<bool, StorageError> {
        store.insert_span_if_absent(self).await
    }
    async fn update_if_version(
        store: &dyn RowStore,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError> {
        store
            .update_span_if_version(id, expected_version, progress)
            .await
    }
}

async fn merge<R: MergeTarget>(
    store: &dyn RowStore,
    incoming: &R,
) -> Result<MergeOutcome, LogviewerError> {
    let id = incoming.key();
    let kind = R::KIND;
    for attempt in 1..=MAX_MERGE_ATTEMPTS {
        match R::load(store, id).await? {
            None => {
                if incoming.insert_if_absent(store).await? {
                    return Ok(MergeOutcome::Created);
                }
                warn!(%kind, id, attempt, "Lost insert race");
            }
            Some(stored) if incoming.start_timestamp() < stored.start_timestamp() => {
                return Ok(MergeOutcome::Stale);
            }
            Some(stored) if incoming.progress() == stored.progress() => {
                return Ok(MergeOutcome::Unchanged);
            }
            Some(stored) => {
                if R::update_if_version(store, id, stored.version(), incoming.progress()).await? {
                    return Ok(MergeOutcome::Updated);
                }
                warn!(
                    %kind,
                    id,
                    attempt,
                    expected_version = stored.version(),
                    "Lost version race"
                );
            }
        }
    }
    Err(LogviewerError::ConcurrentUpdateConflict {
        kind,
        id,
        attempts: MAX_MERGE_ATTEMPTS,
    })
}

fn log_outcome(kind: RecordKind, id: u64, outcome: MergeOutcome) {
    match outcome {
        MergeOutcome::Created | MergeOutcome::Updated => {
            info!(%kind, id, ?outcome, "Merged report")
        }
        MergeOutcome::Unchanged => debug!(%kind, id, "Report carried no new progress"),
        MergeOutcome::Stale => debug!(%kind, id, "Discarded stale report"),
    }
}

fn ensure_storable(kind: RecordKind, field: &str, id: u64) -> Result<(), LogviewerError> {
    if id > MAX_STORABLE_ID {
        return Err(LogviewerError::InvalidRecord {
            kind,
            reason: format!("{field} {id} is above {MAX_STORABLE_ID}"),
        });
    }
    Ok(())
}

fn validate_span(span: &NewSpan) -> Result<(), LogviewerError> {
    ensure_storable(RecordKind::Span, "id", span.id)?;
    ensure_storable(RecordKind::Span, "trace_id", span.trace_id)?;
    if let Some(parent_id) = span.parent_id {
        ensure_storable(RecordKind::Span, "parent_id", parent_id)?;
    }
    Ok(())
}

fn validate_log(log: &Log) -> Result<(), LogviewerError> {
    ensure_storable(RecordKind::Log, "id", log.id)?;
    ensure_storable(RecordKind::Log, "trace_id", log.trace_id)?;
    ensure_storable(RecordKind::Log, "span_id", log.span_id)
}

/// The trace row a root span projects to.
fn trace_of_root(span: &NewSpan) -> Trace {
    Trace {
        id: span.trace_id,
        name: span.name.clone(),
        start_timestamp: span.start_timestamp,
        duration: span.duration,
        finished: span.finished,
        version: 1,
    }
}

fn span_of_report(span: &NewSpan) -> Span {
    Span {
        id: span.id,
        parent_id: span.parent_id,
        trace_id: span.trace_id,
        name: span.name.clone(),
        start_timestamp: span.start_timestamp,
        duration: span.duration,
        tags: span.tags.clone(),
        finished: span.finished,
        version: 1,
    }
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn RowStore>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    #[instrument(skip_all, fields(span_id = span.id, trace_id = span.trace_id))]
    pub async fn ingest_span(&self, span: &NewSpan) -> Result<SpanIngestion, LogviewerError> {
        validate_span(span)?;
        let trace = if span.is_root() {
            let outcome = merge(self.store.as_ref(), &trace_of_root(span)).await?;
            log_outcome(RecordKind::Trace, span.trace_id, outcome);
            Some(outcome)
        } else {
            None
        };
        let outcome = merge(self.store.as_ref(), &span_of_report(span)).await?;
        log_outcome(RecordKind::Span, span.id, outcome);
        Ok(SpanIngestion {
            trace,
            span: outcome,
        })
    }

    /// Applies every report in order, stopping at the first error. Spans merged
    /// before the failing one stay merged.
    #[instrument(skip_all, fields(len = spans.len()))]
    pub async fn ingest_spans(
        &self,
        spans: &[NewSpan],
    ) -> Result<Vec<SpanIngestion>, LogviewerError> {
        info!("Ingesting {} spans", spans.len());
        let mut outcomes = Vec::with_capacity(spans.len());
        for span in spans {
            outcomes.push(self.ingest_span(span).await?);
        }
        Ok(outcomes)
    }

    /// Returns false if a log with the same id was already stored.
    #[instrument(skip_all, fields(log_id = log.id, trace_id = log.trace_id))]
    pub async fn ingest_log(&self, log: &Log) -> Result<bool, LogviewerError> {
        validate_log(log)?;
        let created = self.store.insert_log_if_absent(log).await?;
        if !created {
            debug!("Log already stored");
        }
        Ok(created)
    }

    /// Returns how many logs were newly stored.
    #[instrument(skip_all, fields(len = logs.len()))]
    pub async fn ingest_logs(&self, logs: &[Log]) -> Result<usize, LogviewerError> {
        info!("Ingesting {} logs", logs.len());
        let mut created = 0;
        for log in logs {
            if self.ingest_log(log).await? {
                created += 1;
            }
        }
        Ok(created)
    }
}
