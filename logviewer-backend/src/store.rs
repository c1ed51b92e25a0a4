//! Durable keyed storage for the three record kinds.
//!
//! Writers never lock rows. Traces and spans carry a `version` and are only ever
//! changed through a compare-and-swap on it, logs are insert-only. Scans are keyset
//! paginated on `id`: traces newest first, spans and logs oldest first.
use crate::error::StorageError;
use api_structs::{Cursor, Log, Page, Span, Trace, TraceQueryCondition};
use async_trait::async_trait;

pub mod memory;
pub mod postgres;

/// Largest id every back-end can index, ids are stored as signed 64 bit keys.
pub const MAX_STORABLE_ID: u64 = i64::MAX as u64;

/// The only fields that may change after a trace or span row is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub duration: i64,
    pub finished: bool,
}

impl Progress {
    pub fn of_trace(trace: &Trace) -> Self {
        Self {
            duration: trace.duration,
            finished: trace.finished,
        }
    }
    pub fn of_span(span: &Span) -> Self {
        Self {
            duration: span.duration,
            finished: span.finished,
        }
    }
}

#[async_trait]
pub trait RowStore: Send + Sync + 'static {
    async fn get_trace(&self, id: u64) -> Result<Option<Trace>, StorageError>;
    /// Returns false if a trace with the same id already exists, leaving it untouched.
    async fn insert_trace_if_absent(&self, trace: &Trace) -> Result<bool, StorageError>;
    /// Sets the progress and bumps the version, only if the stored version is still
    /// `expected_version`. Returns false otherwise.
    async fn update_trace_if_version(
        &self,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError>;
    /// Traces matching `condition`, descending by id, strictly below the cursor.
    async fn scan_traces(
        &self,
        condition: &TraceQueryCondition,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Trace>, StorageError>;

    async fn get_span(&self, id: u64) -> Result<Option<Span>, StorageError>;
    async fn insert_span_if_absent(&self, span: &Span) -> Result<bool, StorageError>;
    async fn update_span_if_version(
        &self,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError>;
    /// Spans of one trace, ascending by id, strictly above the cursor.
    async fn scan_trace_spans(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Span>, StorageError>;

    async fn get_log(&self, id: u64) -> Result<Option<Log>, StorageError>;
    async fn insert_log_if_absent(&self, log: &Log) -> Result<bool, StorageError>;
    /// Logs of one trace, ascending by id, strictly above the cursor.
    async fn scan_trace_logs(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Log>, StorageError>;
}
