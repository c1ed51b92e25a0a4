use crate::{KeyValues, LogId, SpanId, TraceId};
use serde::{Deserialize, Serialize};

/// A span report as sent by an instrumented service.
///
/// The same span is usually reported more than once: first unfinished, then
/// again with its final duration. Timestamps and durations are microseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSpan {
    pub id: SpanId,
    #[serde(default)]
    pub parent_id: Option<SpanId>,
    pub trace_id: TraceId,
    pub name: String,
    #[serde(alias = "timestamp")]
    pub start_timestamp: i64,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub tags: KeyValues,
    #[serde(default)]
    pub finished: bool,
}

impl NewSpan {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// A log line emitted inside a span. Logs are immutable facts, identified by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub id: LogId,
    pub timestamp: i64,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(default)]
    pub fields: KeyValues,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn span_report_accepts_legacy_timestamp_name_and_defaults() {
        let span: NewSpan = serde_json::from_str(
            r#"{"id":3,"trace_id":1,"parent_id":1,"name":"db query","timestamp":120}"#,
        )
        .unwrap();
        assert_eq!(span.start_timestamp, 120);
        assert_eq!(span.duration, 0);
        assert!(!span.finished);
        assert!(span.tags.is_empty());
        assert!(!span.is_root());
    }
}
