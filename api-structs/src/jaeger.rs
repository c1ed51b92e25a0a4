//! Read model understood by the Jaeger UI.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PROCESS_ID: &str = "tracing";
pub const SERVICE_NAME: &str = "trace";
pub const CHILD_OF: &str = "CHILD_OF";
pub const STRING_FIELD: &str = "string";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceView {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    pub spans: Vec<SpanView>,
    pub processes: BTreeMap<String, ProcessView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanView {
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
    pub operation_name: String,
    pub references: Vec<ReferenceView>,
    pub start_time: i64,
    pub duration: i64,
    pub tags: Vec<FieldView>,
    pub logs: Vec<LogView>,
    #[serde(rename = "processID")]
    pub process_id: String,
    pub flags: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceView {
    #[serde(rename = "refType")]
    pub ref_type: String,
    #[serde(rename = "traceID")]
    pub trace_id: String,
    #[serde(rename = "spanID")]
    pub span_id: String,
}

impl ReferenceView {
    pub fn child_of(trace_id: u64, parent_id: u64) -> Self {
        Self {
            ref_type: CHILD_OF.to_string(),
            trace_id: trace_id.to_string(),
            span_id: parent_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldView {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub value_type: String,
}

impl FieldView {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            value_type: STRING_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogView {
    pub timestamp: i64,
    pub fields: Vec<FieldView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessView {
    pub service_name: String,
    pub tags: Vec<FieldView>,
}

impl ProcessView {
    /// Every span is attributed to this one process, since reporters don't send process metadata.
    pub fn synthetic() -> BTreeMap<String, ProcessView> {
        BTreeMap::from([(
            PROCESS_ID.to_string(),
            ProcessView {
                service_name: SERVICE_NAME.to_string(),
                tags: vec![],
            },
        )])
    }
}

/// Envelope of the Jaeger query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResponse<T> {
    pub data: Vec<T>,
    pub total: u32,
    pub limit: u32,
    pub offset: u32,
    pub errors: Option<Vec<String>>,
}

impl<T> PagedResponse<T> {
    pub fn new(data: Vec<T>, limit: u32) -> Self {
        Self {
            total: u32::try_from(data.len()).unwrap_or(u32::MAX),
            data,
            limit,
            offset: 0,
            errors: None,
        }
    }
}
