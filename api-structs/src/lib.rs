use std::collections::BTreeMap;
pub mod collector;
pub mod jaeger;
pub mod query;

pub use collector::{Log, NewSpan};
pub use query::{Cursor, Page, Span, Trace, TraceQueryCondition};

pub type TraceId = u64;
pub type SpanId = u64;
pub type LogId = u64;

/// Free-form key/values attached to spans (tags) and logs (fields).
/// Ordered so every rendering of the same record is identical.
pub type KeyValues = BTreeMap<String, String>;
