use crate::{KeyValues, SpanId, TraceId};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use serde_with::DisplayFromStr;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Summary of a trace, projected from its root span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub name: String,
    pub start_timestamp: i64,
    pub duration: i64,
    pub finished: bool,
    pub version: u32,
}

/// A span as stored, after merging every report received for its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub trace_id: TraceId,
    pub name: String,
    pub start_timestamp: i64,
    pub duration: i64,
    pub tags: KeyValues,
    pub finished: bool,
    pub version: u32,
}

/// Points right after the last row of a page. Only meaningful to the scan that produced it.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(#[serde_as(as = "DisplayFromStr")] u64);

impl Cursor {
    pub fn after(last_id: u64) -> Self {
        Self(last_id)
    }
    pub fn last_id(&self) -> u64 {
        self.0
    }
}

impl Display for Cursor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub cursor: Option<Cursor>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            content: vec![],
            cursor: None,
        }
    }

    /// Builds a page out of at most `limit` rows returned by a keyset scan.
    ///
    /// A page shorter than `limit` is the last one. A full page always gets a cursor,
    /// even when nothing follows it, since the scan can't know that cheaply.
    pub fn from_keyset_rows(rows: Vec<T>, limit: u32, id_of: impl Fn(&T) -> u64) -> Self {
        let full = u32::try_from(rows.len()).map_or(true, |len| len >= limit);
        let cursor = match rows.last() {
            Some(last) if full => Some(Cursor::after(id_of(last))),
            _ => None,
        };
        Self {
            content: rows,
            cursor,
        }
    }
}

/// Filters for trace listings. Every present field narrows the result (logical AND).
/// Durations and timestamps are microseconds, ranges are half-open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceQueryCondition {
    pub min_duration: Option<i64>,
    pub max_duration: Option<i64>,
    pub begin_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub finished: Option<bool>,
}

impl TraceQueryCondition {
    pub fn matches(&self, trace: &Trace) -> bool {
        self.finished.map_or(true, |f| trace.finished == f)
            && self.min_duration.map_or(true, |min| trace.duration >= min)
            && self.max_duration.map_or(true, |max| trace.duration < max)
            && self.begin_ts.map_or(true, |begin| trace.start_timestamp >= begin)
            && self.end_ts.map_or(true, |end| trace.start_timestamp < end)
    }
}
