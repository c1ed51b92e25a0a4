use crate::error::StorageError;
use crate::store::{Progress, RowStore};
use api_structs::{Cursor, Log, Page, Span, Trace, TraceQueryCondition};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tracing::trace;

/// Process local [`RowStore`], used by tests and by `--storage memory`.
///
/// Each table sits behind its own lock, held only for a single primitive, so
/// concurrent writers still race exactly like they would against a database.
#[derive(Default)]
pub struct MemoryRowStore {
    traces: RwLock<BTreeMap<u64, Trace>>,
    spans: RwLock<TraceScopedTable<Span>>,
    logs: RwLock<TraceScopedTable<Log>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

trait TraceScoped: Clone {
    fn id(&self) -> u64;
    fn trace_id(&self) -> u64;
}

impl TraceScoped for Span {
    fn id(&self) -> u64 {
        self.id
    }
    fn trace_id(&self) -> u64 {
        self.trace_id
    }
}

impl TraceScoped for Log {
    fn id(&self) -> u64 {
        self.id
    }
    fn trace_id(&self) -> u64 {
        self.trace_id
    }
}

/// Rows by id plus a (trace_id, id) index, the in-memory twin of the trace_id indexes.
struct TraceScopedTable<R> {
    rows: BTreeMap<u64, R>,
    by_trace: BTreeSet<(u64, u64)>,
}

impl<R> Default for TraceScopedTable<R> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            by_trace: BTreeSet::new(),
        }
    }
}

impl<R: TraceScoped> TraceScopedTable<R> {
    fn insert_if_absent(&mut self, row: &R) -> bool {
        if self.rows.contains_key(&row.id()) {
            return false;
        }
        self.by_trace.insert((row.trace_id(), row.id()));
        self.rows.insert(row.id(), row.clone());
        true
    }

    fn scan(&self, trace_id: u64, cursor: Option<Cursor>, limit: u32) -> Page<R> {
        let lower = match cursor {
            None => Bound::Included((trace_id, 0)),
            Some(cursor) => Bound::Excluded((trace_id, cursor.last_id())),
        };
        let rows: Vec<R> = self
            .by_trace
            .range((lower, Bound::Included((trace_id, u64::MAX))))
            .take(limit as usize)
            .filter_map(|(_trace_id, id)| self.rows.get(id).cloned())
            .collect();
        Page::from_keyset_rows(rows, limit, |r| r.id())
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn get_trace(&self, id: u64) -> Result<Option<Trace>, StorageError> {
        Ok(self.traces.read().get(&id).cloned())
    }

    async fn insert_trace_if_absent(&self, trace: &Trace) -> Result<bool, StorageError> {
        let mut traces = self.traces.write();
        if traces.contains_key(&trace.id) {
            return Ok(false);
        }
        traces.insert(trace.id, trace.clone());
        Ok(true)
    }

    async fn update_trace_if_version(
        &self,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError> {
        let mut traces = self.traces.write();
        match traces.get_mut(&id) {
            Some(stored) if stored.version == expected_version => {
                stored.duration = progress.duration;
                stored.finished = progress.finished;
                stored.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_traces(
        &self,
        condition: &TraceQueryCondition,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Trace>, StorageError> {
        let upper = cursor.map_or(Bound::Unbounded, |c| Bound::Excluded(c.last_id()));
        let traces = self.traces.read();
        let rows: Vec<Trace> = traces
            .range((Bound::Unbounded, upper))
            .rev()
            .map(|(_id, trace)| trace)
            .filter(|trace| condition.matches(trace))
            .take(limit as usize)
            .cloned()
            .collect();
        trace!("Scanned {} traces", rows.len());
        Ok(Page::from_keyset_rows(rows, limit, |t| t.id))
    }

    async fn get_span(&self, id: u64) -> Result<Option<Span>, StorageError> {
        Ok(self.spans.read().rows.get(&id).cloned())
    }

    async fn insert_span_if_absent(&self, span: &Span) -> Result<bool, StorageError> {
        Ok(self.spans.write().insert_if_absent(span))
    }

    async fn update_span_if_version(
        &self,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError> {
        let mut spans = self.spans.write();
        match spans.rows.get_mut(&id) {
            Some(stored) if stored.version == expected_version => {
                stored.duration = progress.duration;
                stored.finished = progress.finished;
                stored.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_trace_spans(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Span>, StorageError> {
        Ok(self.spans.read().scan(trace_id, cursor, limit))
    }

    async fn get_log(&self, id: u64) -> Result<Option<Log>, StorageError> {
        Ok(self.logs.read().rows.get(&id).cloned())
    }

    async fn insert_log_if_absent(&self, log: &Log) -> Result<bool, StorageError> {
        Ok(self.logs.write().insert_if_absent(log))
    }

    async fn scan_trace_logs(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Log>, StorageError> {
        Ok(self.logs.read().scan(trace_id, cursor, limit))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeMap;

    fn span(id: u64, trace_id: u64) -> Span {
        Span {
            id,
            parent_id: Some(trace_id),
            trace_id,
            name: format!("span {id}"),
            start_timestamp: 100,
            duration: 0,
            tags: BTreeMap::new(),
            finished: false,
            version: 1,
        }
    }

    #[tokio::test]
    async fn cas_only_succeeds_on_current_version() {
        let store = MemoryRowStore::new();
        assert!(store.insert_span_if_absent(&span(1, 1)).await.unwrap());
        assert!(!store.insert_span_if_absent(&span(1, 9)).await.unwrap());
        let progress = Progress {
            duration: 10,
            finished: true,
        };
        assert!(store.update_span_if_version(1, 1, progress).await.unwrap());
        assert!(!store.update_span_if_version(1, 1, progress).await.unwrap());
        assert!(!store.update_span_if_version(2, 1, progress).await.unwrap());
        let stored = store.get_span(1).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.trace_id, 1);
        assert_eq!(Progress::of_span(&stored), progress);
    }

    #[tokio::test]
    async fn span_scan_stays_inside_its_trace() {
        let store = MemoryRowStore::new();
        for (id, trace_id) in [(1, 1), (2, 2), (3, 1), (4, 2), (5, 1)] {
            store.insert_span_if_absent(&span(id, trace_id)).await.unwrap();
        }
        let first = store.scan_trace_spans(1, None, 2).await.unwrap();
        let ids: Vec<u64> = first.content.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(first.cursor, Some(Cursor::after(3)));
        let second = store.scan_trace_spans(1, first.cursor, 2).await.unwrap();
        let ids: Vec<u64> = second.content.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5]);
        assert_eq!(second.cursor, None);
        let unknown = store.scan_trace_spans(3, None, 2).await.unwrap();
        assert!(unknown.content.is_empty());
    }

    #[tokio::test]
    async fn trace_scan_is_newest_first() {
        let store = MemoryRowStore::new();
        for id in 1..=3 {
            store
                .insert_trace_if_absent(&Trace {
                    id,
                    name: "root".to_string(),
                    start_timestamp: 100,
                    duration: id as i64,
                    finished: false,
                    version: 1,
                })
                .await
                .unwrap();
        }
        let page = store
            .scan_traces(&TraceQueryCondition::default(), Some(Cursor::after(3)), 5)
            .await
            .unwrap();
        let ids: Vec<u64> = page.content.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(page.cursor, None);
    }

    #[tokio::test]
    async fn logs_are_insert_only() {
        let store = MemoryRowStore::new();
        let log = Log {
            id: 10,
            timestamp: 150,
            trace_id: 1,
            span_id: 2,
            fields: BTreeMap::from([("event".to_string(), "x".to_string())]),
        };
        assert!(store.insert_log_if_absent(&log).await.unwrap());
        let rewritten = Log {
            timestamp: 999,
            ..log.clone()
        };
        assert!(!store.insert_log_if_absent(&rewritten).await.unwrap());
        assert_eq!(store.get_log(10).await.unwrap(), Some(log));
        assert_eq!(store.get_log(11).await.unwrap(), None);
    }
}
