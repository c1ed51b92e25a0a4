use crate::error::LogviewerError;
use crate::store::RowStore;
use api_structs::{Cursor, Log, Page, Span, Trace, TraceQueryCondition};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 1000;

fn resolve_page_size(page_size: Option<u32>) -> Result<u32, LogviewerError> {
    match page_size {
        None => Ok(DEFAULT_PAGE_SIZE),
        Some(size) if (1..=MAX_PAGE_SIZE).contains(&size) => Ok(size),
        Some(size) => Err(LogviewerError::InvalidFilter(format!(
            "page size {size} is outside 1..={MAX_PAGE_SIZE}"
        ))),
    }
}

fn validate_condition(condition: &TraceQueryCondition) -> Result<(), LogviewerError> {
    for (name, duration) in [
        ("min_duration", condition.min_duration),
        ("max_duration", condition.max_duration),
    ] {
        if let Some(duration) = duration.filter(|d| *d < 0) {
            return Err(LogviewerError::InvalidFilter(format!(
                "{name} can't be negative, got {duration}"
            )));
        }
    }
    if let (Some(min), Some(max)) = (condition.min_duration, condition.max_duration) {
        if min > max {
            return Err(LogviewerError::InvalidFilter(format!(
                "min_duration {min} is above max_duration {max}"
            )));
        }
    }
    if let (Some(begin), Some(end)) = (condition.begin_ts, condition.end_ts) {
        if begin > end {
            return Err(LogviewerError::InvalidFilter(format!(
                "begin_ts {begin} is after end_ts {end}"
            )));
        }
    }
    Ok(())
}

/// Paginated reads over the row store. Unknown ids give empty pages, never errors.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<dyn RowStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<dyn RowStore>) -> Self {
        Self { store }
    }

    /// Newest traces first. An absent condition filters nothing.
    #[instrument(skip_all, fields(condition = ?condition, cursor = ?cursor, page_size = ?page_size))]
    pub async fn list_traces(
        &self,
        condition: Option<&TraceQueryCondition>,
        cursor: Option<Cursor>,
        page_size: Option<u32>,
    ) -> Result<Page<Trace>, LogviewerError> {
        let limit = resolve_page_size(page_size)?;
        let unfiltered = TraceQueryCondition::default();
        let condition = condition.unwrap_or(&unfiltered);
        validate_condition(condition)?;
        let page = self.store.scan_traces(condition, cursor, limit).await?;
        debug!("Listed {} traces", page.content.len());
        Ok(page)
    }

    #[instrument(skip_all, fields(trace_id = trace_id, cursor = ?cursor, page_size = ?page_size))]
    pub async fn list_trace_spans(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        page_size: Option<u32>,
    ) -> Result<Page<Span>, LogviewerError> {
        let limit = resolve_page_size(page_size)?;
        Ok(self.store.scan_trace_spans(trace_id, cursor, limit).await?)
    }

    #[instrument(skip_all, fields(trace_id = trace_id, cursor = ?cursor, page_size = ?page_size))]
    pub async fn list_trace_logs(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        page_size: Option<u32>,
    ) -> Result<Page<Log>, LogviewerError> {
        let limit = resolve_page_size(page_size)?;
        Ok(self.store.scan_trace_logs(trace_id, cursor, limit).await?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ingestion::Ingestor;
    use crate::store::memory::MemoryRowStore;
    use api_structs::{KeyValues, NewSpan};
    use tracing_config_helper::setup_tracing_console_logging_for_test;

    fn root(trace_id: u64, start_timestamp: i64, duration: i64, finished: bool) -> NewSpan {
        NewSpan {
            id: trace_id,
            parent_id: None,
            trace_id,
            name: format!("trace {trace_id}"),
            start_timestamp,
            duration,
            tags: KeyValues::new(),
            finished,
        }
    }

    async fn setup() -> (Ingestor, QueryEngine) {
        setup_tracing_console_logging_for_test();
        let store: Arc<dyn RowStore> = Arc::new(MemoryRowStore::new());
        (Ingestor::new(store.clone()), QueryEngine::new(store))
    }

    #[tokio::test]
    async fn min_duration_finds_finished_trace() {
        let (ingestor, engine) = setup().await;
        ingestor.ingest_span(&root(1, 100, 0, false)).await.unwrap();
        ingestor.ingest_span(&root(1, 100, 50, true)).await.unwrap();
        ingestor.ingest_span(&root(2, 100, 30, true)).await.unwrap();
        let condition = TraceQueryCondition {
            min_duration: Some(40),
            ..Default::default()
        };
        let page = engine
            .list_traces(Some(&condition), None, Some(10))
            .await
            .unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].id, 1);
        assert_eq!(page.content[0].version, 2);
        assert_eq!(page.cursor, None);
    }

    #[tokio::test]
    async fn following_cursors_visits_every_match_once() {
        let (ingestor, engine) = setup().await;
        for trace_id in 1..=25 {
            let duration = i64::try_from(trace_id).unwrap();
            ingestor
                .ingest_span(&root(trace_id, 100, duration, trace_id % 2 == 0))
                .await
                .unwrap();
        }
        let condition = TraceQueryCondition {
            finished: Some(true),
            ..Default::default()
        };
        let mut seen = vec![];
        let mut cursor = None;
        let mut pages = 0;
        loop {
            let page = engine
                .list_traces(Some(&condition), cursor, Some(4))
                .await
                .unwrap();
            pages += 1;
            seen.extend(page.content.iter().map(|t| t.id));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let expected: Vec<u64> = (1..=25).rev().filter(|id| id % 2 == 0).collect();
        assert_eq!(seen, expected);
        // 12 matches in pages of 4, the last full page is followed by an empty one
        assert_eq!(pages, 4);
    }

    #[tokio::test]
    async fn span_listing_defaults_to_twenty() {
        let (ingestor, engine) = setup().await;
        ingestor.ingest_span(&root(1, 100, 0, false)).await.unwrap();
        for id in 2..=30 {
            let mut child = root(1, 100, 0, false);
            child.id = id;
            child.parent_id = Some(1);
            ingestor.ingest_span(&child).await.unwrap();
        }
        let first = engine.list_trace_spans(1, None, None).await.unwrap();
        assert_eq!(first.content.len(), DEFAULT_PAGE_SIZE as usize);
        assert_eq!(first.cursor, Some(Cursor::after(20)));
        let rest = engine
            .list_trace_spans(1, first.cursor, None)
            .await
            .unwrap();
        let ids: Vec<u64> = rest.content.iter().map(|s| s.id).collect();
        assert_eq!(ids, (21..=30).collect::<Vec<u64>>());
        assert_eq!(rest.cursor, None);
        let logs = engine.list_trace_logs(1, None, None).await.unwrap();
        assert_eq!(logs, Page::empty());
    }

    #[tokio::test]
    async fn log_listing_pages_through_one_trace() {
        let (ingestor, engine) = setup().await;
        let logs: Vec<Log> = (1..=11)
            .map(|id| Log {
                id,
                timestamp: 100 + i64::try_from(id).unwrap(),
                // every third log belongs to another trace
                trace_id: if id % 3 == 0 { 2 } else { 1 },
                span_id: 1,
                fields: KeyValues::new(),
            })
            .collect();
        assert_eq!(ingestor.ingest_logs(&logs).await.unwrap(), 11);
        let mut seen = vec![];
        let mut cursor = None;
        loop {
            let page = engine.list_trace_logs(1, cursor, Some(3)).await.unwrap();
            assert!(page.content.len() <= 3);
            seen.extend(page.content.iter().map(|l| l.id));
            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        let expected: Vec<u64> = (1..=11).filter(|id| id % 3 != 0).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn contradictory_filters_are_rejected() {
        let (_ingestor, engine) = setup().await;
        let invalid = [
            TraceQueryCondition {
                min_duration: Some(50),
                max_duration: Some(40),
                ..Default::default()
            },
            TraceQueryCondition {
                begin_ts: Some(200),
                end_ts: Some(100),
                ..Default::default()
            },
            TraceQueryCondition {
                min_duration: Some(-1),
                ..Default::default()
            },
        ];
        for condition in &invalid {
            let result = engine.list_traces(Some(condition), None, None).await;
            assert!(matches!(result, Err(LogviewerError::InvalidFilter(_))));
        }
        for size in [0, MAX_PAGE_SIZE + 1] {
            let result = engine.list_trace_logs(1, None, Some(size)).await;
            assert!(matches!(result, Err(LogviewerError::InvalidFilter(_))));
        }
        let equal_bounds = TraceQueryCondition {
            min_duration: Some(40),
            max_duration: Some(40),
            ..Default::default()
        };
        let page = engine
            .list_traces(Some(&equal_bounds), None, None)
            .await
            .unwrap();
        assert!(page.content.is_empty());
    }
}
