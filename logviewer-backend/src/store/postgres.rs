use crate::error::{RecordKind, StorageError};
use crate::store::{Progress, RowStore};
use api_structs::{Cursor, KeyValues, Log, Page, Span, Trace, TraceQueryCondition};
use async_trait::async_trait;
use backtraced_error::SqlxError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::str::FromStr;
use tracing::{debug, info, info_span, instrument, Instrument};

/// [`RowStore`] backed by PostgreSQL. Conditional writes rely on single statement
/// atomicity (`on conflict do nothing`, `where version = $expected`), no transactions.
#[derive(Clone)]
pub struct PgRowStore {
    con: PgPool,
}

impl PgRowStore {
    pub fn new(con: PgPool) -> Self {
        Self { con }
    }

    #[instrument(skip_all)]
    pub async fn connect(url: &str, max_connections: u16) -> Result<Self, StorageError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| SqlxError::from_sqlx_error(e, "parsing the database url"))?;
        let con = PgPoolOptions::new()
            .max_connections(u32::from(max_connections))
            .connect_with(options)
            .instrument(info_span!("Connecting to the DB"))
            .await
            .map_err(|e| SqlxError::from_sqlx_error(e, "connecting to the database"))?;
        Ok(Self::new(con))
    }

    #[instrument(skip_all)]
    pub async fn migrate(&self) -> Result<(), StorageError> {
        info!("Applying schema migrations");
        sqlx::migrate!("./migrations").run(&self.con).await?;
        Ok(())
    }
}

fn db_id(kind: RecordKind, id: u64) -> Result<i64, StorageError> {
    i64::try_from(id).map_err(|_| StorageError::KeyOutOfRange { kind, id })
}

fn id_from_db(kind: RecordKind, id: i64) -> Result<u64, StorageError> {
    u64::try_from(id).map_err(|_| StorageError::Corrupted {
        kind,
        reason: format!("negative id {id}"),
    })
}

fn version_from_db(kind: RecordKind, version: i64) -> Result<u32, StorageError> {
    u32::try_from(version).map_err(|_| StorageError::Corrupted {
        kind,
        reason: format!("version {version} out of range"),
    })
}

/// Lower bound for ascending scans. None means no row can follow the cursor.
fn ascending_lower_bound(cursor: Option<Cursor>) -> Option<i64> {
    match cursor {
        None => Some(-1),
        Some(cursor) => i64::try_from(cursor.last_id()).ok(),
    }
}

#[derive(sqlx::FromRow)]
struct DbTrace {
    id: i64,
    name: String,
    start_timestamp: i64,
    duration: i64,
    finished: bool,
    version: i64,
}

impl TryFrom<DbTrace> for Trace {
    type Error = StorageError;

    fn try_from(row: DbTrace) -> Result<Self, Self::Error> {
        Ok(Trace {
            id: id_from_db(RecordKind::Trace, row.id)?,
            name: row.name,
            start_timestamp: row.start_timestamp,
            duration: row.duration,
            finished: row.finished,
            version: version_from_db(RecordKind::Trace, row.version)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DbSpan {
    id: i64,
    parent_id: Option<i64>,
    trace_id: i64,
    name: String,
    start_timestamp: i64,
    duration: i64,
    tags: Json<KeyValues>,
    finished: bool,
    version: i64,
}

impl TryFrom<DbSpan> for Span {
    type Error = StorageError;

    fn try_from(row: DbSpan) -> Result<Self, Self::Error> {
        Ok(Span {
            id: id_from_db(RecordKind::Span, row.id)?,
            parent_id: row
                .parent_id
                .map(|parent_id| id_from_db(RecordKind::Span, parent_id))
                .transpose()?,
            trace_id: id_from_db(RecordKind::Span, row.trace_id)?,
            name: row.name,
            start_timestamp: row.start_timestamp,
            duration: row.duration,
            tags: row.tags.0,
            finished: row.finished,
            version: version_from_db(RecordKind::Span, row.version)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DbLog {
    id: i64,
    trace_id: i64,
    span_id: i64,
    timestamp: i64,
    fields: Json<KeyValues>,
}

impl TryFrom<DbLog> for Log {
    type Error = StorageError;

    fn try_from(row: DbLog) -> Result<Self, Self::Error> {
        Ok(Log {
            id: id_from_db(RecordKind::Log, row.id)?,
            timestamp: row.timestamp,
            trace_id: id_from_db(RecordKind::Log, row.trace_id)?,
            span_id: id_from_db(RecordKind::Log, row.span_id)?,
            fields: row.fields.0,
        })
    }
}

fn into_page<Db, T>(
    rows: Vec<Db>,
    limit: u32,
    id_of: impl Fn(&T) -> u64,
) -> Result<Page<T>, StorageError>
where
    T: TryFrom<Db, Error = StorageError>,
{
    let rows = rows
        .into_iter()
        .map(T::try_from)
        .collect::<Result<Vec<T>, StorageError>>()?;
    Ok(Page::from_keyset_rows(rows, limit, id_of))
}

#[async_trait]
impl RowStore for PgRowStore {
    #[instrument(skip_all, fields(id = id))]
    async fn get_trace(&self, id: u64) -> Result<Option<Trace>, StorageError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        let row: Option<DbTrace> = sqlx::query_as(
            "select id, name, start_timestamp, duration, finished, version from trace where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("getting trace {id}")))?;
        row.map(Trace::try_from).transpose()
    }

    #[instrument(skip_all, fields(id = trace.id))]
    async fn insert_trace_if_absent(&self, trace: &Trace) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "insert into trace (id, name, start_timestamp, duration, finished, version)
             values ($1, $2, $3, $4, $5, $6) on conflict (id) do nothing;",
        )
        .bind(db_id(RecordKind::Trace, trace.id)?)
        .bind(&trace.name)
        .bind(trace.start_timestamp)
        .bind(trace.duration)
        .bind(trace.finished)
        .bind(i64::from(trace.version))
        .execute(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("inserting trace {}", trace.id)))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(id = id, expected_version = expected_version))]
    async fn update_trace_if_version(
        &self,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "update trace set duration = $1, finished = $2, version = version + 1
             where id = $3 and version = $4;",
        )
        .bind(progress.duration)
        .bind(progress.finished)
        .bind(db_id(RecordKind::Trace, id)?)
        .bind(i64::from(expected_version))
        .execute(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("updating trace {id}")))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(limit = limit))]
    async fn scan_traces(
        &self,
        condition: &TraceQueryCondition,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Trace>, StorageError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "select id, name, start_timestamp, duration, finished, version from trace where true",
        );
        if let Some(finished) = condition.finished {
            query.push(" and finished = ").push_bind(finished);
        }
        if let Some(min_duration) = condition.min_duration {
            query.push(" and duration >= ").push_bind(min_duration);
        }
        if let Some(max_duration) = condition.max_duration {
            query.push(" and duration < ").push_bind(max_duration);
        }
        if let Some(begin_ts) = condition.begin_ts {
            query.push(" and start_timestamp >= ").push_bind(begin_ts);
        }
        if let Some(end_ts) = condition.end_ts {
            query.push(" and start_timestamp < ").push_bind(end_ts);
        }
        // a cursor above every storable id excludes nothing
        if let Some(Ok(before)) = cursor.map(|c| i64::try_from(c.last_id())) {
            query.push(" and id < ").push_bind(before);
        }
        query
            .push(" order by id desc limit ")
            .push_bind(i64::from(limit));
        let rows: Vec<DbTrace> = query
            .build_query_as::<DbTrace>()
            .fetch_all(&self.con)
            .await
            .map_err(|e| {
                SqlxError::from_sqlx_error(e, format!("scanning traces using {condition:?}"))
            })?;
        debug!("Scanned {} traces", rows.len());
        into_page(rows, limit, |t: &Trace| t.id)
    }

    #[instrument(skip_all, fields(id = id))]
    async fn get_span(&self, id: u64) -> Result<Option<Span>, StorageError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        let row: Option<DbSpan> = sqlx::query_as(
            "select id, parent_id, trace_id, name, start_timestamp, duration, tags, finished, version
             from span where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("getting span {id}")))?;
        row.map(Span::try_from).transpose()
    }

    #[instrument(skip_all, fields(id = span.id, trace_id = span.trace_id))]
    async fn insert_span_if_absent(&self, span: &Span) -> Result<bool, StorageError> {
        let parent_id = span
            .parent_id
            .map(|parent_id| db_id(RecordKind::Span, parent_id))
            .transpose()?;
        let result = sqlx::query(
            "insert into span (id, parent_id, trace_id, name, start_timestamp, duration, tags, finished, version)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9) on conflict (id) do nothing;",
        )
        .bind(db_id(RecordKind::Span, span.id)?)
        .bind(parent_id)
        .bind(db_id(RecordKind::Span, span.trace_id)?)
        .bind(&span.name)
        .bind(span.start_timestamp)
        .bind(span.duration)
        .bind(Json(&span.tags))
        .bind(span.finished)
        .bind(i64::from(span.version))
        .execute(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("inserting span {}", span.id)))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(id = id, expected_version = expected_version))]
    async fn update_span_if_version(
        &self,
        id: u64,
        expected_version: u32,
        progress: Progress,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "update span set duration = $1, finished = $2, version = version + 1
             where id = $3 and version = $4;",
        )
        .bind(progress.duration)
        .bind(progress.finished)
        .bind(db_id(RecordKind::Span, id)?)
        .bind(i64::from(expected_version))
        .execute(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("updating span {id}")))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(trace_id = trace_id, limit = limit))]
    async fn scan_trace_spans(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Span>, StorageError> {
        let (Ok(trace_id), Some(after)) = (i64::try_from(trace_id), ascending_lower_bound(cursor))
        else {
            return Ok(Page::empty());
        };
        let rows: Vec<DbSpan> = sqlx::query_as(
            "select id, parent_id, trace_id, name, start_timestamp, duration, tags, finished, version
             from span where trace_id = $1 and id > $2 order by id asc limit $3",
        )
        .bind(trace_id)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.con)
        .await
        .map_err(|e| {
            SqlxError::from_sqlx_error(e, format!("scanning spans of trace {trace_id}"))
        })?;
        into_page(rows, limit, |s: &Span| s.id)
    }

    #[instrument(skip_all, fields(id = id))]
    async fn get_log(&self, id: u64) -> Result<Option<Log>, StorageError> {
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        let row: Option<DbLog> =
            sqlx::query_as("select id, trace_id, span_id, timestamp, fields from log where id = $1")
                .bind(id)
                .fetch_optional(&self.con)
                .await
                .map_err(|e| SqlxError::from_sqlx_error(e, format!("getting log {id}")))?;
        row.map(Log::try_from).transpose()
    }

    #[instrument(skip_all, fields(id = log.id, trace_id = log.trace_id))]
    async fn insert_log_if_absent(&self, log: &Log) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "insert into log (id, trace_id, span_id, timestamp, fields)
             values ($1, $2, $3, $4, $5) on conflict (id) do nothing;",
        )
        .bind(db_id(RecordKind::Log, log.id)?)
        .bind(db_id(RecordKind::Log, log.trace_id)?)
        .bind(db_id(RecordKind::Log, log.span_id)?)
        .bind(log.timestamp)
        .bind(Json(&log.fields))
        .execute(&self.con)
        .await
        .map_err(|e| SqlxError::from_sqlx_error(e, format!("inserting log {}", log.id)))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip_all, fields(trace_id = trace_id, limit = limit))]
    async fn scan_trace_logs(
        &self,
        trace_id: u64,
        cursor: Option<Cursor>,
        limit: u32,
    ) -> Result<Page<Log>, StorageError> {
        let (Ok(trace_id), Some(after)) = (i64::try_from(trace_id), ascending_lower_bound(cursor))
        else {
            return Ok(Page::empty());
        };
        let rows: Vec<DbLog> = sqlx::query_as(
            "select id, trace_id, span_id, timestamp, fields
             from log where trace_id = $1 and id > $2 order by id asc limit $3",
        )
        .bind(trace_id)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.con)
        .await
        .map_err(|e| {
            SqlxError::from_sqlx_error(e, format!("scanning logs of trace {trace_id}"))
        })?;
        into_page(rows, limit, |l: &Log| l.id)
    }
}
