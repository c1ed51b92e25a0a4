use backtraced_error::SqlxError;
use std::fmt::{Display, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Trace,
    Span,
    Log,
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Trace => write!(f, "trace"),
            RecordKind::Span => write!(f, "span"),
            RecordKind::Log => write!(f, "log"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] SqlxError),
    #[error("Failed to apply schema migrations")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("{kind} id {id} doesn't fit the storage key range")]
    KeyOutOfRange { kind: RecordKind, id: u64 },
    #[error("Stored {kind} row is malformed: {reason}")]
    Corrupted { kind: RecordKind, reason: String },
}

#[derive(Debug, Error)]
pub enum LogviewerError {
    #[error("Gave up updating {kind} {id} after {attempts} attempts lost to concurrent writers")]
    ConcurrentUpdateConflict {
        kind: RecordKind,
        id: u64,
        attempts: u32,
    },
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Invalid {kind}: {reason}")]
    InvalidRecord { kind: RecordKind, reason: String },
    #[error("Storage failure")]
    StorageFailure(#[from] StorageError),
}
