// Error taxonomy for store operations

use crate::models::TaskId;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Input rejected before touching storage (title too long, bad date, bad config)
    #[error("validation error: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {0} is not marked done")]
    DoneNotFound(TaskId),

    /// Duplicate done marker, duplicate primary key, or a restricted delete
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

impl StoreError {
    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::TaskNotFound(_) | StoreError::DoneNotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Which SQLite constraint a failed statement tripped over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Constraint {
    PrimaryKey,
    ForeignKey,
    Other,
}

pub(crate) fn constraint_violation(err: &rusqlite::Error) -> Option<Constraint> {
    match err {
        rusqlite::Error::SqliteFailure(code, message) if code.code == ErrorCode::ConstraintViolation => {
            let kind = match code.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    Constraint::PrimaryKey
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Constraint::ForeignKey,
                _ => match message.as_deref() {
                    Some(m) if m.contains("UNIQUE constraint failed") => Constraint::PrimaryKey,
                    Some(m) if m.contains("FOREIGN KEY constraint failed") => Constraint::ForeignKey,
                    _ => Constraint::Other,
                },
            };
            Some(kind)
        }
        _ => None,
    }
}
