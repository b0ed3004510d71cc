// Data models for the task store

use crate::error::{Result, StoreError};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest title the `tasks.title` column accepts, in characters
pub const MAX_TITLE_LEN: usize = 1024;

/// Task identifier, a 32-bit integer drawn from `tasks_id_seq`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i32);

impl TaskId {
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(TaskId)
    }
}

impl TryFrom<i64> for TaskId {
    type Error = StoreError;

    fn try_from(value: i64) -> Result<Self> {
        i32::try_from(value)
            .map(TaskId)
            .map_err(|_| StoreError::Validation(format!("task id {} does not fit in 32 bits", value)))
    }
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    pub updated_at: i64,
}

/// Completion marker for a task; shares the task's id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Done {
    pub id: TaskId,
    pub updated_at: i64,
}

/// Journal line recording that a record was removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: TaskId,
    pub deleted: bool,
    pub updated_at: i64,
}

impl Tombstone {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            deleted: true,
            updated_at: now_ms(),
        }
    }
}

/// Fields supplied when adding a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    pub title: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            due_date: None,
        }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }

    /// Reject titles longer than `max_len` characters
    pub fn validate(&self, max_len: usize) -> Result<()> {
        if let Some(title) = &self.title {
            let len = title.chars().count();
            if len > max_len {
                return Err(StoreError::Validation(format!(
                    "title too long: {} chars (max {})",
                    len, max_len
                )));
            }
        }
        Ok(())
    }
}

impl From<&Task> for NewTask {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            due_date: task.due_date,
        }
    }
}

/// Where a task id sits in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Absent,
    Open,
    Done,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Absent => write!(f, "absent"),
            TaskState::Open => write!(f, "open"),
            TaskState::Done => write!(f, "done"),
        }
    }
}

/// A task joined with its done flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub task: Task,
    pub done: bool,
}

/// Parse a due date in strict `YYYY-MM-DD` form
pub fn parse_due_date(input: &str) -> Result<NaiveDate> {
    let bytes = input.as_bytes();
    let shaped = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shaped {
        return Err(StoreError::Validation(format!(
            "invalid due date '{}' (expected YYYY-MM-DD)",
            input
        )));
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|e| StoreError::Validation(format!("invalid due date '{}': {}", input, e)))
}

/// Current timestamp in milliseconds
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
