// Journaled record trait

use crate::models::{Done, Task, TaskId};
use serde::{Serialize, de::DeserializeOwned};

/// A row type that is persisted in its own JSONL journal
pub trait Record: Serialize + DeserializeOwned + Clone {
    /// Primary key of the row
    fn id(&self) -> TaskId;

    /// Timestamp of the journal line (milliseconds since epoch)
    fn updated_at(&self) -> i64;

    /// Collection name; determines the journal filename `{collection}.jsonl`
    fn collection_name() -> &'static str
    where
        Self: Sized;
}

impl Record for Task {
    fn id(&self) -> TaskId {
        self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }
}

impl Record for Done {
    fn id(&self) -> TaskId {
        self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "dones"
    }
}
