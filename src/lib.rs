// TodoStore - task tracking over SQLite tables with JSONL journals

pub mod config;
pub mod error;
pub mod jsonl;
pub mod models;
pub mod record;
pub mod store;

// Re-export main types for convenience
pub use config::Config;
pub use error::{Result, StoreError};
pub use models::{Done, NewTask, Task, TaskId, TaskState, TaskSummary, now_ms, parse_due_date};
pub use record::Record;
pub use store::Store;
