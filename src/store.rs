// Task store implementation using SQLite + JSONL

use crate::config::Config;
use crate::error::{Constraint, Result, StoreError, constraint_violation};
use crate::jsonl::{self, Entry};
use crate::models::{Done, MAX_TITLE_LEN, NewTask, Task, TaskId, TaskState, TaskSummary, Tombstone, now_ms};
use crate::record::Record;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CURRENT_VERSION: u32 = 1;

/// Directory created under the base path
pub const STORE_DIR: &str = ".todostore";

/// Sequence feeding `tasks.id`
pub const TASKS_ID_SEQ: &str = "tasks_id_seq";

const TASK_COLUMNS: &str = "id, title, due_date, updated_at";

/// Task store with SQLite tables and JSONL journals as source of truth
pub struct Store {
    base_path: PathBuf,
    db: Connection,
    max_title_len: usize,
}

impl Store {
    /// Open or create a store with default settings
    ///
    /// The store will be created in a `.todostore` subdirectory of the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config {
            store_path: path.as_ref().to_path_buf(),
            ..Config::default()
        };
        Self::open_with_config(&config)
    }

    /// Open or create the store described by `config`
    pub fn open_with_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let base_path = config.store_path.join(STORE_DIR);
        fs::create_dir_all(&base_path)?;

        let db = Connection::open(base_path.join("todostore.db"))?;
        db.busy_timeout(config.busy_timeout())?;
        db.pragma_update(None, "foreign_keys", true)?;
        let journal_mode: String = db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %journal_mode, "SQLite pragmas configured");

        let mut store = Self {
            base_path,
            db,
            max_title_len: config.max_title_len,
        };

        store.create_schema()?;
        store.create_gitignore()?;
        store.write_version()?;

        if store.is_stale()? {
            info!("Database is stale, syncing from JSONL journals");
            store.sync()?;
        }

        debug!(path = ?store.base_path, "Store opened");
        Ok(store)
    }

    /// Get the directory holding the database and journals
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating database schema");

        self.db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sequences (
                name TEXT PRIMARY KEY,
                start_value INTEGER NOT NULL,
                increment_by INTEGER NOT NULL,
                last_value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO sequences (name, start_value, increment_by, last_value)
            VALUES ('tasks_id_seq', 1, 1, 0);

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY,
                title VARCHAR(1024) CHECK (title IS NULL OR length(title) <= 1024),
                due_date TEXT,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dones (
                id INTEGER PRIMARY KEY REFERENCES tasks(id),
                updated_at INTEGER NOT NULL
            );

            -- Journal stamps for staleness detection
            CREATE TABLE IF NOT EXISTS journal_state (
                collection TEXT PRIMARY KEY,
                last_sync_time INTEGER NOT NULL,
                file_mtime_ns INTEGER NOT NULL,
                file_size INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    fn create_gitignore(&self) -> Result<()> {
        let gitignore_path = self.base_path.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(
                gitignore_path,
                "todostore.db\ntodostore.db-shm\ntodostore.db-wal\ntodostore.log\n",
            )?;
        }
        Ok(())
    }

    fn write_version(&self) -> Result<()> {
        let version_path = self.base_path.join(".version");
        if !version_path.exists() {
            fs::write(version_path, CURRENT_VERSION.to_string())?;
        }
        Ok(())
    }

    /// Check if the database needs syncing from the journals
    ///
    /// Returns true if a journal's mtime or size differs from what the store
    /// last recorded, or the journal exists but has never been synced.
    pub fn is_stale(&self) -> Result<bool> {
        for collection in [Task::collection_name(), Done::collection_name()] {
            let path = self.journal_path(collection);
            if !path.exists() {
                continue;
            }

            let current = JournalStamp::of(&path)?;
            let stored: Option<JournalStamp> = self
                .db
                .query_row(
                    "SELECT file_mtime_ns, file_size FROM journal_state WHERE collection = ?1",
                    [collection],
                    |row| {
                        Ok(JournalStamp {
                            mtime_ns: row.get(0)?,
                            size: row.get(1)?,
                        })
                    },
                )
                .optional()?;

            if stored != Some(current) {
                debug!(collection, ?stored, ?current, "Journal changed since last sync");
                return Ok(true);
            }
        }

        Ok(false)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add a task, allocating the next id from `tasks_id_seq`
    ///
    /// Ids are never reissued, even after the task is deleted.
    pub fn add_task(&mut self, new: NewTask) -> Result<TaskId> {
        new.validate(self.max_title_len)?;

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let id = next_task_id(&tx)?;
        let task = Task {
            id,
            title: new.title,
            due_date: new.due_date,
            updated_at: now_ms(),
        };

        tx.execute(
            "INSERT INTO tasks (id, title, due_date, updated_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                id.get(),
                task.title,
                task.due_date.map(|d| d.to_string()),
                task.updated_at
            ],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(Constraint::PrimaryKey) => StoreError::Conflict(format!("task {} already exists", id)),
            _ => StoreError::Sql(e),
        })?;

        append_journal(&self.base_path, &tx, Task::collection_name(), &task)?;
        tx.commit()?;

        info!(id = %id, "Added task");
        Ok(id)
    }

    /// Mark a task done
    ///
    /// Fails with `TaskNotFound` if the task does not exist and with `Conflict`
    /// if it is already marked.
    pub fn mark_done(&mut self, id: TaskId) -> Result<Done> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !task_exists(&tx, id)? {
            return Err(StoreError::TaskNotFound(id));
        }
        if done_exists(&tx, id)? {
            return Err(StoreError::Conflict(format!("task {} is already marked done", id)));
        }

        let done = Done {
            id,
            updated_at: now_ms(),
        };

        tx.execute(
            "INSERT INTO dones (id, updated_at) VALUES (?1, ?2)",
            params![id.get(), done.updated_at],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(Constraint::PrimaryKey) => StoreError::Conflict(format!("task {} is already marked done", id)),
            Some(Constraint::ForeignKey) => StoreError::TaskNotFound(id),
            _ => StoreError::Sql(e),
        })?;

        append_journal(&self.base_path, &tx, Done::collection_name(), &done)?;
        tx.commit()?;

        info!(id = %id, "Marked task done");
        Ok(done)
    }

    /// Remove a task's done marker
    pub fn unmark_done(&mut self, id: TaskId) -> Result<()> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !done_exists(&tx, id)? {
            return Err(StoreError::DoneNotFound(id));
        }

        tx.execute("DELETE FROM dones WHERE id = ?1", [id.get()])?;

        append_journal(&self.base_path, &tx, Done::collection_name(), &Tombstone::new(id))?;
        tx.commit()?;

        info!(id = %id, "Unmarked task");
        Ok(())
    }

    /// Delete a task
    ///
    /// Restricted while the task is marked done: remove the marker first.
    pub fn delete_task(&mut self, id: TaskId) -> Result<()> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if !task_exists(&tx, id)? {
            return Err(StoreError::TaskNotFound(id));
        }

        let restricted = || StoreError::Conflict(format!("task {} is marked done; unmark it before deleting", id));
        if done_exists(&tx, id)? {
            return Err(restricted());
        }

        tx.execute("DELETE FROM tasks WHERE id = ?1", [id.get()])
            .map_err(|e| match constraint_violation(&e) {
                Some(Constraint::ForeignKey) => restricted(),
                _ => StoreError::Sql(e),
            })?;

        append_journal(&self.base_path, &tx, Task::collection_name(), &Tombstone::new(id))?;
        tx.commit()?;

        info!(id = %id, "Deleted task");
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let task = self
            .db
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                [id.get()],
                row_to_task,
            )
            .optional()?;
        Ok(task)
    }

    pub fn task_state(&self, id: TaskId) -> Result<TaskState> {
        let state = if !task_exists(&self.db, id)? {
            TaskState::Absent
        } else if done_exists(&self.db, id)? {
            TaskState::Done
        } else {
            TaskState::Open
        };
        Ok(state)
    }

    /// All tasks, primary key ascending
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let mut stmt = self
            .db
            .prepare(&format!("SELECT {} FROM tasks ORDER BY id ASC", TASK_COLUMNS))?;
        let tasks = stmt.query_map([], row_to_task)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Tasks without a done marker, primary key ascending
    pub fn list_open(&self) -> Result<Vec<Task>> {
        let mut stmt = self.db.prepare(
            "SELECT t.id, t.title, t.due_date, t.updated_at
             FROM tasks t
             LEFT JOIN dones d ON d.id = t.id
             WHERE d.id IS NULL
             ORDER BY t.id ASC",
        )?;
        let tasks = stmt.query_map([], row_to_task)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// Ids of all tasks marked done, ascending
    pub fn list_done(&self) -> Result<Vec<TaskId>> {
        let mut stmt = self.db.prepare("SELECT id FROM dones ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i32>(0).map(TaskId::new))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Every task with its done flag
    pub fn list_task_summaries(&self) -> Result<Vec<TaskSummary>> {
        let mut stmt = self.db.prepare(
            "SELECT t.id, t.title, t.due_date, t.updated_at, d.id IS NOT NULL
             FROM tasks t
             LEFT OUTER JOIN dones d ON d.id = t.id
             ORDER BY t.id ASC",
        )?;
        let summaries = stmt
            .query_map([], |row| {
                Ok(TaskSummary {
                    task: row_to_task(row)?,
                    done: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    /// Last value handed out by `tasks_id_seq` (0 before the first task)
    pub fn last_task_id(&self) -> Result<i64> {
        let value = self.db.query_row(
            "SELECT last_value FROM sequences WHERE name = ?1",
            [TASKS_ID_SEQ],
            |row| row.get(0),
        )?;
        Ok(value)
    }

    // ========================================================================
    // Sync operations
    // ========================================================================

    /// Rebuild the tables from the JSONL journals
    ///
    /// The sequence is raised to at least the highest id ever journaled,
    /// tombstones included, so a rebuild never reissues an id. Done markers
    /// whose task is missing from the journal are skipped.
    pub fn sync(&mut self) -> Result<()> {
        info!("Syncing database from JSONL journals");

        let tasks_path = self.journal_path(Task::collection_name());
        let dones_path = self.journal_path(Done::collection_name());

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute("DELETE FROM dones", [])?;
        tx.execute("DELETE FROM tasks", [])?;

        let tasks: BTreeMap<TaskId, Entry<Task>> = jsonl::read_jsonl_latest(&tasks_path)?;
        let mut highest: i64 = 0;
        let mut task_count = 0;

        for (id, entry) in &tasks {
            highest = highest.max(i64::from(id.get()));

            if let Some(task) = entry.live() {
                if let Err(e) = NewTask::from(task).validate(MAX_TITLE_LEN) {
                    warn!(id = %id, error = %e, "Journaled task fails validation, skipping");
                    continue;
                }

                tx.execute(
                    "INSERT INTO tasks (id, title, due_date, updated_at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        task.id.get(),
                        task.title,
                        task.due_date.map(|d| d.to_string()),
                        task.updated_at
                    ],
                )?;
                task_count += 1;
            }
        }

        tx.execute(
            "UPDATE sequences SET last_value = MAX(last_value, ?2) WHERE name = ?1",
            params![TASKS_ID_SEQ, highest],
        )?;

        let dones: BTreeMap<TaskId, Entry<Done>> = jsonl::read_jsonl_latest(&dones_path)?;
        let mut done_count = 0;

        for (id, entry) in &dones {
            let Some(done) = entry.live() else {
                continue;
            };

            if !task_exists(&tx, *id)? {
                warn!(id = %id, "Done marker references a missing task, skipping");
                continue;
            }

            tx.execute(
                "INSERT INTO dones (id, updated_at) VALUES (?1, ?2)",
                params![done.id.get(), done.updated_at],
            )?;
            done_count += 1;
        }

        for (collection, path) in [
            (Task::collection_name(), &tasks_path),
            (Done::collection_name(), &dones_path),
        ] {
            if path.exists() {
                record_sync(&tx, collection, path)?;
            }
        }

        tx.commit()?;

        info!(tasks = task_count, dones = done_count, last_id = highest, "Sync complete");
        Ok(())
    }

    fn journal_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Advance `tasks_id_seq` and return its new value
fn next_task_id(db: &Connection) -> Result<TaskId> {
    let value: i64 = db.query_row(
        "UPDATE sequences SET last_value = last_value + increment_by WHERE name = ?1 RETURNING last_value",
        [TASKS_ID_SEQ],
        |row| row.get(0),
    )?;
    TaskId::try_from(value)
}

fn task_exists(db: &Connection, id: TaskId) -> Result<bool> {
    let found = db
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", [id.get()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn done_exists(db: &Connection, id: TaskId) -> Result<bool> {
    let found = db
        .query_row("SELECT 1 FROM dones WHERE id = ?1", [id.get()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let due_date: Option<String> = row.get(2)?;
    let due_date = due_date
        .map(|s| s.parse::<NaiveDate>())
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Task {
        id: TaskId::new(row.get(0)?),
        title: row.get(1)?,
        due_date,
        updated_at: row.get(3)?,
    })
}

/// Append a journal line and record the new file mtime, inside the caller's transaction
fn append_journal<T: Serialize>(base_path: &Path, db: &Connection, collection: &str, line: &T) -> Result<()> {
    let path = base_path.join(format!("{}.jsonl", collection));
    jsonl::append_jsonl(&path, line)?;
    record_sync(db, collection, &path)
}

fn record_sync(db: &Connection, collection: &str, path: &Path) -> Result<()> {
    let stamp = JournalStamp::of(path)?;
    db.execute(
        "INSERT OR REPLACE INTO journal_state (collection, last_sync_time, file_mtime_ns, file_size)
         VALUES (?1, ?2, ?3, ?4)",
        params![collection, now_ms(), stamp.mtime_ns, stamp.size],
    )?;
    Ok(())
}

/// Modification time (nanoseconds) and length of a journal file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JournalStamp {
    mtime_ns: i64,
    size: i64,
}

impl JournalStamp {
    fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let mtime_ns = metadata
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Ok(Self {
            mtime_ns,
            size: metadata.len() as i64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_deref().unwrap_or("")).collect()
    }

    #[test]
    fn test_store_open_creates_directory() {
        let temp = TempDir::new().unwrap();

        let _store = Store::open(temp.path()).unwrap();
        let store_path = temp.path().join(".todostore");
        assert!(store_path.exists());
        assert!(store_path.join("todostore.db").exists());
        assert!(store_path.join(".gitignore").exists());
        assert!(store_path.join(".version").exists());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            store_path: temp.path().to_path_buf(),
            max_title_len: MAX_TITLE_LEN + 1,
            ..Config::default()
        };

        let err = Store::open_with_config(&config).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_add_task_ids_strictly_increase() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let ids: Vec<TaskId> = (0..5)
            .map(|i| store.add_task(NewTask::titled(format!("Task {}", i))).unwrap())
            .collect();

        assert_eq!(ids[0], TaskId::new(1));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(store.last_task_id().unwrap(), 5);
    }

    #[test]
    fn test_add_task_title_limit() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        assert!(store.add_task(NewTask::titled("a".repeat(1024))).is_ok());

        let err = store.add_task(NewTask::titled("a".repeat(1025))).unwrap_err();
        assert!(err.is_validation());

        // Rejected titles do not consume an id
        assert_eq!(store.add_task(NewTask::titled("next")).unwrap(), TaskId::new(2));
    }

    #[test]
    fn test_add_task_configured_title_limit() {
        let temp = TempDir::new().unwrap();
        let config = Config {
            store_path: temp.path().to_path_buf(),
            max_title_len: 10,
            ..Config::default()
        };
        let mut store = Store::open_with_config(&config).unwrap();

        assert!(store.add_task(NewTask::titled("0123456789")).is_ok());
        assert!(store.add_task(NewTask::titled("0123456789X")).unwrap_err().is_validation());
    }

    #[test]
    fn test_add_task_without_title() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::default()).unwrap();
        let task = store.get_task(id).unwrap().unwrap();
        assert_eq!(task.title, None);
        assert_eq!(task.due_date, None);
    }

    #[test]
    fn test_add_task_with_due_date() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let id = store.add_task(NewTask::titled("file taxes").due(date)).unwrap();

        let task = store.get_task(id).unwrap().unwrap();
        assert_eq!(task.due_date, Some(date));
    }

    #[test]
    fn test_mark_done_unknown_task() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let err = store.mark_done(TaskId::new(99)).unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(id) if id == TaskId::new(99)));
    }

    #[test]
    fn test_mark_done_twice_conflicts() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::titled("once")).unwrap();
        store.mark_done(id).unwrap();

        let err = store.mark_done(id).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.list_done().unwrap(), vec![id]);
    }

    #[test]
    fn test_done_task_still_listed() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::titled("buy milk")).unwrap();
        assert_eq!(id, TaskId::new(1));
        store.mark_done(id).unwrap();

        assert_eq!(store.list_done().unwrap(), vec![TaskId::new(1)]);

        let tasks = store.list_tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, TaskId::new(1));
        assert_eq!(tasks[0].title.as_deref(), Some("buy milk"));
    }

    #[test]
    fn test_task_state_transitions() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = TaskId::new(1);
        assert_eq!(store.task_state(id).unwrap(), TaskState::Absent);

        store.add_task(NewTask::titled("walk dog")).unwrap();
        assert_eq!(store.task_state(id).unwrap(), TaskState::Open);

        store.mark_done(id).unwrap();
        assert_eq!(store.task_state(id).unwrap(), TaskState::Done);

        store.unmark_done(id).unwrap();
        assert_eq!(store.task_state(id).unwrap(), TaskState::Open);

        store.delete_task(id).unwrap();
        assert_eq!(store.task_state(id).unwrap(), TaskState::Absent);
    }

    #[test]
    fn test_unmark_done_without_marker() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::titled("open")).unwrap();
        store.mark_done(id).unwrap();
        store.unmark_done(id).unwrap();

        let err = store.unmark_done(id).unwrap_err();
        assert!(matches!(err, StoreError::DoneNotFound(_)));
    }

    #[test]
    fn test_delete_done_task_is_restricted() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::titled("finished")).unwrap();
        store.mark_done(id).unwrap();

        assert!(store.delete_task(id).unwrap_err().is_conflict());
        assert!(store.get_task(id).unwrap().is_some());

        store.unmark_done(id).unwrap();
        store.delete_task(id).unwrap();
        assert!(store.get_task(id).unwrap().is_none());
    }

    #[test]
    fn test_delete_unknown_task() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        assert!(store.delete_task(TaskId::new(5)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_ids_not_reused_after_delete() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        store.add_task(NewTask::titled("one")).unwrap();
        let two = store.add_task(NewTask::titled("two")).unwrap();
        store.delete_task(two).unwrap();

        assert_eq!(store.add_task(NewTask::titled("three")).unwrap(), TaskId::new(3));
    }

    #[test]
    fn test_list_open_and_summaries() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let a = store.add_task(NewTask::titled("a")).unwrap();
        let b = store.add_task(NewTask::titled("b")).unwrap();
        let c = store.add_task(NewTask::titled("c")).unwrap();
        store.mark_done(b).unwrap();

        let open = store.list_open().unwrap();
        assert_eq!(titles(&open), vec!["a", "c"]);

        let summaries = store.list_task_summaries().unwrap();
        let flags: Vec<(TaskId, bool)> = summaries.iter().map(|s| (s.task.id, s.done)).collect();
        assert_eq!(flags, vec![(a, false), (b, true), (c, false)]);
    }

    #[test]
    fn test_schema_enforces_constraints() {
        let temp = TempDir::new().unwrap();
        let store = Store::open(temp.path()).unwrap();

        let long_title = store.db.execute(
            "INSERT INTO tasks (id, title, updated_at) VALUES (1, ?1, 0)",
            ["x".repeat(1025)],
        );
        assert!(long_title.is_err());

        let orphan = store
            .db
            .execute("INSERT INTO dones (id, updated_at) VALUES (42, 0)", [])
            .unwrap_err();
        assert_eq!(constraint_violation(&orphan), Some(Constraint::ForeignKey));
    }

    #[test]
    fn test_sequence_overflow_is_rejected() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        store
            .db
            .execute(
                "UPDATE sequences SET last_value = ?1 WHERE name = ?2",
                params![i64::from(i32::MAX), TASKS_ID_SEQ],
            )
            .unwrap();

        assert!(store.add_task(NewTask::titled("too many")).unwrap_err().is_validation());
        assert!(store.list_tasks().unwrap().is_empty());
        assert_eq!(store.last_task_id().unwrap(), i64::from(i32::MAX));
    }

    #[test]
    fn test_journal_written() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::titled("journaled")).unwrap();
        store.mark_done(id).unwrap();
        store.unmark_done(id).unwrap();

        let tasks = fs::read_to_string(temp.path().join(".todostore/tasks.jsonl")).unwrap();
        assert!(tasks.contains("\"title\":\"journaled\""));

        let dones = fs::read_to_string(temp.path().join(".todostore/dones.jsonl")).unwrap();
        assert_eq!(dones.lines().count(), 2);
        assert!(dones.contains("\"deleted\":true"));

        assert!(!store.is_stale().unwrap());
    }

    #[test]
    fn test_rebuild_after_database_loss() {
        let temp = TempDir::new().unwrap();

        {
            let mut store = Store::open(temp.path()).unwrap();
            store.add_task(NewTask::titled("keep")).unwrap();
            let done = store.add_task(NewTask::titled("done")).unwrap();
            let gone = store.add_task(NewTask::titled("gone")).unwrap();
            store.mark_done(done).unwrap();
            store.delete_task(gone).unwrap();
        }

        let store_dir = temp.path().join(".todostore");
        for name in ["todostore.db", "todostore.db-wal", "todostore.db-shm"] {
            let _ = fs::remove_file(store_dir.join(name));
        }

        let mut store = Store::open(temp.path()).unwrap();
        assert_eq!(titles(&store.list_tasks().unwrap()), vec!["keep", "done"]);
        assert_eq!(store.list_done().unwrap(), vec![TaskId::new(2)]);

        // The deleted task's id stays retired
        assert_eq!(store.add_task(NewTask::titled("next")).unwrap(), TaskId::new(4));
    }

    #[test]
    fn test_sync_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();

        let id = store.add_task(NewTask::titled("a")).unwrap();
        store.mark_done(id).unwrap();

        store.sync().unwrap();
        store.sync().unwrap();

        assert_eq!(store.list_tasks().unwrap().len(), 1);
        assert_eq!(store.list_done().unwrap(), vec![id]);
        assert_eq!(store.last_task_id().unwrap(), 1);
    }

    #[test]
    fn test_external_journal_edit_makes_store_stale() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.add_task(NewTask::titled("local")).unwrap();
        assert!(!store.is_stale().unwrap());

        let path = temp.path().join(".todostore/tasks.jsonl");
        jsonl::append_jsonl(
            &path,
            &Task {
                id: TaskId::new(7),
                title: Some("from elsewhere".to_string()),
                due_date: None,
                updated_at: now_ms(),
            },
        )
        .unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();

        assert!(store.is_stale().unwrap());
        drop(store);

        let mut store = Store::open(temp.path()).unwrap();
        assert_eq!(titles(&store.list_tasks().unwrap()), vec!["local", "from elsewhere"]);
        assert_eq!(store.add_task(NewTask::titled("after")).unwrap(), TaskId::new(8));
    }

    #[test]
    fn test_external_append_with_unchanged_mtime_detected() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.add_task(NewTask::titled("local")).unwrap();

        let path = temp.path().join(".todostore/tasks.jsonl");
        let recorded_mtime = fs::metadata(&path).unwrap().modified().unwrap();

        jsonl::append_jsonl(
            &path,
            &Task {
                id: TaskId::new(2),
                title: Some("pulled".to_string()),
                due_date: None,
                updated_at: now_ms(),
            },
        )
        .unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(recorded_mtime)
            .unwrap();

        assert!(store.is_stale().unwrap());
        drop(store);

        let mut store = Store::open(temp.path()).unwrap();
        assert_eq!(titles(&store.list_tasks().unwrap()), vec!["local", "pulled"]);
        assert_eq!(store.add_task(NewTask::titled("mine")).unwrap(), TaskId::new(3));
    }

    #[test]
    fn test_same_size_rewrite_within_second_detected() {
        let temp = TempDir::new().unwrap();
        let mut store = Store::open(temp.path()).unwrap();
        store.add_task(NewTask::titled("local")).unwrap();

        let path = temp.path().join(".todostore/tasks.jsonl");
        let recorded_mtime = fs::metadata(&path).unwrap().modified().unwrap();

        let content = fs::read_to_string(&path).unwrap().replace("\"local\"", "\"LOCAL\"");
        fs::write(&path, content).unwrap();
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(recorded_mtime + Duration::from_millis(1))
            .unwrap();

        assert!(store.is_stale().unwrap());
        drop(store);

        let store = Store::open(temp.path()).unwrap();
        assert_eq!(titles(&store.list_tasks().unwrap()), vec!["LOCAL"]);
    }

    #[test]
    fn test_sync_skips_oversized_titles() {
        let temp = TempDir::new().unwrap();
        let store_dir = temp.path().join(".todostore");
        fs::create_dir_all(&store_dir).unwrap();
        fs::write(
            store_dir.join("tasks.jsonl"),
            format!(
                "{{\"id\":1,\"title\":\"ok\",\"updated_at\":1000}}\n{{\"id\":2,\"title\":\"{}\",\"updated_at\":1000}}\n",
                "x".repeat(MAX_TITLE_LEN + 1)
            ),
        )
        .unwrap();
        fs::write(store_dir.join("dones.jsonl"), "{\"id\":2,\"updated_at\":1000}\n").unwrap();

        let mut store = Store::open(temp.path()).unwrap();
        assert_eq!(titles(&store.list_tasks().unwrap()), vec!["ok"]);
        assert!(store.list_done().unwrap().is_empty());

        // The skipped line's id stays retired
        assert_eq!(store.add_task(NewTask::titled("next")).unwrap(), TaskId::new(3));
    }

    #[test]
    fn test_sync_skips_orphan_done_markers() {
        let temp = TempDir::new().unwrap();
        let store_dir = temp.path().join(".todostore");
        fs::create_dir_all(&store_dir).unwrap();
        fs::write(
            store_dir.join("tasks.jsonl"),
            "{\"id\":1,\"title\":\"real\",\"updated_at\":1000}\n",
        )
        .unwrap();
        fs::write(
            store_dir.join("dones.jsonl"),
            "{\"id\":1,\"updated_at\":1000}\n{\"id\":99,\"updated_at\":1000}\n",
        )
        .unwrap();

        let store = Store::open(temp.path()).unwrap();
        assert_eq!(store.list_done().unwrap(), vec![TaskId::new(1)]);
    }

    #[test]
    fn test_concurrent_add_task_distinct_ids() {
        let temp = TempDir::new().unwrap();
        let base_path = temp.path().to_path_buf();
        drop(Store::open(&base_path).unwrap());

        let num_threads = 4;
        let tasks_per_thread = 10;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let barrier = Arc::clone(&barrier);
                let base_path = base_path.clone();

                thread::spawn(move || {
                    let mut store = Store::open(&base_path).unwrap();
                    barrier.wait();

                    (0..tasks_per_thread)
                        .map(|i| {
                            store
                                .add_task(NewTask::titled(format!("t{}-{}", thread_id, i)))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids: Vec<TaskId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), num_threads * tasks_per_thread);

        let store = Store::open(&base_path).unwrap();
        assert_eq!(store.list_tasks().unwrap().len(), num_threads * tasks_per_thread);
    }

    #[test]
    fn test_concurrent_mark_done_single_winner() {
        let temp = TempDir::new().unwrap();
        let base_path = temp.path().to_path_buf();
        let id = {
            let mut store = Store::open(&base_path).unwrap();
            store.add_task(NewTask::titled("race")).unwrap()
        };

        let num_threads = 4;
        let barrier = Arc::new(Barrier::new(num_threads));

        let handles: Vec<_> = (0..num_threads)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let base_path = base_path.clone();

                thread::spawn(move || {
                    let mut store = Store::open(&base_path).unwrap();
                    barrier.wait();
                    store.mark_done(id)
                })
            })
            .collect();

        let results: Vec<Result<Done>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(
            results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(StoreError::is_conflict)
        );
    }
}
