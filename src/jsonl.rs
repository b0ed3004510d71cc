// JSONL journal operations

use crate::error::Result;
use crate::models::{TaskId, Tombstone};
use crate::record::Record;
use fs2::FileExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Latest journaled state of one id
#[derive(Debug, Clone, PartialEq)]
pub enum Entry<T> {
    Live(T),
    Deleted(Tombstone),
}

impl<T: Record> Entry<T> {
    pub fn updated_at(&self) -> i64 {
        match self {
            Entry::Live(record) => record.updated_at(),
            Entry::Deleted(tombstone) => tombstone.updated_at,
        }
    }

    pub fn live(&self) -> Option<&T> {
        match self {
            Entry::Live(record) => Some(record),
            Entry::Deleted(_) => None,
        }
    }
}

/// Append one line to a JSONL file under an exclusive lock
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;

    // Released when the file is dropped
    file.lock_exclusive()?;

    let json = serde_json::to_string(record)?;
    writeln!(file, "{}", json)?;
    file.sync_all()?;

    debug!(file = ?path, "Appended journal line");
    Ok(())
}

/// Read a journal, returning the latest entry per id
///
/// Lines are applied in file order; a line replaces the current entry for its
/// id unless its `updated_at` is strictly older. Unreadable or malformed lines
/// are skipped with a warning. A missing file is an empty journal.
pub fn read_jsonl_latest<T: Record>(path: &Path) -> Result<BTreeMap<TaskId, Entry<T>>> {
    let mut entries: BTreeMap<TaskId, Entry<T>> = BTreeMap::new();

    if !path.exists() {
        return Ok(entries);
    }

    let file = File::open(path)?;
    let reader = BufReader::new(file);

    for (line_num, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(file = ?path, line = line_num + 1, error = ?e, "Failed to read line, skipping");
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let entry: Entry<T> = match parse_line(&line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(file = ?path, line = line_num + 1, error = ?e, "Failed to parse JSON, skipping");
                continue;
            }
        };

        let id = match &entry {
            Entry::Live(record) => record.id(),
            Entry::Deleted(tombstone) => tombstone.id,
        };

        match entries.get(&id) {
            Some(existing) if entry.updated_at() < existing.updated_at() => {}
            _ => {
                entries.insert(id, entry);
            }
        }
    }

    debug!(file = ?path, count = entries.len(), "Loaded latest journal entries");
    Ok(entries)
}

fn parse_line<T: Record>(line: &str) -> serde_json::Result<Entry<T>> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("deleted").and_then(Value::as_bool).unwrap_or(false) {
        Ok(Entry::Deleted(serde_json::from_value(value)?))
    } else {
        Ok(Entry::Live(serde_json::from_value(value)?))
    }
}
