//! Task store adapter
//!
//! The store is the single source of truth shared by every process working on
//! a project. The registry only talks to it through [`TaskStore`]:
//! load/save/insert/remove by id, list ids, and advisory per-task locks.
//!
//! # Directory Structure
//!
//! ```text
//! .tasklink/                    # Store root (configurable)
//!   store.lock                  # Store-wide lock (migration)
//!   graph.lock                  # Serializes cycle-checked edge changes
//!   tasks/
//!     <id>.json                 # One record per task
//!     <id>.json.lock            # Short write lock for compare-and-swap
//!   locks/
//!     <id>.lock                 # Mutation lock held across a whole change
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::lock::{self, FileLock, DEFAULT_LOCK_TIMEOUT_MS};
use crate::model::{RelationType, Relationship, TaskStatus};

const TASKS_DIR: &str = "tasks";
const LOCKS_DIR: &str = "locks";
const STORE_LOCK: &str = "store.lock";
const GRAPH_LOCK: &str = "graph.lock";
const RECORD_EXT: &str = "json";
const MAX_TASK_ID_LEN: usize = 128;

/// Top-level keys used before relationships moved into one canonical list.
pub const LEGACY_FIELDS: [&str; 5] = [
    "parent_id",
    "child_ids",
    "depends_on",
    "blocks_tasks",
    "related",
];

/// Persisted task record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Compare-and-swap token, bumped by every successful save
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Status to restore once a blocked task's dependencies complete again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_status: Option<TaskStatus>,
    /// Descriptive fields (title, tags, owner); opaque to the registry
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            version: 0,
            created_at: now,
            updated_at: now,
            resume_status: None,
            fields: Map::new(),
            relationships: Vec::new(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("title").and_then(Value::as_str)
    }

    pub fn parent(&self) -> Option<&str> {
        self.targets(RelationType::Parent).next()
    }

    pub fn targets(&self, relation: RelationType) -> impl Iterator<Item = &str> + '_ {
        self.relationships
            .iter()
            .filter(move |rel| rel.relation == relation)
            .map(|rel| rel.task.as_str())
    }

    pub fn has(&self, relationship: &Relationship) -> bool {
        self.relationships.contains(relationship)
    }

    /// Returns true if the entry was not already present.
    pub fn insert_relationship(&mut self, relationship: Relationship) -> bool {
        if self.has(&relationship) {
            return false;
        }
        self.relationships.push(relationship);
        self.relationships.sort();
        true
    }

    /// Returns true if the entry was present.
    pub fn remove_relationship(&mut self, relationship: &Relationship) -> bool {
        let before = self.relationships.len();
        self.relationships.retain(|rel| rel != relationship);
        before != self.relationships.len()
    }

    /// Collapse duplicate entries; the list is a set.
    pub fn normalize(&mut self) {
        self.relationships.sort();
        self.relationships.dedup();
    }
}

/// Check that an id is usable as a stable, filesystem-safe key.
pub fn validate_task_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= MAX_TASK_ID_LEN
        && !id.starts_with('.')
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidTaskId(id.to_string()))
    }
}

/// Legacy relationship keys present at the top level of a stored document.
pub fn legacy_keys(document: &Value) -> Vec<String> {
    let Some(object) = document.as_object() else {
        return Vec::new();
    };
    LEGACY_FIELDS
        .iter()
        .filter(|key| object.contains_key(**key))
        .map(|key| key.to_string())
        .collect()
}

/// Decode a stored document, rejecting legacy relationship fields.
pub fn decode_record(expected_id: &str, document: Value) -> Result<TaskRecord> {
    let legacy = legacy_keys(&document);
    if !legacy.is_empty() {
        return Err(Error::LegacySchema {
            task: expected_id.to_string(),
            fields: legacy,
        });
    }
    let mut record: TaskRecord = serde_json::from_value(document)?;
    if record.id != expected_id {
        return Err(Error::OperationFailed(format!(
            "record for {expected_id} carries id {}",
            record.id
        )));
    }
    record.normalize();
    Ok(record)
}

/// Guard for the advisory locks held across one logical change.
#[derive(Debug, Default)]
pub struct TaskLocks {
    locks: Vec<FileLock>,
}

impl TaskLocks {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Persistence boundary for task records.
///
/// `save` is a compare-and-swap keyed on `TaskRecord::version`: it succeeds only
/// if the stored version still equals the record's version, and returns the
/// new version. Otherwise it fails with [`Error::Conflict`].
pub trait TaskStore {
    fn load(&self, id: &str) -> Result<TaskRecord>;

    fn save(&self, record: &TaskRecord) -> Result<u64>;

    /// Create a new record; fails with `TaskExists` if the id is taken.
    fn insert(&self, record: &TaskRecord) -> Result<()>;

    /// Delete a record if its stored version matches.
    fn remove(&self, id: &str, expected_version: u64) -> Result<()>;

    fn list_ids(&self) -> Result<Vec<String>>;

    /// Advisory locks for the given ids, acquired in a global order.
    fn lock_tasks(&self, ids: &[String]) -> Result<TaskLocks>;

    /// Lock held while a cycle check reads the whole graph. Always taken
    /// before any task lock.
    fn lock_graph(&self) -> Result<TaskLocks> {
        Ok(TaskLocks::none())
    }

    fn exists(&self, id: &str) -> Result<bool> {
        match self.load(id) {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Snapshot of every record. Records deleted mid-scan are skipped.
    fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let mut records = Vec::new();
        for id in self.list_ids()? {
            match self.load(&id) {
                Ok(record) => records.push(record),
                Err(Error::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }
}

/// File-backed store: one JSON document per task.
#[derive(Debug, Clone)]
pub struct FileTaskStore {
    root: PathBuf,
    lock_timeout_ms: u64,
}

impl FileTaskStore {
    pub fn new(root: impl Into<PathBuf>, lock_timeout_ms: u64) -> Self {
        Self {
            root: root.into(),
            lock_timeout_ms,
        }
    }

    /// Open an existing store with the default lock timeout.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self::new(root, DEFAULT_LOCK_TIMEOUT_MS)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join(TASKS_DIR)
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(LOCKS_DIR)
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}.{RECORD_EXT}"))
    }

    fn write_lock_path(&self, id: &str) -> PathBuf {
        self.tasks_dir().join(format!("{id}.{RECORD_EXT}.lock"))
    }

    fn task_lock_path(&self, id: &str) -> PathBuf {
        self.locks_dir().join(format!("{id}.lock"))
    }

    pub fn init(&self) -> Result<()> {
        fs::create_dir_all(self.tasks_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.tasks_dir().is_dir()
    }

    /// Store-wide lock, used for whole-store rewrites.
    pub fn lock_store(&self) -> Result<FileLock> {
        FileLock::acquire(self.root.join(STORE_LOCK), self.lock_timeout_ms)
    }

    /// Raw stored document, without schema checks.
    pub fn read_document(&self, id: &str) -> Result<Value> {
        validate_task_id(id)?;
        let path = self.record_path(id);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// Overwrite a record without a version check. Callers hold the store lock.
    pub fn overwrite(&self, record: &TaskRecord) -> Result<()> {
        validate_task_id(&record.id)?;
        let _write = FileLock::acquire(self.write_lock_path(&record.id), self.lock_timeout_ms)?;
        self.write_record(record)
    }

    /// Put a raw document back verbatim. Used to undo a partial migration.
    pub fn restore_document(&self, id: &str, document: &Value) -> Result<()> {
        validate_task_id(id)?;
        let _write = FileLock::acquire(self.write_lock_path(id), self.lock_timeout_ms)?;
        let json = serde_json::to_string_pretty(document)?;
        lock::write_atomic(self.record_path(id), json.as_bytes())
    }

    fn write_record(&self, record: &TaskRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        lock::write_atomic(self.record_path(&record.id), json.as_bytes())
    }

    fn stored_version(&self, id: &str) -> Result<u64> {
        Ok(self.load(id)?.version)
    }
}

impl TaskStore for FileTaskStore {
    fn load(&self, id: &str) -> Result<TaskRecord> {
        let document = self.read_document(id)?;
        decode_record(id, document)
    }

    fn save(&self, record: &TaskRecord) -> Result<u64> {
        validate_task_id(&record.id)?;
        let _write = FileLock::acquire(self.write_lock_path(&record.id), self.lock_timeout_ms)?;

        let found = self.stored_version(&record.id)?;
        if found != record.version {
            return Err(Error::Conflict {
                task: record.id.clone(),
                expected: record.version,
                found,
            });
        }

        let mut next = record.clone();
        next.version = record.version + 1;
        next.normalize();
        self.write_record(&next)?;
        tracing::debug!(task = %next.id, version = next.version, "saved task record");
        Ok(next.version)
    }

    fn insert(&self, record: &TaskRecord) -> Result<()> {
        validate_task_id(&record.id)?;
        fs::create_dir_all(self.tasks_dir())?;
        let _write = FileLock::acquire(self.write_lock_path(&record.id), self.lock_timeout_ms)?;

        if self.record_path(&record.id).exists() {
            return Err(Error::TaskExists(record.id.clone()));
        }
        let mut stored = record.clone();
        stored.normalize();
        self.write_record(&stored)
    }

    fn remove(&self, id: &str, expected_version: u64) -> Result<()> {
        validate_task_id(id)?;
        let _write = FileLock::acquire(self.write_lock_path(id), self.lock_timeout_ms)?;

        let found = self.stored_version(id)?;
        if found != expected_version {
            return Err(Error::Conflict {
                task: id.to_string(),
                expected: expected_version,
                found,
            });
        }
        fs::remove_file(self.record_path(id))?;
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        let dir = self.tasks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let suffix = format!(".{RECORD_EXT}");
        let mut ids = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = name.strip_suffix(&suffix) {
                if validate_task_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn lock_tasks(&self, ids: &[String]) -> Result<TaskLocks> {
        for id in ids {
            validate_task_id(id)?;
        }
        let paths: Vec<PathBuf> = ids.iter().map(|id| self.task_lock_path(id)).collect();
        let locks = lock::acquire_ordered(&paths, self.lock_timeout_ms)?;
        Ok(TaskLocks { locks })
    }

    fn lock_graph(&self) -> Result<TaskLocks> {
        let lock = FileLock::acquire(self.root.join(GRAPH_LOCK), self.lock_timeout_ms)?;
        Ok(TaskLocks { locks: vec![lock] })
    }
}

/// In-memory store with the same compare-and-swap semantics.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<BTreeMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record as-is, bypassing checks. For seeding fixtures.
    pub fn put_raw(&self, record: TaskRecord) {
        self.with_records(|records| {
            records.insert(record.id.clone(), record);
        });
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut BTreeMap<String, TaskRecord>) -> T) -> T {
        let mut guard = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl TaskStore for MemoryTaskStore {
    fn load(&self, id: &str) -> Result<TaskRecord> {
        self.with_records(|records| {
            records
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(id.to_string()))
        })
    }

    fn save(&self, record: &TaskRecord) -> Result<u64> {
        self.with_records(|records| {
            let stored = records
                .get_mut(&record.id)
                .ok_or_else(|| Error::NotFound(record.id.clone()))?;
            if stored.version != record.version {
                return Err(Error::Conflict {
                    task: record.id.clone(),
                    expected: record.version,
                    found: stored.version,
                });
            }
            let mut next = record.clone();
            next.version = record.version + 1;
            next.normalize();
            *stored = next;
            Ok(stored.version)
        })
    }

    fn insert(&self, record: &TaskRecord) -> Result<()> {
        validate_task_id(&record.id)?;
        self.with_records(|records| {
            if records.contains_key(&record.id) {
                return Err(Error::TaskExists(record.id.clone()));
            }
            let mut stored = record.clone();
            stored.normalize();
            records.insert(record.id.clone(), stored);
            Ok(())
        })
    }

    fn remove(&self, id: &str, expected_version: u64) -> Result<()> {
        self.with_records(|records| {
            let found = records
                .get(id)
                .map(|record| record.version)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if found != expected_version {
                return Err(Error::Conflict {
                    task: id.to_string(),
                    expected: expected_version,
                    found,
                });
            }
            records.remove(id);
            Ok(())
        })
    }

    fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self.with_records(|records| records.keys().cloned().collect()))
    }

    fn lock_tasks(&self, _ids: &[String]) -> Result<TaskLocks> {
        Ok(TaskLocks::none())
    }
}
