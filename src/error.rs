//! Error types for tasklink
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task, malformed record)
//! - 3: Blocked by graph policy (cycle, second parent, unmet guard)
//! - 4: Operation failed (corrupt store, write conflict, I/O)

use std::path::PathBuf;

use serde_json::json;
use thiserror::Error;

use crate::migrate::MigrationConflict;
use crate::model::{GatingClass, RelationType, TaskStatus};
use crate::validate::{CompletionBlocker, Violation};

/// Exit codes for the tasklink CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const POLICY_BLOCKED: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for registry operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task {task} cannot hold a {relation} relationship to itself")]
    SelfEdge { task: String, relation: RelationType },

    #[error("task already exists: {0}")]
    TaskExists(String),

    #[error("invalid task id '{0}'")]
    InvalidTaskId(String),

    #[error("task {task} uses legacy relationship fields: {}", fields.join(", "))]
    LegacySchema { task: String, fields: Vec<String> },

    #[error("no tasklink store at {0}")]
    StoreNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Policy blocks (exit code 3)
    #[error("task {task} already has parent {existing}; use move-parent to re-parent under {requested}")]
    MultipleParents {
        task: String,
        existing: String,
        requested: String,
    },

    #[error("cannot link: would create a {class} cycle between {from} and {to}")]
    CycleDetected {
        from: String,
        to: String,
        class: GatingClass,
        path: Vec<String>,
    },

    #[error("task {task} is not ready to claim; waiting on {}", pending.join(", "))]
    NotReady { task: String, pending: Vec<String> },

    #[error("task {task} cannot be completed: {blocker}")]
    CannotComplete {
        task: String,
        blocker: CompletionBlocker,
    },

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    // Operation failures (exit code 4)
    #[error("relationship graph is corrupt ({} violation(s))", .0.len())]
    CorruptGraph(Vec<Violation>),

    #[error("stale write for {task}: expected version {expected}, found {found}")]
    Conflict {
        task: String,
        expected: u64,
        found: u64,
    },

    #[error("task {task} was modified concurrently; retry the operation")]
    ConcurrentModification { task: String },

    #[error("legacy data cannot be migrated unambiguously ({} conflict(s))", .0.len())]
    MigrationConflict(Vec<MigrationConflict>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::NotFound(_)
            | Error::SelfEdge { .. }
            | Error::TaskExists(_)
            | Error::InvalidTaskId(_)
            | Error::LegacySchema { .. }
            | Error::StoreNotFound(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            // Policy blocks
            Error::MultipleParents { .. }
            | Error::CycleDetected { .. }
            | Error::NotReady { .. }
            | Error::CannotComplete { .. }
            | Error::InvalidTransition { .. } => exit_codes::POLICY_BLOCKED,

            // Operation failures
            Error::CorruptGraph(_)
            | Error::Conflict { .. }
            | Error::ConcurrentModification { .. }
            | Error::MigrationConflict(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Stable machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::SelfEdge { .. } => "self_edge",
            Error::TaskExists(_) => "task_exists",
            Error::InvalidTaskId(_) => "invalid_task_id",
            Error::LegacySchema { .. } => "legacy_schema",
            Error::StoreNotFound(_) => "store_not_found",
            Error::InvalidConfig(_) => "invalid_config",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::MultipleParents { .. } => "multiple_parents",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::NotReady { .. } => "not_ready",
            Error::CannotComplete { .. } => "cannot_complete",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::CorruptGraph(_) => "corrupt_graph",
            Error::Conflict { .. } => "conflict",
            Error::ConcurrentModification { .. } => "concurrent_modification",
            Error::MigrationConflict(_) => "migration_conflict",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::TomlParse(_) | Error::TomlSerialize(_) => "toml",
            Error::LockFailed(_) => "lock_failed",
            Error::OperationFailed(_) => "operation_failed",
        }
    }

    /// Structured context for the error, if any
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::NotFound(task) | Error::TaskExists(task) | Error::InvalidTaskId(task) => {
                Some(json!({ "task": task }))
            }
            Error::SelfEdge { task, relation } => {
                Some(json!({ "task": task, "relation": relation }))
            }
            Error::LegacySchema { task, fields } => {
                Some(json!({ "task": task, "fields": fields }))
            }
            Error::InvalidConfig(message)
            | Error::InvalidArgument(message)
            | Error::OperationFailed(message) => Some(json!({ "message": message })),
            Error::MultipleParents {
                task,
                existing,
                requested,
            } => Some(json!({
                "task": task,
                "existing_parent": existing,
                "requested_parent": requested,
            })),
            Error::CycleDetected {
                from,
                to,
                class,
                path,
            } => Some(json!({
                "from": from,
                "to": to,
                "class": class,
                "path": path,
            })),
            Error::NotReady { task, pending } => {
                Some(json!({ "task": task, "pending": pending }))
            }
            Error::CannotComplete { task, blocker } => {
                Some(json!({ "task": task, "blocker": blocker }))
            }
            Error::InvalidTransition { task, from, to } => {
                Some(json!({ "task": task, "from": from, "to": to }))
            }
            Error::CorruptGraph(violations) => Some(json!({ "violations": violations })),
            Error::Conflict {
                task,
                expected,
                found,
            } => Some(json!({ "task": task, "expected": expected, "found": found })),
            Error::ConcurrentModification { task } => Some(json!({ "task": task })),
            Error::MigrationConflict(conflicts) => Some(json!({ "conflicts": conflicts })),
            Error::StoreNotFound(path) | Error::LockFailed(path) => {
                Some(json!({ "path": path.display().to_string() }))
            }
            Error::Io(_) | Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => None,
        }
    }
}

/// Result type alias for tasklink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub kind: &'static str,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            kind: err.kind(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
