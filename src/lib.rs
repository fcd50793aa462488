//! tasklink - Task Relationship Registry
//!
//! This library keeps typed relationships between task records consistent
//! under concurrent writers, and backs the `tasklink` CLI.
//!
//! # Core Concepts
//!
//! - **Relationships**: `parent`/`child`, `depends_on`/`blocks` and `related`,
//!   always stored on both tasks
//! - **Gating classes**: hierarchy and dependency links gate work; related
//!   links are informational
//! - **Invariants**: symmetric edges, one parent per task, no hierarchy or
//!   dependency cycles, no dangling references
//! - **Guards**: a task is claimable once its dependencies are complete, and
//!   completable once its children are
//! - **Migration**: legacy per-field relationship data is rewritten into the
//!   canonical list in one all-or-nothing pass
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.tasklink.toml`
//! - `error`: Error types, exit codes and result aliases
//! - `model`: Relationship types, statuses and edge deltas
//! - `store`: Task records and the file/in-memory stores
//! - `graph`: In-memory adjacency index over the store
//! - `validate`: Cycle detection, guards and whole-graph scans
//! - `service`: Atomic relationship and status mutations
//! - `migrate`: Legacy schema translation
//! - `output`: Human and JSON output envelopes
//! - `lock`: File locking and atomic writes for concurrency safety

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod lock;
pub mod migrate;
pub mod model;
pub mod output;
pub mod service;
pub mod store;
pub mod validate;

pub use error::{Error, Result};
