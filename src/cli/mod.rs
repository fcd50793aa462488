//! Command-line interface for tasklink
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputOptions;
use crate::service::{RelationshipService, ServiceOptions};
use crate::store::FileTaskStore;

mod check;
mod init;
mod link;
mod migrate;
mod task;

/// tasklink - relationship registry for tasks
///
/// Records parent/child, dependency and related links between tasks,
/// keeps both sides of every link in sync, and refuses links that would
/// break the hierarchy or introduce a dependency cycle.
#[derive(Parser, Debug)]
#[command(name = "tasklink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Project root holding `.tasklink.toml` (defaults to current directory)
    #[arg(long, global = true, env = "TASKLINK_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the config file and task store
    Init,

    /// Task records and status transitions
    #[command(subcommand)]
    Task(TaskCommands),

    /// Relationships between tasks
    #[command(subcommand)]
    Link(LinkCommands),

    /// Scan the whole store for relationship violations
    Check,

    /// Rewrite legacy relationship fields into canonical records
    Migrate {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Accept one-sided legacy links when the other side is silent
        #[arg(long)]
        infer_inverse: bool,
    },
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    New {
        /// Task title
        title: String,

        /// Explicit task id (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Owner recorded on the task
        #[arg(long)]
        owner: Option<String>,

        /// Tags recorded on the task (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Show a task and its relationships
    Show {
        /// Task id
        id: String,
    },

    /// List tasks
    Ls {
        /// Only list tasks with this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Delete a task and unlink it from every neighbor
    Rm {
        /// Task id
        id: String,
    },

    /// Claim a pending task (all dependencies must be complete)
    Claim {
        /// Task id
        id: String,
    },

    /// Start a claimed task
    Start {
        /// Task id
        id: String,
    },

    /// Complete an in-progress task
    Complete {
        /// Task id
        id: String,
    },

    /// Reopen a completed task
    Reopen {
        /// Task id
        id: String,
    },

    /// Report claim readiness and completion guard for a task
    Ready {
        /// Task id
        id: String,
    },
}

/// Link subcommands
#[derive(Subcommand, Debug)]
pub enum LinkCommands {
    /// Link two tasks: `a` holds TYPE -> `b`, `b` holds the inverse
    Add {
        /// Relationship type (parent, child, depends_on, blocks, related)
        #[arg(value_name = "TYPE")]
        relation: String,
        /// Owning task
        a: String,
        /// Target task
        b: String,
    },

    /// Remove a link from both sides
    Rm {
        /// Relationship type
        #[arg(value_name = "TYPE")]
        relation: String,
        /// Owning task
        a: String,
        /// Target task
        b: String,
    },

    /// Re-parent a task, replacing its current parent
    MoveParent {
        /// Child task
        child: String,
        /// New parent task
        parent: String,
    },

    /// List a task's relationships
    Ls {
        /// Task id
        id: String,

        /// Only list relationships of this type
        #[arg(long = "type", value_name = "TYPE")]
        relation: Option<String>,
    },
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct CommonOptions {
    pub root: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

impl CommonOptions {
    pub fn output(&self) -> OutputOptions {
        OutputOptions {
            json: self.json,
            quiet: self.quiet,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let common = CommonOptions {
            root: self.root,
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Init => init::run(common),
            Commands::Task(cmd) => match cmd {
                TaskCommands::New {
                    title,
                    id,
                    owner,
                    tags,
                } => task::run_new(task::NewOptions {
                    title,
                    id,
                    owner,
                    tags,
                    common,
                }),
                TaskCommands::Show { id } => task::run_show(id, common),
                TaskCommands::Ls { status } => task::run_list(status, common),
                TaskCommands::Rm { id } => task::run_delete(id, common),
                TaskCommands::Claim { id } => {
                    task::run_transition(task::TransitionKind::Claim, id, common)
                }
                TaskCommands::Start { id } => {
                    task::run_transition(task::TransitionKind::Start, id, common)
                }
                TaskCommands::Complete { id } => {
                    task::run_transition(task::TransitionKind::Complete, id, common)
                }
                TaskCommands::Reopen { id } => {
                    task::run_transition(task::TransitionKind::Reopen, id, common)
                }
                TaskCommands::Ready { id } => task::run_ready(id, common),
            },
            Commands::Link(cmd) => match cmd {
                LinkCommands::Add { relation, a, b } => link::run_add(link::LinkOptions {
                    relation,
                    a,
                    b,
                    common,
                }),
                LinkCommands::Rm { relation, a, b } => link::run_remove(link::LinkOptions {
                    relation,
                    a,
                    b,
                    common,
                }),
                LinkCommands::MoveParent { child, parent } => {
                    link::run_move_parent(child, parent, common)
                }
                LinkCommands::Ls { id, relation } => link::run_list(id, relation, common),
            },
            Commands::Check => check::run(common),
            Commands::Migrate {
                dry_run,
                infer_inverse,
            } => migrate::run(migrate::MigrateOptions {
                dry_run,
                infer_inverse,
                common,
            }),
        }
    }
}

/// Resolved project root, config and store for one command.
pub(crate) struct Context {
    pub root: PathBuf,
    pub config: Config,
    pub store: FileTaskStore,
}

impl Context {
    /// Load config and require an initialized store.
    pub fn load(root: Option<&Path>) -> Result<Self> {
        let context = Self::load_uninitialized(root)?;
        if !context.store.is_initialized() {
            return Err(Error::StoreNotFound(context.store.root().to_path_buf()));
        }
        Ok(context)
    }

    pub fn load_uninitialized(root: Option<&Path>) -> Result<Self> {
        let root = match root {
            Some(path) => path.to_path_buf(),
            None => std::env::current_dir()?,
        };
        let config = Config::load_from_root(&root)?;
        let store = FileTaskStore::new(config.store_dir(&root), config.store.lock_timeout_ms);
        Ok(Self {
            root,
            config,
            store,
        })
    }

    pub fn service(&self) -> Result<RelationshipService<FileTaskStore>> {
        RelationshipService::open(self.store.clone(), ServiceOptions::from(&self.config))
    }
}
