//! tasklink check: whole-store consistency scan.

use serde::Serialize;

use crate::cli::{CommonOptions, Context};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::service::RelationshipService;
use crate::store::{FileTaskStore, TaskStore};

#[derive(Serialize)]
struct CheckOutput {
    tasks: usize,
    violations: usize,
}

/// A clean store reports success; any violation fails with `CorruptGraph`.
pub fn run(common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;

    let violations = RelationshipService::<FileTaskStore>::validate_store(&ctx.store)?;
    if !violations.is_empty() {
        return Err(Error::CorruptGraph(violations));
    }

    let output = CheckOutput {
        tasks: ctx.store.list_ids()?.len(),
        violations: 0,
    };

    let mut human = HumanOutput::new("tasklink check: no violations");
    human.push_summary("tasks", output.tasks.to_string());

    emit_success(common.output(), "check", &output, Some(&human))
}
