//! tasklink migrate: legacy relationship fields to canonical records.

use crate::cli::{CommonOptions, Context};
use crate::error::Result;
use crate::migrate::migrate_store;
use crate::output::{emit_success, HumanOutput};

pub struct MigrateOptions {
    pub dry_run: bool,
    pub infer_inverse: bool,
    pub common: CommonOptions,
}

pub fn run(options: MigrateOptions) -> Result<()> {
    let ctx = Context::load(options.common.root.as_deref())?;

    let mut migration = ctx.config.migration.options();
    migration.dry_run = options.dry_run;
    migration.infer_missing_inverse |= options.infer_inverse;

    let report = migrate_store(&ctx.store, migration)?;

    let header = match (report.dry_run, report.rewritten.is_empty()) {
        (_, true) => "tasklink migrate: nothing to do",
        (true, false) => "tasklink migrate: dry run",
        (false, false) => "tasklink migrate: store migrated",
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("legacy records", report.migrated.len().to_string());
    human.push_summary("already canonical", report.already_canonical.len().to_string());
    human.push_summary("rewritten", report.rewritten.len().to_string());
    human.push_summary("relationships", report.relationships.to_string());
    for id in &report.rewritten {
        human.push_detail(id.clone());
    }
    if report.dry_run && !report.rewritten.is_empty() {
        human.push_warning("dry run: no records were written");
        human.push_next_step("tasklink migrate");
    }

    emit_success(options.common.output(), "migrate", &report, Some(&human))
}
