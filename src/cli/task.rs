//! tasklink task command implementations.

use serde::Serialize;

use crate::cli::{CommonOptions, Context};
use crate::error::Result;
use crate::model::{Relationship, TaskStatus};
use crate::output::{emit_success, HumanOutput};
use crate::service::{NewTask, Transition};
use crate::store::TaskRecord;
use crate::validate::CompletionCheck;

pub struct NewOptions {
    pub title: String,
    pub id: Option<String>,
    pub owner: Option<String>,
    pub tags: Vec<String>,
    pub common: CommonOptions,
}

#[derive(Debug, Clone, Copy)]
pub enum TransitionKind {
    Claim,
    Start,
    Complete,
    Reopen,
}

impl TransitionKind {
    fn command(self) -> &'static str {
        match self {
            TransitionKind::Claim => "task claim",
            TransitionKind::Start => "task start",
            TransitionKind::Complete => "task complete",
            TransitionKind::Reopen => "task reopen",
        }
    }

    fn header(self) -> &'static str {
        match self {
            TransitionKind::Claim => "Task claimed",
            TransitionKind::Start => "Task started",
            TransitionKind::Complete => "Task completed",
            TransitionKind::Reopen => "Task reopened",
        }
    }
}

#[derive(Serialize)]
struct TaskCreatedOutput {
    id: String,
    title: String,
    status: TaskStatus,
}

#[derive(Serialize)]
struct TaskListEntry {
    id: String,
    title: Option<String>,
    status: TaskStatus,
    relationships: usize,
}

#[derive(Serialize)]
struct TaskListOutput {
    total: usize,
    tasks: Vec<TaskListEntry>,
}

#[derive(Serialize)]
struct TaskDeletedOutput {
    id: String,
    unlinked: Vec<Relationship>,
}

#[derive(Serialize)]
struct ReadinessOutput {
    id: String,
    status: TaskStatus,
    ready_to_claim: bool,
    pending_dependencies: Vec<String>,
    completion: CompletionCheck,
}

pub fn run_new(options: NewOptions) -> Result<()> {
    let ctx = Context::load(options.common.root.as_deref())?;
    let mut service = ctx.service()?;

    let record = service.create_task(NewTask {
        id: options.id,
        title: options.title,
        owner: options.owner,
        tags: options.tags,
    })?;

    let output = TaskCreatedOutput {
        id: record.id.clone(),
        title: record.title().unwrap_or_default().to_string(),
        status: record.status,
    };

    let mut human = HumanOutput::new("Task created");
    human.push_summary("ID", output.id.clone());
    human.push_summary("Title", output.title.clone());
    human.push_summary("Status", output.status.to_string());
    human.push_next_step(format!("tasklink link add parent {} <parent>", output.id));

    emit_success(options.common.output(), "task new", &output, Some(&human))
}

pub fn run_show(id: String, common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;
    let service = ctx.service()?;
    let record = service.task(&id)?;

    let mut human = HumanOutput::new(format!("Task {}", record.id));
    push_record_summary(&mut human, &record);
    for rel in &record.relationships {
        human.push_detail(format!("{} {}", rel.relation, rel.task));
    }

    emit_success(common.output(), "task show", &record, Some(&human))
}

pub fn run_list(status: Option<String>, common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;
    let service = ctx.service()?;
    let status = status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;

    let tasks: Vec<TaskListEntry> = service
        .tasks()?
        .into_iter()
        .filter(|record| status.map_or(true, |wanted| record.status == wanted))
        .map(|record| TaskListEntry {
            title: record.title().map(str::to_string),
            status: record.status,
            relationships: record.relationships.len(),
            id: record.id,
        })
        .collect();

    let output = TaskListOutput {
        total: tasks.len(),
        tasks,
    };

    let mut human = HumanOutput::new(format!("{} task(s)", output.total));
    for task in &output.tasks {
        human.push_detail(format!(
            "{} [{}] {}",
            task.id,
            task.status,
            task.title.as_deref().unwrap_or("")
        ));
    }

    emit_success(common.output(), "task ls", &output, Some(&human))
}

pub fn run_delete(id: String, common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;
    let mut service = ctx.service()?;
    let unlinked = service.delete_task(&id)?;

    let mut human = HumanOutput::new("Task deleted");
    human.push_summary("ID", id.clone());
    human.push_summary("Unlinked", unlinked.len().to_string());
    for rel in &unlinked {
        human.push_detail(format!("{} {}", rel.relation, rel.task));
    }

    let output = TaskDeletedOutput { id, unlinked };
    emit_success(common.output(), "task rm", &output, Some(&human))
}

pub fn run_transition(kind: TransitionKind, id: String, common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;
    let mut service = ctx.service()?;

    let transition = match kind {
        TransitionKind::Claim => service.claim(&id)?,
        TransitionKind::Start => service.start(&id)?,
        TransitionKind::Complete => service.complete(&id)?,
        TransitionKind::Reopen => service.reopen(&id)?,
    };

    let human = transition_human(kind, &transition);
    emit_success(common.output(), kind.command(), &transition, Some(&human))
}

pub fn run_ready(id: String, common: CommonOptions) -> Result<()> {
    let ctx = Context::load(common.root.as_deref())?;
    let service = ctx.service()?;

    let status = service.task(&id)?.status;
    let output = ReadinessOutput {
        ready_to_claim: service.is_ready_to_claim(&id)?,
        pending_dependencies: service.pending_dependencies(&id)?,
        completion: service.can_complete(&id)?,
        status,
        id,
    };

    let mut human = HumanOutput::new(format!("Task {}", output.id));
    human.push_summary("Status", output.status.to_string());
    human.push_summary(
        "Ready to claim",
        if output.ready_to_claim { "yes" } else { "no" },
    );
    match output.completion.reason() {
        None => human.push_summary("Can complete", "yes"),
        Some(blocker) => human.push_summary("Can complete", format!("no ({blocker})")),
    }
    for dep in &output.pending_dependencies {
        human.push_detail(format!("waiting on {dep}"));
    }

    emit_success(common.output(), "task ready", &output, Some(&human))
}

fn push_record_summary(human: &mut HumanOutput, record: &TaskRecord) {
    if let Some(title) = record.title() {
        human.push_summary("Title", title);
    }
    human.push_summary("Status", record.status.to_string());
    if let Some(resume) = record.resume_status {
        human.push_summary("Resumes as", resume.to_string());
    }
    human.push_summary("Version", record.version.to_string());
    human.push_summary("Updated", record.updated_at.to_rfc3339());
}

fn transition_human(kind: TransitionKind, transition: &Transition) -> HumanOutput {
    let mut human = HumanOutput::new(kind.header());
    human.push_summary("ID", transition.task.clone());
    human.push_summary("Status", format!("{} -> {}", transition.from, transition.to));
    for change in &transition.cascaded {
        human.push_detail(format!("{}: {} -> {}", change.task, change.from, change.to));
    }
    human
}
