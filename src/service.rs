//! Relationship service
//!
//! The single mutation surface for relationships and task status. Every
//! change follows the same protocol:
//!
//! 1. Lock the involved task ids through the store (global order).
//! 2. Re-read those records and refresh them in the index.
//! 3. Plan the change against the index; every check runs here, before any
//!    write.
//! 4. Write changed records in lexicographic id order. If a write fails,
//!    already-written records are restored in reverse order.
//! 5. Apply the change to the index.
//!
//! A stale-version `Conflict` from the store restarts the protocol, up to
//! `max_conflict_retries` times, and then surfaces as
//! `ConcurrentModification`.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graph::GraphIndex;
use crate::model::{
    DeltaOp, EdgePair, GatingClass, RelationDelta, RelationType, Relationship, TaskStatus,
};
use crate::store::{validate_task_id, TaskRecord, TaskStore};
use crate::validate::{self, CompletionCheck, CompletionPolicy, Validator, Violation};

const ULID_TIME_LEN: usize = 10;
const ULID_RANDOM_LEN: usize = 16;
const ID_ATTEMPTS_PER_LEN: usize = 32;
const MAX_INSERT_ATTEMPTS: usize = 8;

/// Knobs the service needs from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub completion: CompletionPolicy,
    pub max_conflict_retries: u32,
    pub id_prefix: String,
    pub id_min_len: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServiceOptions {
    fn from(config: &Config) -> Self {
        Self {
            completion: config.policy.completion_policy(),
            max_conflict_retries: config.policy.max_conflict_retries,
            id_prefix: config.tasks.id_prefix.trim().to_string(),
            id_min_len: config.tasks.id_min_len,
        }
    }
}

/// Input for [`RelationshipService::create_task`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Explicit id; generated from the configured prefix when absent
    pub id: Option<String>,
    pub title: String,
    pub owner: Option<String>,
    pub tags: Vec<String>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub task: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Result of a status transition, including dependents moved as a consequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub task: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cascaded: Vec<StatusChange>,
}

struct StatusUpdate {
    task: String,
    status: TaskStatus,
    resume_status: Option<TaskStatus>,
}

/// Everything one logical change will write, decided before writing.
struct Plan<T> {
    output: T,
    deltas: Vec<RelationDelta>,
    statuses: Vec<StatusUpdate>,
    removals: Vec<String>,
}

impl<T> Plan<T> {
    fn noop(output: T) -> Self {
        Self {
            output,
            deltas: Vec::new(),
            statuses: Vec::new(),
            removals: Vec::new(),
        }
    }

    fn edges(output: T, deltas: Vec<RelationDelta>) -> Self {
        Self {
            deltas,
            ..Self::noop(output)
        }
    }

    fn status(output: T, update: StatusUpdate) -> Self {
        Self {
            statuses: vec![update],
            ..Self::noop(output)
        }
    }

    fn is_empty(&self) -> bool {
        self.deltas.is_empty() && self.statuses.is_empty() && self.removals.is_empty()
    }
}

/// Which records a change locks and re-reads.
struct Scope {
    tasks: Vec<String>,
    /// A task plus its current neighbors over the given relations
    neighborhood: Option<(String, &'static [RelationType])>,
    /// Take the graph lock and re-read the whole store before planning
    graph_wide: bool,
}

impl Scope {
    fn tasks(ids: &[&str]) -> Self {
        Self {
            tasks: ids.iter().map(|id| id.to_string()).collect(),
            neighborhood: None,
            graph_wide: false,
        }
    }

    fn neighborhood(task: &str, relations: &'static [RelationType]) -> Self {
        Self {
            tasks: Vec::new(),
            neighborhood: Some((task.to_string(), relations)),
            graph_wide: false,
        }
    }

    fn and_task(mut self, id: &str) -> Self {
        self.tasks.push(id.to_string());
        self
    }

    fn graph_wide(mut self, graph_wide: bool) -> Self {
        self.graph_wide = graph_wide;
        self
    }
}

/// Locked, freshly read state handed to a planner.
struct Snapshot<'a> {
    index: &'a GraphIndex,
    records: &'a BTreeMap<String, TaskRecord>,
    policy: CompletionPolicy,
}

impl<'a> Snapshot<'a> {
    fn record(&self, id: &str) -> Result<&'a TaskRecord> {
        self.records
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn validator(&self) -> Validator<'a> {
        Validator::new(self.index, self.policy)
    }
}

enum Write {
    Save(TaskRecord),
    Remove { id: String, version: u64 },
}

impl Write {
    fn id(&self) -> &str {
        match self {
            Write::Save(record) => &record.id,
            Write::Remove { id, .. } => id,
        }
    }
}

/// Registry entry point; construct once per process and pass it around.
#[derive(Debug)]
pub struct RelationshipService<S: TaskStore> {
    store: S,
    index: GraphIndex,
    options: ServiceOptions,
}

impl<S: TaskStore> RelationshipService<S> {
    /// Build the index from the store, refusing a store with violations.
    pub fn open(store: S, options: ServiceOptions) -> Result<Self> {
        let records = store.load_all()?;
        let index = GraphIndex::build(&records)?;
        debug!(tasks = index.len(), "relationship index built");
        Ok(Self {
            store,
            index,
            options,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &GraphIndex {
        &self.index
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Scan a store without opening a service on it.
    pub fn validate_store(store: &S) -> Result<Vec<Violation>> {
        let records = store.load_all()?;
        Ok(validate::scan(&GraphIndex::from_records(&records)))
    }

    /// Re-read the whole store and report every violation.
    pub fn validate_graph(&self) -> Result<Vec<Violation>> {
        Self::validate_store(&self.store)
    }

    // --- relationships -------------------------------------------------

    /// Link `a` and `b`; `a` holds `relation -> b`, `b` holds the inverse.
    pub fn add_relationship(
        &mut self,
        relation: RelationType,
        a: &str,
        b: &str,
    ) -> Result<EdgePair> {
        let scope =
            Scope::tasks(&[a, b]).graph_wide(relation.class() != GatingClass::Informational);
        self.mutate("add_relationship", scope, |snap| {
            plan_add(snap, relation, a, b)
        })
    }

    /// Unlink both sides. Returns false, without writing, if nothing was linked.
    pub fn remove_relationship(
        &mut self,
        relation: RelationType,
        a: &str,
        b: &str,
    ) -> Result<bool> {
        let removed = self.mutate("remove_relationship", Scope::tasks(&[a, b]), |snap| {
            let owner = snap.record(a)?;
            let other = snap.record(b)?;
            let delta = RelationDelta::remove(relation, a, b);
            let pair = delta.edge_pair();
            if !owner.has(&pair.forward) && !other.has(&pair.inverse) {
                return Ok(Plan::noop(false));
            }
            Ok(Plan::edges(true, vec![delta]))
        })?;

        if removed && relation.class() == GatingClass::Dependency {
            let (dependent, _) = upward_edge(relation, a, b);
            if let Err(err) = self.release_if_ready(dependent) {
                warn!(task = %dependent, error = %err, "skipped dependent status update");
            }
        }
        Ok(removed)
    }

    /// Re-parent `child` under `new_parent`, dropping the old parent link.
    pub fn move_parent(&mut self, child: &str, new_parent: &str) -> Result<EdgePair> {
        let scope = Scope::neighborhood(child, &[RelationType::Parent])
            .and_task(new_parent)
            .graph_wide(true);
        self.mutate("move_parent", scope, |snap| {
            let record = snap.record(child)?;
            let parent = snap.record(new_parent)?;
            if child == new_parent {
                return Err(Error::SelfEdge {
                    task: child.to_string(),
                    relation: RelationType::Parent,
                });
            }

            let add = RelationDelta::add(RelationType::Parent, child, new_parent);
            let pair = add.edge_pair();
            let current: Vec<&str> = record.targets(RelationType::Parent).collect();
            if current == [new_parent] && parent.has(&pair.inverse) {
                return Ok(Plan::noop(pair));
            }

            check_cycle(
                &snap.validator(),
                GatingClass::Hierarchical,
                (child, new_parent),
                (child, new_parent),
            )?;

            let mut deltas: Vec<RelationDelta> = current
                .into_iter()
                .filter(|old| *old != new_parent)
                .map(|old| RelationDelta::remove(RelationType::Parent, child, old))
                .collect();
            deltas.push(add);
            Ok(Plan::edges(pair, deltas))
        })
    }

    /// Snapshot of a task's relationships, sorted by type then id.
    pub fn relationships_of(
        &self,
        task: &str,
        relation: Option<RelationType>,
    ) -> Result<Vec<Relationship>> {
        self.ensure_known(task)?;
        let mut relationships = self.index.relationships(task);
        if let Some(relation) = relation {
            relationships.retain(|rel| rel.relation == relation);
        }
        Ok(relationships)
    }

    // --- guards ----------------------------------------------------------

    pub fn is_ready_to_claim(&self, task: &str) -> Result<bool> {
        self.ensure_known(task)?;
        Ok(self.validator().is_ready_to_claim(task))
    }

    /// Immediate dependencies that keep `task` from being claimed.
    pub fn pending_dependencies(&self, task: &str) -> Result<Vec<String>> {
        self.ensure_known(task)?;
        Ok(self.validator().pending_dependencies(task))
    }

    pub fn can_complete(&self, task: &str) -> Result<CompletionCheck> {
        self.ensure_known(task)?;
        Ok(self.validator().can_complete(task))
    }

    // --- task lifecycle ------------------------------------------------------

    pub fn create_task(&mut self, new: NewTask) -> Result<TaskRecord> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument(
                "task title cannot be empty".to_string(),
            ));
        }

        let mut fields = Map::new();
        fields.insert("title".to_string(), Value::String(title.to_string()));
        if let Some(owner) = new.owner.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
            fields.insert("owner".to_string(), Value::String(owner.to_string()));
        }
        let tags: Vec<Value> = new
            .tags
            .iter()
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(|tag| Value::String(tag.to_string()))
            .collect();
        if !tags.is_empty() {
            fields.insert("tags".to_string(), Value::Array(tags));
        }

        let record = match new.id.as_deref().map(str::trim) {
            Some(id) => {
                validate_task_id(id)?;
                let mut record = TaskRecord::new(id);
                record.fields = fields;
                self.store.insert(&record)?;
                record
            }
            None => self.insert_generated(fields)?,
        };

        self.index.upsert_task(&record);
        debug!(task = %record.id, "created task");
        Ok(record)
    }

    /// Fresh read from the store.
    pub fn task(&self, id: &str) -> Result<TaskRecord> {
        self.store.load(id)
    }

    pub fn tasks(&self) -> Result<Vec<TaskRecord>> {
        self.store.load_all()
    }

    /// Delete a task, removing the inverse edge from every neighbor first.
    ///
    /// Dependents left without incomplete dependencies are released.
    pub fn delete_task(&mut self, id: &str) -> Result<Vec<Relationship>> {
        let removed = self.mutate(
            "delete_task",
            Scope::neighborhood(id, &RelationType::ALL),
            |snap| {
                let record = snap.record(id)?;
                let deltas = record
                    .relationships
                    .iter()
                    .filter(|rel| rel.task != id)
                    .map(|rel| RelationDelta::remove(rel.relation, id, rel.task.as_str()))
                    .collect();
                Ok(Plan {
                    output: record.relationships.clone(),
                    deltas,
                    statuses: Vec::new(),
                    removals: vec![id.to_string()],
                })
            },
        )?;

        for rel in removed.iter().filter(|rel| rel.relation == RelationType::Blocks) {
            if let Err(err) = self.release_if_ready(&rel.task) {
                warn!(task = %rel.task, error = %err, "skipped dependent status update");
            }
        }
        Ok(removed)
    }

    /// `pending -> claimed`, once every dependency is complete.
    pub fn claim(&mut self, id: &str) -> Result<Transition> {
        self.transition(id, TaskStatus::Pending, TaskStatus::Claimed)
    }

    /// `claimed -> in_progress`.
    pub fn start(&mut self, id: &str) -> Result<Transition> {
        self.transition(id, TaskStatus::Claimed, TaskStatus::InProgress)
    }

    /// `in_progress -> complete`, then release blocked dependents.
    pub fn complete(&mut self, id: &str) -> Result<Transition> {
        self.transition(id, TaskStatus::InProgress, TaskStatus::Complete)
    }

    /// `complete -> in_progress`, then hold dependents already under way.
    pub fn reopen(&mut self, id: &str) -> Result<Transition> {
        self.transition(id, TaskStatus::Complete, TaskStatus::InProgress)
    }

    fn transition(&mut self, id: &str, from: TaskStatus, to: TaskStatus) -> Result<Transition> {
        let scope = match to {
            TaskStatus::Claimed => Scope::neighborhood(id, &[RelationType::DependsOn]),
            TaskStatus::Complete => Scope::neighborhood(id, &[RelationType::Child]),
            _ => Scope::tasks(&[id]),
        };
        let mut transition = self.mutate("transition", scope, |snap| {
            plan_transition(snap, id, from, to)
        })?;

        if to == TaskStatus::Complete {
            transition.cascaded = self.release_dependents(id);
        } else if from == TaskStatus::Complete {
            transition.cascaded = self.hold_dependents(id);
        }
        Ok(transition)
    }

    /// Blocked dependents whose dependencies are all complete go back to
    /// the status they had before they were blocked.
    fn release_dependents(&mut self, id: &str) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for dependent in self.index.neighbors(id, RelationType::Blocks) {
            let result = self.release_if_ready(&dependent);
            collect_cascade(&mut changes, &dependent, result);
        }
        changes
    }

    /// `blocked -> resume_status` (or `pending`) once nothing gates `dependent`.
    fn release_if_ready(&mut self, dependent: &str) -> Result<Option<StatusChange>> {
        let scope = Scope::neighborhood(dependent, &[RelationType::DependsOn]);
        self.mutate("release_dependent", scope, |snap| {
            let record = snap.record(dependent)?;
            if record.status != TaskStatus::Blocked
                || !snap.validator().is_ready_to_claim(dependent)
            {
                return Ok(Plan::noop(None));
            }
            let to = record.resume_status.unwrap_or(TaskStatus::Pending);
            Ok(Plan::status(
                Some(StatusChange {
                    task: dependent.to_string(),
                    from: TaskStatus::Blocked,
                    to,
                }),
                StatusUpdate {
                    task: dependent.to_string(),
                    status: to,
                    resume_status: None,
                },
            ))
        })
    }

    /// Dependents already claimed or in progress become blocked.
    ///
    /// Pending dependents stay pending: claim re-checks their dependencies.
    /// Blocked ones are already waiting and keep their resume status.
    fn hold_dependents(&mut self, id: &str) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for dependent in self.index.neighbors(id, RelationType::Blocks) {
            let result = self.mutate("hold_dependent", Scope::tasks(&[&dependent]), |snap| {
                let record = snap.record(&dependent)?;
                if !matches!(record.status, TaskStatus::Claimed | TaskStatus::InProgress) {
                    return Ok(Plan::noop(None));
                }
                Ok(Plan::status(
                    Some(StatusChange {
                        task: dependent.clone(),
                        from: record.status,
                        to: TaskStatus::Blocked,
                    }),
                    StatusUpdate {
                        task: dependent.clone(),
                        status: TaskStatus::Blocked,
                        resume_status: Some(record.status),
                    },
                ))
            });
            collect_cascade(&mut changes, &dependent, result);
        }
        changes
    }

    // --- protocol ------------------------------------------------------------

    fn mutate<T, F>(&mut self, op: &'static str, scope: Scope, plan: F) -> Result<T>
    where
        F: Fn(&Snapshot<'_>) -> Result<Plan<T>>,
    {
        let attempts = self.options.max_conflict_retries + 1;
        let mut conflicted = String::new();
        for attempt in 1..=attempts {
            match self.try_mutate(op, &scope, &plan) {
                Err(Error::Conflict {
                    task,
                    expected,
                    found,
                }) => {
                    warn!(op, task = %task, expected, found, attempt, "stale task record; re-reading");
                    conflicted = task;
                }
                result => return result,
            }
        }
        Err(Error::ConcurrentModification { task: conflicted })
    }

    fn try_mutate<T, F>(&mut self, op: &'static str, scope: &Scope, plan: &F) -> Result<T>
    where
        F: Fn(&Snapshot<'_>) -> Result<Plan<T>>,
    {
        let _graph_lock = if scope.graph_wide {
            let lock = self.store.lock_graph()?;
            self.refresh_index()?;
            Some(lock)
        } else {
            None
        };

        let mut ids: BTreeSet<String> = scope.tasks.iter().cloned().collect();
        let mut required = ids.clone();
        let mut seen_neighbors = None;
        if let Some((task, relations)) = &scope.neighborhood {
            let record = self.load_fresh(task)?;
            let neighbors = neighbors_of(&record, relations);
            ids.insert(task.clone());
            required.insert(task.clone());
            ids.extend(neighbors.iter().cloned());
            seen_neighbors = Some((task.as_str(), *relations, record.version, neighbors));
        }

        let ids: Vec<String> = ids.into_iter().collect();
        let _locks = self.store.lock_tasks(&ids)?;

        let mut records = BTreeMap::new();
        for id in &ids {
            match self.load_fresh(id) {
                Ok(record) => {
                    records.insert(id.clone(), record);
                }
                Err(Error::NotFound(_)) if !required.contains(id) => {
                    warn!(op, task = %id, "neighbor no longer exists");
                }
                Err(err) => return Err(err),
            }
        }
        for record in records.values() {
            self.index.upsert_task(record);
        }

        // The neighborhood may have grown between the first read and locking.
        if let Some((task, relations, version, neighbors)) = &seen_neighbors {
            if let Some(record) = records.get(*task) {
                if !neighbors_of(record, relations).is_subset(neighbors) {
                    return Err(Error::Conflict {
                        task: task.to_string(),
                        expected: *version,
                        found: record.version,
                    });
                }
            }
        }

        let snapshot = Snapshot {
            index: &self.index,
            records: &records,
            policy: self.options.completion,
        };
        let plan = plan(&snapshot)?;
        if plan.is_empty() {
            debug!(op, "nothing to write");
            return Ok(plan.output);
        }

        let writes = stage(op, &records, &plan)?;
        self.commit(op, &writes, &records)?;

        for delta in &plan.deltas {
            self.index.apply(delta);
        }
        for update in &plan.statuses {
            self.index.set_status(&update.task, update.status);
        }
        for id in &plan.removals {
            self.index.remove_task(id);
        }
        debug!(op, writes = writes.len(), deltas = plan.deltas.len(), "committed");
        Ok(plan.output)
    }

    fn commit(
        &self,
        op: &'static str,
        writes: &[Write],
        originals: &BTreeMap<String, TaskRecord>,
    ) -> Result<()> {
        let mut done: Vec<(&Write, Option<u64>)> = Vec::with_capacity(writes.len());
        for write in writes {
            let result = match write {
                Write::Save(record) => self.store.save(record).map(Some),
                Write::Remove { id, version } => self.store.remove(id, *version).map(|()| None),
            };
            match result {
                Ok(version) => done.push((write, version)),
                Err(err) => {
                    if !done.is_empty() {
                        warn!(
                            op,
                            task = %write.id(),
                            error = %err,
                            written = done.len(),
                            "write failed; rolling back"
                        );
                        self.rollback(&done, originals);
                    }
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    fn rollback(&self, done: &[(&Write, Option<u64>)], originals: &BTreeMap<String, TaskRecord>) {
        for (write, version) in done.iter().rev() {
            let Some(original) = originals.get(write.id()) else {
                continue;
            };
            let mut restore = original.clone();
            let result = match (*write, *version) {
                (Write::Save(_), Some(version)) => {
                    restore.version = version;
                    self.store.save(&restore).map(|_| ())
                }
                _ => {
                    restore.version = original.version + 1;
                    self.store.insert(&restore)
                }
            };
            if let Err(err) = result {
                warn!(task = %write.id(), error = %err, "rollback failed; run `tasklink check`");
            }
        }
    }

    fn load_fresh(&mut self, id: &str) -> Result<TaskRecord> {
        match self.store.load(id) {
            Err(Error::NotFound(missing)) => {
                self.index.remove_task(id);
                Err(Error::NotFound(missing))
            }
            other => other,
        }
    }

    fn refresh_index(&mut self) -> Result<()> {
        let records = self.store.load_all()?;
        self.index = GraphIndex::from_records(&records);
        debug!(tasks = self.index.len(), "relationship index refreshed");
        Ok(())
    }

    fn insert_generated(&self, fields: Map<String, Value>) -> Result<TaskRecord> {
        for _ in 0..MAX_INSERT_ATTEMPTS {
            let mut record = TaskRecord::new(self.generate_task_id()?);
            record.fields = fields.clone();
            match self.store.insert(&record) {
                Ok(()) => return Ok(record),
                Err(Error::TaskExists(id)) => {
                    debug!(task = %id, "generated id taken; retrying");
                }
                Err(err) => return Err(err),
            }
        }
        Err(Error::OperationFailed(
            "could not allocate a unique task id".to_string(),
        ))
    }

    /// `<prefix>-<suffix>` with the suffix cut from a ULID's random part,
    /// growing past the configured length only when collisions pile up.
    fn generate_task_id(&self) -> Result<String> {
        let prefix = self.options.id_prefix.trim();
        let taken: HashSet<String> = self.store.list_ids()?.into_iter().collect();
        let mut len = self.options.id_min_len.clamp(1, ULID_RANDOM_LEN);
        loop {
            for _ in 0..ID_ATTEMPTS_PER_LEN {
                let base = Ulid::new().to_string().to_ascii_lowercase();
                let suffix = &base[ULID_TIME_LEN..ULID_TIME_LEN + len];
                let id = format!("{prefix}-{suffix}");
                if !taken.contains(&id) {
                    return Ok(id);
                }
            }
            if len == ULID_RANDOM_LEN {
                return Err(Error::OperationFailed(
                    "task id space exhausted".to_string(),
                ));
            }
            len += 1;
        }
    }

    fn ensure_known(&self, task: &str) -> Result<()> {
        if self.index.contains(task) {
            Ok(())
        } else {
            Err(Error::NotFound(task.to_string()))
        }
    }

    fn validator(&self) -> Validator<'_> {
        Validator::new(&self.index, self.options.completion)
    }
}

fn plan_add(
    snap: &Snapshot<'_>,
    relation: RelationType,
    a: &str,
    b: &str,
) -> Result<Plan<EdgePair>> {
    let owner = snap.record(a)?;
    let other = snap.record(b)?;
    if a == b {
        return Err(Error::SelfEdge {
            task: a.to_string(),
            relation,
        });
    }

    let delta = RelationDelta::add(relation, a, b);
    let pair = delta.edge_pair();
    if owner.has(&pair.forward) && other.has(&pair.inverse) {
        return Ok(Plan::noop(pair));
    }

    let class = relation.class();
    let upward = upward_edge(relation, a, b);
    if class == GatingClass::Hierarchical {
        let (child, parent) = upward;
        let existing = snap
            .index
            .neighbors(child, RelationType::Parent)
            .into_iter()
            .find(|current| current != parent);
        if let Some(existing) = existing {
            return Err(Error::MultipleParents {
                task: child.to_string(),
                existing,
                requested: parent.to_string(),
            });
        }
    }
    if class != GatingClass::Informational {
        check_cycle(&snap.validator(), class, upward, (a, b))?;
    }

    Ok(Plan::edges(pair, vec![delta]))
}

fn plan_transition(
    snap: &Snapshot<'_>,
    task: &str,
    from: TaskStatus,
    to: TaskStatus,
) -> Result<Plan<Transition>> {
    let record = snap.record(task)?;
    if record.status != from {
        return Err(Error::InvalidTransition {
            task: task.to_string(),
            from: record.status,
            to,
        });
    }

    let validator = snap.validator();
    match to {
        TaskStatus::Claimed => {
            let pending = validator.pending_dependencies(task);
            if !pending.is_empty() {
                return Err(Error::NotReady {
                    task: task.to_string(),
                    pending,
                });
            }
        }
        TaskStatus::Complete => {
            if let CompletionCheck::Blocked { blocker } = validator.can_complete(task) {
                return Err(Error::CannotComplete {
                    task: task.to_string(),
                    blocker,
                });
            }
        }
        _ => {}
    }

    Ok(Plan::status(
        Transition {
            task: task.to_string(),
            from,
            to,
            cascaded: Vec::new(),
        },
        StatusUpdate {
            task: task.to_string(),
            status: to,
            resume_status: None,
        },
    ))
}

/// `(from, to)` of the upward edge: child -> parent, dependent -> dependency.
fn upward_edge<'s>(relation: RelationType, a: &'s str, b: &'s str) -> (&'s str, &'s str) {
    match relation {
        RelationType::Child | RelationType::Blocks => (b, a),
        RelationType::Parent | RelationType::DependsOn | RelationType::Related => (a, b),
    }
}

fn check_cycle(
    validator: &Validator<'_>,
    class: GatingClass,
    (from, to): (&str, &str),
    (a, b): (&str, &str),
) -> Result<()> {
    match validator.cycle_path(class, from, to) {
        Some(path) => Err(Error::CycleDetected {
            from: a.to_string(),
            to: b.to_string(),
            class,
            path,
        }),
        None => Ok(()),
    }
}

fn neighbors_of(record: &TaskRecord, relations: &[RelationType]) -> BTreeSet<String> {
    record
        .relationships
        .iter()
        .filter(|rel| relations.contains(&rel.relation) && rel.task != record.id)
        .map(|rel| rel.task.clone())
        .collect()
}

/// Turn a plan into record writes, sorted by id. Unchanged records are skipped.
fn stage<T>(
    op: &'static str,
    records: &BTreeMap<String, TaskRecord>,
    plan: &Plan<T>,
) -> Result<Vec<Write>> {
    let removed: HashSet<&str> = plan.removals.iter().map(String::as_str).collect();
    let mut staged: BTreeMap<String, TaskRecord> = BTreeMap::new();

    for delta in &plan.deltas {
        for (holder, rel) in delta.physical_edges() {
            if removed.contains(holder.as_str()) {
                continue;
            }
            if delta.op == DeltaOp::Remove && !records.contains_key(&holder) {
                warn!(op, task = %holder, "skipped cascade to missing task");
                continue;
            }
            let record = staged_record(&mut staged, records, &holder)?;
            match delta.op {
                DeltaOp::Add => {
                    record.insert_relationship(rel);
                }
                DeltaOp::Remove => {
                    record.remove_relationship(&rel);
                }
            }
        }
    }

    for update in &plan.statuses {
        let record = staged_record(&mut staged, records, &update.task)?;
        record.status = update.status;
        record.resume_status = update.resume_status;
    }

    let now = Utc::now();
    let mut writes: Vec<Write> = staged
        .into_iter()
        .filter(|(id, record)| records.get(id) != Some(record))
        .map(|(_, mut record)| {
            record.updated_at = now;
            Write::Save(record)
        })
        .collect();

    for id in &plan.removals {
        let record = records
            .get(id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;
        writes.push(Write::Remove {
            id: id.clone(),
            version: record.version,
        });
    }

    writes.sort_by(|left, right| left.id().cmp(right.id()));
    Ok(writes)
}

fn staged_record<'s>(
    staged: &'s mut BTreeMap<String, TaskRecord>,
    records: &BTreeMap<String, TaskRecord>,
    id: &str,
) -> Result<&'s mut TaskRecord> {
    if !staged.contains_key(id) {
        let record = records.get(id).ok_or_else(|| {
            Error::OperationFailed(format!("task {id} would change without being locked"))
        })?;
        staged.insert(id.to_string(), record.clone());
    }
    staged
        .get_mut(id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn collect_cascade(
    changes: &mut Vec<StatusChange>,
    dependent: &str,
    result: Result<Option<StatusChange>>,
) {
    match result {
        Ok(Some(change)) => changes.push(change),
        Ok(None) => {}
        Err(err) => {
            warn!(task = %dependent, error = %err, "skipped dependent status update");
        }
    }
}
