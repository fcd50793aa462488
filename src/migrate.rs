//! Legacy relationship migration
//!
//! Older records spread relationships over five top-level fields
//! (`parent_id`, `child_ids`, `depends_on`, `blocks_tasks`, `related`).
//! This module translates them into the canonical `relationships` list.
//! Inconsistent legacy data is reported as [`MigrationConflict`]s for manual
//! resolution. Nothing is repaired silently, and nothing is written while any
//! conflict remains.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::graph::GraphIndex;
use crate::model::{GatingClass, RelationType, Relationship, TaskStatus};
use crate::store::{legacy_keys, FileTaskStore, TaskRecord, TaskStore};
use crate::validate::{self, Violation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Mirror one-sided entries whose other side says nothing at all
    pub infer_missing_inverse: bool,
    /// Translate and report without writing
    pub dry_run: bool,
}

/// A stored record in either legacy or canonical shape.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyTaskRecord {
    pub id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resume_status: Option<TaskStatus>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocks_tasks: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Any other top-level keys (old records kept title/tags here)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LegacyTaskRecord {
    pub fn from_document(document: Value) -> Result<Self> {
        Ok(serde_json::from_value(document)?)
    }

    /// `(field, relation, other)` for every relationship the record claims.
    fn claims(&self) -> Vec<(&'static str, RelationType, &str)> {
        let mut claims = Vec::new();
        if let Some(parent) = self.parent_id.as_deref().filter(|p| !p.is_empty()) {
            claims.push(("parent_id", RelationType::Parent, parent));
        }
        let lists: [(&'static str, RelationType, &Vec<String>); 4] = [
            ("child_ids", RelationType::Child, &self.child_ids),
            ("depends_on", RelationType::DependsOn, &self.depends_on),
            ("blocks_tasks", RelationType::Blocks, &self.blocks_tasks),
            ("related", RelationType::Related, &self.related),
        ];
        for (field, relation, targets) in lists {
            for other in targets {
                claims.push((field, relation, other.as_str()));
            }
        }
        for rel in &self.relationships {
            claims.push(("relationships", rel.relation, rel.task.as_str()));
        }
        claims
    }
}

/// A legacy inconsistency that needs a human decision.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MigrationConflict {
    DuplicateTask {
        task: String,
    },
    SelfReference {
        task: String,
        field: String,
    },
    DanglingReference {
        task: String,
        field: String,
        other: String,
    },
    /// `task` claims `relation -> other`; `other` does not hold the inverse
    NotReciprocated {
        task: String,
        field: String,
        relation: RelationType,
        other: String,
    },
    /// `listed_by` names `task` as a child, but `task` names another parent
    ParentDisagreement {
        task: String,
        parent_id: String,
        listed_by: String,
    },
    MultipleParents {
        task: String,
        parents: Vec<String>,
    },
    Cycle {
        class: GatingClass,
        tasks: Vec<String>,
    },
}

impl fmt::Display for MigrationConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationConflict::DuplicateTask { task } => write!(f, "{task} appears twice"),
            MigrationConflict::SelfReference { task, field } => {
                write!(f, "{task}.{field} references itself")
            }
            MigrationConflict::DanglingReference { task, field, other } => {
                write!(f, "{task}.{field} references missing task {other}")
            }
            MigrationConflict::NotReciprocated {
                task,
                field,
                relation,
                other,
            } => write!(
                f,
                "{task}.{field} lists {other}, but {other} has no {} entry for {task}",
                relation.inverse()
            ),
            MigrationConflict::ParentDisagreement {
                task,
                parent_id,
                listed_by,
            } => write!(
                f,
                "{listed_by} lists {task} as a child, but {task}.parent_id is {parent_id}"
            ),
            MigrationConflict::MultipleParents { task, parents } => {
                write!(f, "{task} would have parents {}", parents.join(", "))
            }
            MigrationConflict::Cycle { class, tasks } => {
                write!(f, "{class} cycle among {}", tasks.join(", "))
            }
        }
    }
}

/// Outcome of [`migrate_store`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    /// Records that carried legacy fields
    pub migrated: Vec<String>,
    /// Records already in canonical shape
    pub already_canonical: Vec<String>,
    /// Records whose stored content changes (or would change)
    pub rewritten: Vec<String>,
    /// Physical relationship entries across the translated store
    pub relationships: usize,
}

/// Translate legacy records into canonical ones, or report every conflict.
pub fn translate(
    records: Vec<LegacyTaskRecord>,
    options: MigrationOptions,
) -> Result<Vec<TaskRecord>> {
    let mut conflicts = Vec::new();
    let mut by_id: BTreeMap<String, LegacyTaskRecord> = BTreeMap::new();
    for record in records {
        if by_id.contains_key(&record.id) {
            conflicts.push(MigrationConflict::DuplicateTask {
                task: record.id.clone(),
            });
            continue;
        }
        by_id.insert(record.id.clone(), record);
    }

    // Every claim that names an existing, different task.
    let mut claims: BTreeMap<(String, Relationship), &'static str> = BTreeMap::new();
    for (id, record) in &by_id {
        for (field, relation, other) in record.claims() {
            if other == id {
                conflicts.push(MigrationConflict::SelfReference {
                    task: id.clone(),
                    field: field.to_string(),
                });
            } else if !by_id.contains_key(other) {
                conflicts.push(MigrationConflict::DanglingReference {
                    task: id.clone(),
                    field: field.to_string(),
                    other: other.to_string(),
                });
            } else {
                claims
                    .entry((id.clone(), Relationship::new(relation, other)))
                    .or_insert(field);
            }
        }
    }

    let mut edges: BTreeSet<(String, Relationship)> = BTreeSet::new();
    for ((holder, rel), field) in &claims {
        let mirrored = (
            rel.task.clone(),
            Relationship::new(rel.relation.inverse(), holder.clone()),
        );
        let accepted = claims.contains_key(&mirrored)
            || rel.relation == RelationType::Related
            || (options.infer_missing_inverse
                && is_silent(&claims, &rel.task, rel.relation.inverse()));

        if accepted {
            edges.insert((holder.clone(), rel.clone()));
            edges.insert(mirrored);
            continue;
        }

        let declared_parent = (rel.relation == RelationType::Child)
            .then(|| by_id.get(&rel.task).and_then(|r| r.parent_id.clone()))
            .flatten()
            .filter(|parent| parent != holder && !parent.is_empty());
        match declared_parent {
            Some(parent_id) => conflicts.push(MigrationConflict::ParentDisagreement {
                task: rel.task.clone(),
                parent_id,
                listed_by: holder.clone(),
            }),
            None => conflicts.push(MigrationConflict::NotReciprocated {
                task: holder.clone(),
                field: field.to_string(),
                relation: rel.relation,
                other: rel.task.clone(),
            }),
        }
    }

    let now = Utc::now();
    let mut translated = Vec::with_capacity(by_id.len());
    for (id, legacy) in by_id {
        let mut fields = legacy.fields;
        for (key, value) in legacy.extra {
            fields.entry(key).or_insert(value);
        }
        let relationships = edges
            .iter()
            .filter(|(holder, _)| *holder == id)
            .map(|(_, rel)| rel.clone())
            .collect();
        translated.push(TaskRecord {
            id,
            status: legacy.status,
            version: legacy.version,
            created_at: legacy.created_at.unwrap_or(now),
            updated_at: legacy.updated_at.unwrap_or(now),
            resume_status: legacy.resume_status,
            fields,
            relationships,
        });
    }

    for violation in validate::scan(&GraphIndex::from_records(&translated)) {
        match violation {
            Violation::MultipleParents { task, parents } => {
                conflicts.push(MigrationConflict::MultipleParents { task, parents })
            }
            Violation::Cycle { class, tasks } => {
                conflicts.push(MigrationConflict::Cycle { class, tasks })
            }
            other => {
                return Err(Error::OperationFailed(format!(
                    "translation produced an inconsistent graph: {other}"
                )))
            }
        }
    }

    if !conflicts.is_empty() {
        conflicts.sort();
        conflicts.dedup();
        return Err(Error::MigrationConflict(conflicts));
    }
    Ok(translated)
}

/// `task` makes no claim of type `relation` to anyone.
fn is_silent(
    claims: &BTreeMap<(String, Relationship), &'static str>,
    task: &str,
    relation: RelationType,
) -> bool {
    !claims
        .keys()
        .any(|(holder, rel)| holder == task && rel.relation == relation)
}

/// Migrate every record in a file store in one all-or-nothing pass.
///
/// Conflicts stop the run before any write. A failed write restores the
/// records already rewritten.
pub fn migrate_store(store: &FileTaskStore, options: MigrationOptions) -> Result<MigrationReport> {
    let _store_lock = store.lock_store()?;
    let _graph_lock = store.lock_graph()?;
    let ids = store.list_ids()?;
    let _task_locks = store.lock_tasks(&ids)?;

    let mut report = MigrationReport {
        dry_run: options.dry_run,
        ..MigrationReport::default()
    };
    let mut originals: BTreeMap<String, Value> = BTreeMap::new();
    let mut records = Vec::with_capacity(ids.len());
    for id in &ids {
        let document = store.read_document(id)?;
        if legacy_keys(&document).is_empty() {
            report.already_canonical.push(id.clone());
        } else {
            report.migrated.push(id.clone());
        }
        records.push(LegacyTaskRecord::from_document(document.clone())?);
        originals.insert(id.clone(), document);
    }

    let translated = translate(records, options)?;
    let now = Utc::now();
    let mut writes = Vec::new();
    for record in translated {
        report.relationships += record.relationships.len();
        let unchanged = originals
            .get(&record.id)
            .and_then(|document| serde_json::from_value::<TaskRecord>(document.clone()).ok())
            .is_some_and(|mut stored| {
                stored.normalize();
                report.already_canonical.contains(&record.id)
                    && stored.relationships == record.relationships
            });
        if unchanged {
            continue;
        }
        report.rewritten.push(record.id.clone());
        let mut next = record;
        next.version += 1;
        next.updated_at = now;
        writes.push(next);
    }

    if options.dry_run {
        tracing::info!(
            migrated = report.migrated.len(),
            rewritten = report.rewritten.len(),
            "migration dry run"
        );
        return Ok(report);
    }

    write_or_restore(store, &writes, &originals, |record| store.overwrite(record))?;
    tracing::info!(
        migrated = report.migrated.len(),
        rewritten = report.rewritten.len(),
        relationships = report.relationships,
        "migrated task store"
    );
    Ok(report)
}

/// Apply `writes` in order. On the first failure every record already
/// written is put back from `originals`, newest first, before the error
/// is returned.
fn write_or_restore<F>(
    store: &FileTaskStore,
    writes: &[TaskRecord],
    originals: &BTreeMap<String, Value>,
    mut write: F,
) -> Result<()>
where
    F: FnMut(&TaskRecord) -> Result<()>,
{
    for (done, record) in writes.iter().enumerate() {
        let Err(err) = write(record) else {
            continue;
        };
        tracing::warn!(task = %record.id, error = %err, "migration write failed, restoring");
        for written in writes[..done].iter().rev() {
            let Some(original) = originals.get(&written.id) else {
                continue;
            };
            if let Err(restore_err) = store.restore_document(&written.id, original) {
                tracing::warn!(
                    task = %written.id,
                    error = %restore_err,
                    "could not restore pre-migration record"
                );
            }
        }
        return Err(err);
    }
    Ok(())
}
