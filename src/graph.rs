//! Relationship graph index.
//!
//! Adjacency keyed by task id, one neighbor set per relationship type, plus the
//! status of every known task. Built from a store snapshot at process start and
//! kept current by the service afterwards. Tasks never point at each other
//! directly; cycles are plain data here.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::model::{DeltaOp, RelationDelta, RelationType, Relationship, TaskStatus};
use crate::store::TaskRecord;
use crate::validate;

#[derive(Debug, Clone, Default)]
pub struct GraphIndex {
    statuses: HashMap<String, TaskStatus>,
    adjacency: HashMap<String, HashMap<RelationType, BTreeSet<String>>>,
}

impl GraphIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a snapshot, refusing inconsistent stored data.
    pub fn build(records: &[TaskRecord]) -> Result<Self> {
        let index = Self::from_records(records);
        let violations = validate::scan(&index);
        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "stored relationship graph is corrupt");
            return Err(Error::CorruptGraph(violations));
        }
        Ok(index)
    }

    /// Build from a snapshot as-is, including asymmetric or dangling edges.
    pub fn from_records(records: &[TaskRecord]) -> Self {
        let mut index = Self::new();
        for record in records {
            index.statuses.insert(record.id.clone(), record.status);
            let edges = index.adjacency.entry(record.id.clone()).or_default();
            for rel in &record.relationships {
                edges.entry(rel.relation).or_default().insert(rel.task.clone());
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.statuses.contains_key(id)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.statuses.get(id).copied()
    }

    pub fn set_status(&mut self, id: &str, status: TaskStatus) {
        if let Some(entry) = self.statuses.get_mut(id) {
            *entry = status;
        }
    }

    /// Sorted ids of every known task.
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.statuses.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Other side of every `relation` edge held by `id`.
    pub fn neighbors(&self, id: &str, relation: RelationType) -> BTreeSet<String> {
        self.neighbor_set(id, relation).cloned().unwrap_or_default()
    }

    pub(crate) fn neighbor_set(&self, id: &str, relation: RelationType) -> Option<&BTreeSet<String>> {
        self.adjacency.get(id).and_then(|edges| edges.get(&relation))
    }

    pub fn has_edge(&self, id: &str, relationship: &Relationship) -> bool {
        self.neighbor_set(id, relationship.relation)
            .is_some_and(|targets| targets.contains(&relationship.task))
    }

    /// Every relationship held by `id`, sorted by type then target.
    pub fn relationships(&self, id: &str) -> Vec<Relationship> {
        let mut out = Vec::new();
        if let Some(edges) = self.adjacency.get(id) {
            for (relation, targets) in edges {
                out.extend(targets.iter().map(|task| Relationship::new(*relation, task.clone())));
            }
        }
        out.sort();
        out
    }

    /// All `(holder, relationship)` pairs, sorted.
    pub fn edges(&self) -> Vec<(String, Relationship)> {
        let mut out = Vec::new();
        for (holder, edges) in &self.adjacency {
            for (relation, targets) in edges {
                for task in targets {
                    out.push((holder.clone(), Relationship::new(*relation, task.clone())));
                }
            }
        }
        out.sort();
        out
    }

    /// Apply both physical edges of one conceptual change.
    pub fn apply(&mut self, delta: &RelationDelta) {
        for (holder, rel) in delta.physical_edges() {
            match delta.op {
                DeltaOp::Add => {
                    self.adjacency
                        .entry(holder)
                        .or_default()
                        .entry(rel.relation)
                        .or_default()
                        .insert(rel.task);
                }
                DeltaOp::Remove => self.remove_edge(&holder, &rel),
            }
        }
    }

    /// Replace a task's node with what is stored for it.
    ///
    /// Mirrored edges that pointed at this task but are no longer backed by its
    /// record are dropped, and the record's edges are mirrored onto neighbors
    /// the index already knows.
    pub fn upsert_task(&mut self, record: &TaskRecord) {
        let previous = self.relationships(&record.id);
        for rel in &previous {
            if !record.has(rel) {
                let mirrored = Relationship::new(rel.relation.inverse(), record.id.clone());
                self.remove_edge(&rel.task, &mirrored);
            }
        }

        self.statuses.insert(record.id.clone(), record.status);
        let mut edges: HashMap<RelationType, BTreeSet<String>> = HashMap::new();
        for rel in &record.relationships {
            edges.entry(rel.relation).or_default().insert(rel.task.clone());
        }
        self.adjacency.insert(record.id.clone(), edges);

        for rel in &record.relationships {
            if self.contains(&rel.task) {
                self.adjacency
                    .entry(rel.task.clone())
                    .or_default()
                    .entry(rel.relation.inverse())
                    .or_default()
                    .insert(record.id.clone());
            }
        }
    }

    /// Drop a task and every edge pointing at it.
    pub fn remove_task(&mut self, id: &str) {
        self.statuses.remove(id);
        if let Some(edges) = self.adjacency.remove(id) {
            for (relation, targets) in edges {
                let mirrored = Relationship::new(relation.inverse(), id.to_string());
                for target in targets {
                    self.remove_edge(&target, &mirrored);
                }
            }
        }
    }

    fn remove_edge(&mut self, holder: &str, rel: &Relationship) {
        if let Some(edges) = self.adjacency.get_mut(holder) {
            if let Some(targets) = edges.get_mut(&rel.relation) {
                targets.remove(&rel.task);
                if targets.is_empty() {
                    edges.remove(&rel.relation);
                }
            }
        }
    }
}
