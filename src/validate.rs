//! Cycle and readiness validation.
//!
//! Pure predicates over a [`GraphIndex`]: cycle checks per gating class,
//! claim readiness, the completion guard, and the full consistency scan.
//! Nothing here mutates state. Unknown ids are treated as having no edges.
//!
//! # Edge direction
//!
//! Cycle checks walk "upward": child → parent for the hierarchy and
//! dependent → dependency for `depends_on`. A prospective edge `from → to`
//! closes a cycle iff `from` is already reachable from `to`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::Serialize;

use crate::graph::GraphIndex;
use crate::model::{GatingClass, RelationType, Relationship, TaskStatus};

/// Whether a parent may complete before its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    #[default]
    RequireChildren,
    AllowPartial,
}

/// Why a task cannot be completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CompletionBlocker {
    IncompleteChildren { children: Vec<String> },
    Cycle { class: GatingClass, tasks: Vec<String> },
}

impl fmt::Display for CompletionBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionBlocker::IncompleteChildren { children } => {
                write!(f, "children not complete: {}", children.join(", "))
            }
            CompletionBlocker::Cycle { class, tasks } => {
                write!(f, "{class} cycle through {}", tasks.join(" -> "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionCheck {
    Allowed,
    Blocked { blocker: CompletionBlocker },
}

impl CompletionCheck {
    pub fn allowed(&self) -> bool {
        matches!(self, CompletionCheck::Allowed)
    }

    pub fn reason(&self) -> Option<&CompletionBlocker> {
        match self {
            CompletionCheck::Allowed => None,
            CompletionCheck::Blocked { blocker } => Some(blocker),
        }
    }
}

/// One finding of the consistency scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    SelfEdge {
        task: String,
        relation: RelationType,
    },
    Dangling {
        task: String,
        other: String,
        relation: RelationType,
    },
    /// `task` holds `relation -> other` but `other` lacks the inverse edge.
    Asymmetric {
        task: String,
        other: String,
        relation: RelationType,
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

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::SelfEdge { task, relation } => {
                write!(f, "{task} holds {relation} -> itself")
            }
            Violation::Dangling {
                task,
                other,
                relation,
            } => write!(f, "{task} holds {relation} -> {other}, which does not exist"),
            Violation::Asymmetric {
                task,
                other,
                relation,
            } => write!(
                f,
                "{task} holds {relation} -> {other} but {other} lacks {} -> {task}",
                relation.inverse()
            ),
            Violation::MultipleParents { task, parents } => {
                write!(f, "{task} has multiple parents: {}", parents.join(", "))
            }
            Violation::Cycle { class, tasks } => {
                write!(f, "{class} cycle among {}", tasks.join(", "))
            }
        }
    }
}

/// Graph predicates bound to one index snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    index: &'a GraphIndex,
    policy: CompletionPolicy,
}

impl<'a> Validator<'a> {
    pub fn new(index: &'a GraphIndex, policy: CompletionPolicy) -> Self {
        Self { index, policy }
    }

    /// Would adding the upward edge `from -> to` close a cycle in `class`?
    ///
    /// Hierarchical: `from` is the prospective child, `to` the prospective
    /// parent; walks the parent chain from `to`. Dependency: `from` depends on
    /// `to`; depth-first over `depends_on` from `to`.
    pub fn would_create_cycle(&self, class: GatingClass, from: &str, to: &str) -> bool {
        self.cycle_path(class, from, to).is_some()
    }

    /// Concrete cycle `from -> to -> ... -> from`, if the edge would close one.
    pub fn cycle_path(&self, class: GatingClass, from: &str, to: &str) -> Option<Vec<String>> {
        let relation = upward_relation(class)?;
        if from == to {
            return Some(vec![from.to_string(), to.to_string()]);
        }
        let mut path = self.find_path(relation, to, from)?;
        path.insert(0, from.to_string());
        Some(path)
    }

    /// Every immediate dependency is complete.
    pub fn is_ready_to_claim(&self, task: &str) -> bool {
        self.pending_dependencies(task).is_empty()
    }

    /// Immediate dependencies that are not complete, sorted.
    pub fn pending_dependencies(&self, task: &str) -> Vec<String> {
        self.index
            .neighbors(task, RelationType::DependsOn)
            .into_iter()
            .filter(|dep| !self.is_complete(dep))
            .collect()
    }

    pub fn can_complete(&self, task: &str) -> CompletionCheck {
        for class in [GatingClass::Hierarchical, GatingClass::Dependency] {
            if let Some(tasks) = self.cycle_through(class, task) {
                return CompletionCheck::Blocked {
                    blocker: CompletionBlocker::Cycle { class, tasks },
                };
            }
        }

        if self.policy == CompletionPolicy::RequireChildren {
            let children: Vec<String> = self
                .index
                .neighbors(task, RelationType::Child)
                .into_iter()
                .filter(|child| !self.is_complete(child))
                .collect();
            if !children.is_empty() {
                return CompletionCheck::Blocked {
                    blocker: CompletionBlocker::IncompleteChildren { children },
                };
            }
        }

        CompletionCheck::Allowed
    }

    fn is_complete(&self, task: &str) -> bool {
        self.index
            .status(task)
            .is_some_and(TaskStatus::is_complete)
    }

    /// Existing cycle that passes through `task`, as `task -> ... -> task`.
    fn cycle_through(&self, class: GatingClass, task: &str) -> Option<Vec<String>> {
        let relation = upward_relation(class)?;
        for next in self.index.neighbors(task, relation) {
            if let Some(mut path) = self.find_path(relation, &next, task) {
                path.insert(0, task.to_string());
                return Some(path);
            }
        }
        None
    }

    /// Depth-first search along `relation` from `start` to `goal`.
    ///
    /// The visited set bounds the walk to O(V+E) and makes it terminate on
    /// corrupted (already cyclic) data. Neighbors are visited in sorted
    /// order, so the reported path is deterministic.
    fn find_path(&self, relation: RelationType, start: &str, goal: &str) -> Option<Vec<String>> {
        let mut stack: Vec<String> = vec![start.to_string()];
        let mut visited: HashSet<String> = HashSet::from([start.to_string()]);
        let mut came_from: HashMap<String, String> = HashMap::new();

        while let Some(current) = stack.pop() {
            if current == goal {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(prev) = came_from.get(&cursor) {
                    path.push(prev.clone());
                    cursor = prev.clone();
                }
                path.reverse();
                return Some(path);
            }

            let Some(next) = self.index.neighbor_set(&current, relation) else {
                continue;
            };
            for neighbor in next.iter().rev() {
                if visited.insert(neighbor.clone()) {
                    came_from.insert(neighbor.clone(), current.clone());
                    stack.push(neighbor.clone());
                }
            }
        }

        None
    }
}

fn upward_relation(class: GatingClass) -> Option<RelationType> {
    match class {
        GatingClass::Hierarchical => Some(RelationType::Parent),
        GatingClass::Dependency => Some(RelationType::DependsOn),
        GatingClass::Informational => None,
    }
}

/// Full consistency scan: symmetry, referential integrity, self edges,
/// single parent and acyclicity. Every problem is reported, sorted.
pub fn scan(index: &GraphIndex) -> Vec<Violation> {
    let mut violations = Vec::new();

    for (holder, rel) in index.edges() {
        if rel.task == holder {
            violations.push(Violation::SelfEdge {
                task: holder,
                relation: rel.relation,
            });
            continue;
        }
        if !index.contains(&rel.task) {
            violations.push(Violation::Dangling {
                task: holder,
                other: rel.task,
                relation: rel.relation,
            });
            continue;
        }
        let mirrored = Relationship::new(rel.relation.inverse(), holder.clone());
        if !index.has_edge(&rel.task, &mirrored) {
            violations.push(Violation::Asymmetric {
                task: holder,
                other: rel.task,
                relation: rel.relation,
            });
        }
    }

    for id in index.task_ids() {
        let parents = index.neighbors(&id, RelationType::Parent);
        if parents.len() > 1 {
            violations.push(Violation::MultipleParents {
                task: id,
                parents: parents.into_iter().collect(),
            });
        }
    }

    for (class, upward, downward) in [
        (
            GatingClass::Hierarchical,
            RelationType::Parent,
            RelationType::Child,
        ),
        (
            GatingClass::Dependency,
            RelationType::DependsOn,
            RelationType::Blocks,
        ),
    ] {
        for tasks in cycles(index, upward, downward) {
            violations.push(Violation::Cycle { class, tasks });
        }
    }

    violations.sort();
    violations
}

/// Cycles (strongly connected components with more than one task) in the
/// upward graph. Edges come from either side of the pair, so a cycle written
/// only through inverse entries is still found. Self edges are reported
/// separately and ignored here.
fn cycles(index: &GraphIndex, upward: RelationType, downward: RelationType) -> Vec<Vec<String>> {
    let nodes = index.task_ids();
    let mut successors: HashMap<&str, BTreeSet<String>> = HashMap::new();
    let mut predecessors: HashMap<&str, BTreeSet<String>> = HashMap::new();

    for id in &nodes {
        for target in index.neighbors(id, upward) {
            if target != *id && index.contains(&target) {
                successors.entry(id.as_str()).or_default().insert(target.clone());
                predecessors.entry(nodes_key(&nodes, &target)).or_default().insert(id.clone());
            }
        }
        for source in index.neighbors(id, downward) {
            if source != *id && index.contains(&source) {
                successors
                    .entry(nodes_key(&nodes, &source))
                    .or_default()
                    .insert(id.clone());
                predecessors.entry(id.as_str()).or_default().insert(source.clone());
            }
        }
    }

    // Kosaraju: postorder on the graph, then sweep the transpose.
    let empty = BTreeSet::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut order: Vec<&str> = Vec::with_capacity(nodes.len());
    for root in &nodes {
        if !visited.insert(root.as_str()) {
            continue;
        }
        let mut stack: Vec<(&str, Vec<&str>)> =
            vec![(root.as_str(), children_of(&successors, root, &empty, &nodes))];
        while let Some((node, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) => {
                    if visited.insert(next) {
                        let next_children = children_of(&successors, next, &empty, &nodes);
                        stack.push((next, next_children));
                    }
                }
                None => {
                    order.push(*node);
                    stack.pop();
                }
            }
        }
    }

    let mut assigned: HashSet<&str> = HashSet::new();
    let mut components = Vec::new();
    for root in order.into_iter().rev() {
        if !assigned.insert(root) {
            continue;
        }
        let mut component = vec![root.to_string()];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for prev in children_of(&predecessors, node, &empty, &nodes) {
                if assigned.insert(prev) {
                    component.push(prev.to_string());
                    stack.push(prev);
                }
            }
        }
        if component.len() > 1 {
            component.sort();
            components.push(component);
        }
    }

    components.sort();
    components
}

/// Borrow an id from the node list so map keys share its lifetime.
fn nodes_key<'n>(nodes: &'n [String], id: &str) -> &'n str {
    match nodes.binary_search_by(|node| node.as_str().cmp(id)) {
        Ok(pos) => nodes[pos].as_str(),
        Err(_) => "",
    }
}

fn children_of<'n>(
    map: &HashMap<&str, BTreeSet<String>>,
    node: &str,
    empty: &BTreeSet<String>,
    nodes: &'n [String],
) -> Vec<&'n str> {
    map.get(node)
        .unwrap_or(empty)
        .iter()
        .map(|id| nodes_key(nodes, id))
        .filter(|id| !id.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskRecord;

    fn record(id: &str, status: TaskStatus, rels: &[(RelationType, &str)]) -> TaskRecord {
        let mut record = TaskRecord::new(id);
        record.status = status;
        for (relation, task) in rels {
            record.insert_relationship(Relationship::new(*relation, *task));
        }
        record
    }

    fn chain_index() -> GraphIndex {
        // a depends on b, b depends on c
        GraphIndex::from_records(&[
            record("a", TaskStatus::Pending, &[(RelationType::DependsOn, "b")]),
            record(
                "b",
                TaskStatus::Pending,
                &[(RelationType::Blocks, "a"), (RelationType::DependsOn, "c")],
            ),
            record("c", TaskStatus::Complete, &[(RelationType::Blocks, "b")]),
        ])
    }

    #[test]
    fn dependency_cycle_detected_transitively() {
        let index = chain_index();
        let validator = Validator::new(&index, CompletionPolicy::default());
        assert!(validator.would_create_cycle(GatingClass::Dependency, "c", "a"));
        assert_eq!(
            validator.cycle_path(GatingClass::Dependency, "c", "a"),
            Some(vec![
                "c".to_string(),
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ])
        );
        assert!(!validator.would_create_cycle(GatingClass::Dependency, "a", "c"));
        assert!(validator.would_create_cycle(GatingClass::Dependency, "a", "a"));
        assert!(!validator.would_create_cycle(GatingClass::Informational, "c", "a"));
    }

    #[test]
    fn hierarchical_cycle_walks_parent_chain() {
        // x is child of y, y is child of z
        let index = GraphIndex::from_records(&[
            record("x", TaskStatus::Pending, &[(RelationType::Parent, "y")]),
            record(
                "y",
                TaskStatus::Pending,
                &[(RelationType::Child, "x"), (RelationType::Parent, "z")],
            ),
            record("z", TaskStatus::Pending, &[(RelationType::Child, "y")]),
        ]);
        let validator = Validator::new(&index, CompletionPolicy::default());
        // Making x the parent of z: z would become its own ancestor.
        assert!(validator.would_create_cycle(GatingClass::Hierarchical, "z", "x"));
        // Another child under x is fine.
        assert!(!validator.would_create_cycle(GatingClass::Hierarchical, "w", "x"));
    }

    #[test]
    fn cycle_walk_terminates_on_corrupt_data() {
        let index = GraphIndex::from_records(&[
            record("a", TaskStatus::Pending, &[(RelationType::Parent, "b")]),
            record("b", TaskStatus::Pending, &[(RelationType::Parent, "a")]),
        ]);
        let validator = Validator::new(&index, CompletionPolicy::default());
        assert!(!validator.would_create_cycle(GatingClass::Hierarchical, "c", "a"));
    }

    #[test]
    fn readiness_tracks_immediate_dependencies_only() {
        let index = chain_index();
        let validator = Validator::new(&index, CompletionPolicy::default());
        assert!(!validator.is_ready_to_claim("a"));
        assert_eq!(validator.pending_dependencies("a"), vec!["b".to_string()]);
        assert!(validator.is_ready_to_claim("b"));
        assert!(validator.is_ready_to_claim("c"));
        assert!(validator.is_ready_to_claim("unknown"));
    }

    #[test]
    fn completion_requires_children_by_default() {
        let index = GraphIndex::from_records(&[
            record(
                "p",
                TaskStatus::InProgress,
                &[(RelationType::Child, "c1"), (RelationType::Child, "c2")],
            ),
            record("c1", TaskStatus::Complete, &[(RelationType::Parent, "p")]),
            record("c2", TaskStatus::InProgress, &[(RelationType::Parent, "p")]),
        ]);

        let strict = Validator::new(&index, CompletionPolicy::RequireChildren);
        let check = strict.can_complete("p");
        assert!(!check.allowed());
        assert_eq!(
            check.reason(),
            Some(&CompletionBlocker::IncompleteChildren {
                children: vec!["c2".to_string()]
            })
        );

        let partial = Validator::new(&index, CompletionPolicy::AllowPartial);
        assert!(partial.can_complete("p").allowed());
        assert!(strict.can_complete("c1").allowed());
    }

    #[test]
    fn completion_refuses_task_on_cycle() {
        let index = GraphIndex::from_records(&[
            record("a", TaskStatus::InProgress, &[(RelationType::DependsOn, "b")]),
            record("b", TaskStatus::Pending, &[(RelationType::DependsOn, "a")]),
        ]);
        let validator = Validator::new(&index, CompletionPolicy::AllowPartial);
        match validator.can_complete("a") {
            CompletionCheck::Blocked {
                blocker: CompletionBlocker::Cycle { class, tasks },
            } => {
                assert_eq!(class, GatingClass::Dependency);
                assert_eq!(tasks, vec!["a".to_string(), "b".to_string(), "a".to_string()]);
            }
            other => panic!("unexpected check: {other:?}"),
        }
    }

    #[test]
    fn scan_reports_single_one_sided_dependency() {
        let index = GraphIndex::from_records(&[
            record("a", TaskStatus::Pending, &[(RelationType::DependsOn, "b")]),
            record("b", TaskStatus::Pending, &[]),
        ]);
        assert_eq!(
            scan(&index),
            vec![Violation::Asymmetric {
                task: "a".to_string(),
                other: "b".to_string(),
                relation: RelationType::DependsOn,
            }]
        );
    }

    #[test]
    fn scan_reports_every_problem() {
        let index = GraphIndex::from_records(&[
            record(
                "a",
                TaskStatus::Pending,
                &[
                    (RelationType::Related, "a"),
                    (RelationType::Blocks, "ghost"),
                    (RelationType::Parent, "p1"),
                    (RelationType::Parent, "p2"),
                ],
            ),
            record("p1", TaskStatus::Pending, &[(RelationType::Child, "a")]),
            record("p2", TaskStatus::Pending, &[(RelationType::Child, "a")]),
            record(
                "x",
                TaskStatus::Pending,
                &[(RelationType::DependsOn, "y"), (RelationType::Blocks, "y")],
            ),
            record(
                "y",
                TaskStatus::Pending,
                &[(RelationType::DependsOn, "x"), (RelationType::Blocks, "x")],
            ),
        ]);

        let violations = scan(&index);
        assert!(violations.contains(&Violation::SelfEdge {
            task: "a".to_string(),
            relation: RelationType::Related,
        }));
        assert!(violations.contains(&Violation::Dangling {
            task: "a".to_string(),
            other: "ghost".to_string(),
            relation: RelationType::Blocks,
        }));
        assert!(violations.contains(&Violation::MultipleParents {
            task: "a".to_string(),
            parents: vec!["p1".to_string(), "p2".to_string()],
        }));
        assert!(violations.contains(&Violation::Cycle {
            class: GatingClass::Dependency,
            tasks: vec!["x".to_string(), "y".to_string()],
        }));
        assert_eq!(violations.len(), 4);
    }

    #[test]
    fn scan_of_consistent_graph_is_empty() {
        let index = chain_index();
        assert!(scan(&index).is_empty());
    }
}
