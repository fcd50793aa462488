//! Relationship model: edge types, inverse/symmetry rules and task statuses.
//!
//! Every other module derives the "other side" of an edge from here, so the
//! symmetric edge pair is never hand-assembled by callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Typed edge held by a task (the "owner" side).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Parent,
    Child,
    DependsOn,
    Blocks,
    Related,
}

/// How a relationship type participates in graph rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatingClass {
    /// parent/child forest
    Hierarchical,
    /// depends_on/blocks DAG, gates readiness
    Dependency,
    /// related, never gates
    Informational,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        RelationType::Parent,
        RelationType::Child,
        RelationType::DependsOn,
        RelationType::Blocks,
        RelationType::Related,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::Parent => "parent",
            RelationType::Child => "child",
            RelationType::DependsOn => "depends_on",
            RelationType::Blocks => "blocks",
            RelationType::Related => "related",
        }
    }

    pub fn class(self) -> GatingClass {
        match self {
            RelationType::Parent | RelationType::Child => GatingClass::Hierarchical,
            RelationType::DependsOn | RelationType::Blocks => GatingClass::Dependency,
            RelationType::Related => GatingClass::Informational,
        }
    }

    pub fn inverse(self) -> RelationType {
        inverse_of(self)
    }
}

/// Inverse type stored on the other task. `related` is its own inverse.
pub fn inverse_of(relation: RelationType) -> RelationType {
    match relation {
        RelationType::Parent => RelationType::Child,
        RelationType::Child => RelationType::Parent,
        RelationType::DependsOn => RelationType::Blocks,
        RelationType::Blocks => RelationType::DependsOn,
        RelationType::Related => RelationType::Related,
    }
}

pub fn is_symmetric(relation: RelationType) -> bool {
    inverse_of(relation) == relation
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        RelationType::ALL
            .into_iter()
            .find(|relation| relation.as_str() == normalized)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "unknown relationship type '{value}' (expected parent|child|depends_on|blocks|related)"
                ))
            })
    }
}

impl fmt::Display for GatingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GatingClass::Hierarchical => "hierarchical",
            GatingClass::Dependency => "dependency",
            GatingClass::Informational => "informational",
        };
        f.write_str(label)
    }
}

/// One canonical relationship entry, as persisted in a task record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub relation: RelationType,
    pub task: String,
}

impl Relationship {
    pub fn new(relation: RelationType, task: impl Into<String>) -> Self {
        Self {
            relation,
            task: task.into(),
        }
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    InProgress,
    Blocked,
    Complete,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Claimed,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Claimed => "claimed",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Complete => "complete",
        }
    }

    pub fn is_complete(self) -> bool {
        self == TaskStatus::Complete
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown task status '{value}'")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOp {
    Add,
    Remove,
}

/// One conceptual relationship change: `owner` holds `relation -> other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDelta {
    pub op: DeltaOp,
    pub relation: RelationType,
    pub owner: String,
    pub other: String,
}

impl RelationDelta {
    pub fn add(relation: RelationType, owner: impl Into<String>, other: impl Into<String>) -> Self {
        Self {
            op: DeltaOp::Add,
            relation,
            owner: owner.into(),
            other: other.into(),
        }
    }

    pub fn remove(
        relation: RelationType,
        owner: impl Into<String>,
        other: impl Into<String>,
    ) -> Self {
        Self {
            op: DeltaOp::Remove,
            relation,
            owner: owner.into(),
            other: other.into(),
        }
    }

    /// The two physical edges as `(holder, relationship)`.
    pub fn physical_edges(&self) -> [(String, Relationship); 2] {
        [
            (
                self.owner.clone(),
                Relationship::new(self.relation, self.other.clone()),
            ),
            (
                self.other.clone(),
                Relationship::new(inverse_of(self.relation), self.owner.clone()),
            ),
        ]
    }

    pub fn edge_pair(&self) -> EdgePair {
        let [owner_side, other_side] = self.physical_edges();
        EdgePair {
            owner: owner_side.0,
            forward: owner_side.1,
            other: other_side.0,
            inverse: other_side.1,
        }
    }
}

/// Both physical edges of a committed relationship.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EdgePair {
    pub owner: String,
    pub forward: Relationship,
    pub other: String,
    pub inverse: Relationship,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_pairs_round_trip() {
        for relation in RelationType::ALL {
            assert_eq!(inverse_of(inverse_of(relation)), relation);
            assert_eq!(relation.class(), inverse_of(relation).class());
        }
        assert_eq!(inverse_of(RelationType::Parent), RelationType::Child);
        assert_eq!(inverse_of(RelationType::DependsOn), RelationType::Blocks);
    }

    #[test]
    fn only_related_is_symmetric() {
        let symmetric: Vec<_> = RelationType::ALL
            .into_iter()
            .filter(|relation| is_symmetric(*relation))
            .collect();
        assert_eq!(symmetric, vec![RelationType::Related]);
    }

    #[test]
    fn relation_type_parses_cli_spellings() {
        assert_eq!(
            "depends-on".parse::<RelationType>().expect("parse"),
            RelationType::DependsOn
        );
        assert_eq!(
            " Child ".parse::<RelationType>().expect("parse"),
            RelationType::Child
        );
        assert!(matches!(
            "sibling".parse::<RelationType>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn relationship_serializes_with_type_tag() {
        let rel = Relationship::new(RelationType::DependsOn, "tl-b");
        let json = serde_json::to_string(&rel).expect("json");
        assert_eq!(json, r#"{"type":"depends_on","task":"tl-b"}"#);
    }

    #[test]
    fn delta_yields_inverse_edge_on_other_side() {
        let delta = RelationDelta::add(RelationType::Child, "p", "c");
        let [owner, other] = delta.physical_edges();
        assert_eq!(owner, ("p".to_string(), Relationship::new(RelationType::Child, "c")));
        assert_eq!(other, ("c".to_string(), Relationship::new(RelationType::Parent, "p")));

        let related = RelationDelta::add(RelationType::Related, "a", "b");
        let pair = related.edge_pair();
        assert_eq!(pair.forward.relation, RelationType::Related);
        assert_eq!(pair.inverse.relation, RelationType::Related);
        assert_eq!(pair.inverse.task, "a");
    }

    #[test]
    fn status_parses_and_displays() {
        for status in TaskStatus::ALL {
            assert_eq!(status.to_string().parse::<TaskStatus>().expect("parse"), status);
        }
        assert_eq!("in-progress".parse::<TaskStatus>().expect("parse"), TaskStatus::InProgress);
    }
}
