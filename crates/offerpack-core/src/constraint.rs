//! Scheduling constraints and their canonical signatures.
//!
//! A [`Constraint`] is what the host manager filters offers by: a resource
//! minimum, an optional [`PlacementConstraint`] expression, and a host limit.
//! Tasks whose constraints are structurally equal share a
//! [`ConstraintSignature`] and are placed together.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resources::ResourceVector;

/// Whether a label constraint is evaluated against host or task labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    Host,
    Task,
}

/// Comparison applied to the number of matching labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelCondition {
    LessThan,
    Equal,
    GreaterThan,
}

/// Count of `key=value` labels compared against `requirement`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelConstraint {
    pub kind: LabelKind,
    pub condition: LabelCondition,
    pub key: String,
    pub value: String,
    pub requirement: u32,
}

/// A placement constraint expression.
///
/// Evaluation is the host manager's job; the engine only uses the
/// expression as part of the grouping key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlacementConstraint {
    Label(LabelConstraint),
    And { constraints: Vec<PlacementConstraint> },
    Or { constraints: Vec<PlacementConstraint> },
}

impl PlacementConstraint {
    /// Host label `key=value` must be present (count > 0).
    pub fn host_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        PlacementConstraint::Label(LabelConstraint {
            kind: LabelKind::Host,
            condition: LabelCondition::GreaterThan,
            key: key.into(),
            value: value.into(),
            requirement: 0,
        })
    }

    /// Fewer than `max` tasks labelled `key=value` may share the host.
    pub fn task_anti_affinity(key: impl Into<String>, value: impl Into<String>, max: u32) -> Self {
        PlacementConstraint::Label(LabelConstraint {
            kind: LabelKind::Task,
            condition: LabelCondition::LessThan,
            key: key.into(),
            value: value.into(),
            requirement: max,
        })
    }

    /// Equivalent expression with `And`/`Or` children in a fixed order.
    ///
    /// Both combinators are commutative, so two trees that differ only in
    /// child order canonicalize to the same value.
    pub fn canonical(&self) -> PlacementConstraint {
        match self {
            PlacementConstraint::Label(l) => PlacementConstraint::Label(l.clone()),
            PlacementConstraint::And { constraints } => PlacementConstraint::And {
                constraints: canonical_children(constraints),
            },
            PlacementConstraint::Or { constraints } => PlacementConstraint::Or {
                constraints: canonical_children(constraints),
            },
        }
    }
}

fn canonical_children(children: &[PlacementConstraint]) -> Vec<PlacementConstraint> {
    let mut out: Vec<PlacementConstraint> = children.iter().map(|c| c.canonical()).collect();
    out.sort_by_cached_key(|c| serde_json::to_string(c).unwrap_or_default());
    out
}

/// Constraint sent to the host manager when acquiring offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Minimum resources each returned offer must carry.
    pub resource_minimum: ResourceVector,
    /// Optional placement expression evaluated by the host manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<PlacementConstraint>,
    /// Maximum number of hosts to return; zero on group constraints.
    #[serde(default)]
    pub host_limit: u32,
}

impl Constraint {
    pub fn new(resource_minimum: ResourceVector, scheduling: Option<PlacementConstraint>) -> Self {
        Self {
            resource_minimum,
            scheduling,
            host_limit: 0,
        }
    }

    /// A new constraint equal to this one with `host_limit` set.
    pub fn with_host_limit(&self, host_limit: u32) -> Constraint {
        Constraint {
            host_limit,
            ..self.clone()
        }
    }

    /// Stable grouping key, independent of `host_limit`, object identity
    /// and the order of commutative sub-expressions.
    pub fn signature(&self) -> ConstraintSignature {
        #[derive(Serialize)]
        struct Canonical<'a> {
            resource_minimum: ResourceVector,
            scheduling: Option<&'a PlacementConstraint>,
        }

        let scheduling = self.scheduling.as_ref().map(|s| s.canonical());
        let canonical = Canonical {
            resource_minimum: self.resource_minimum.normalized(),
            scheduling: scheduling.as_ref(),
        };

        // Going through `Value` sorts object keys.
        let encoded = serde_json::to_value(&canonical)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let digest = Sha256::digest(encoded.as_bytes());
        ConstraintSignature(hex::encode(digest))
    }
}

/// Hex SHA-256 of a constraint's canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintSignature(String);

impl ConstraintSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex characters, for log fields.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ConstraintSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}
