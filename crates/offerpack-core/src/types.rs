//! Tasks, host offers and placements.
//!
//! These are the values exchanged with the resource manager (tasks in,
//! placements out) and the host manager (offers in, released offers out).
//! All types serialize to/from JSON for the RPC transport.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constraint::{Constraint, PlacementConstraint};
use crate::resources::ResourceVector;

/// Identifier of a task, unique across the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        TaskId(s)
    }
}

/// Identifier of a host offer lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OfferId(pub String);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OfferId {
    fn from(s: &str) -> Self {
        OfferId(s.to_string())
    }
}

/// A pending unit of work handed out by the resource manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub priority: u32,
    /// Resources required by one instance of this task.
    pub resource: ResourceVector,
    /// Optional placement expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<PlacementConstraint>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, resource: ResourceVector) -> Self {
        Self {
            id: id.into(),
            job_id: String::new(),
            name: String::new(),
            priority: 0,
            resource,
            constraint: None,
        }
    }

    pub fn with_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_constraint(mut self, constraint: PlacementConstraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// The host-manager constraint this task needs satisfied.
    ///
    /// Merges the resource requirement and placement expression; the host
    /// limit is left at zero and set per acquisition.
    pub fn scheduling_constraint(&self) -> Constraint {
        Constraint::new(self.resource, self.constraint.clone())
    }
}

/// A time-bounded lease on one host's spare capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostOffer {
    pub id: OfferId,
    pub hostname: String,
    pub agent_id: String,
    pub resources: ResourceVector,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl HostOffer {
    pub fn new(id: impl Into<OfferId>, hostname: impl Into<String>, resources: ResourceVector) -> Self {
        let hostname = hostname.into();
        Self {
            id: id.into(),
            agent_id: format!("agent-{hostname}"),
            hostname,
            resources,
            attributes: BTreeMap::new(),
        }
    }
}

/// An assignment of an ordered set of tasks to one host offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub hostname: String,
    pub agent_id: String,
    pub offer_id: OfferId,
    pub tasks: Vec<TaskId>,
}

impl Placement {
    pub fn for_offer(offer: &HostOffer, tasks: Vec<TaskId>) -> Self {
        Self {
            hostname: offer.hostname.clone(),
            agent_id: offer.agent_id.clone(),
            offer_id: offer.id.clone(),
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_constraint_merges_resource_and_expression() {
        let task = Task::new("job-1-0", ResourceVector::cpu_mem(1.0, 100.0))
            .with_constraint(PlacementConstraint::host_label("zone", "a"));
        let c = task.scheduling_constraint();
        assert_eq!(c.resource_minimum, task.resource);
        assert_eq!(c.scheduling, task.constraint);
        assert_eq!(c.host_limit, 0);
    }

    #[test]
    fn placement_references_offer_host() {
        let offer = HostOffer::new("offer-1", "host-a", ResourceVector::cpu_mem(4.0, 4096.0));
        let p = Placement::for_offer(&offer, vec!["t1".into(), "t2".into()]);
        assert_eq!(p.hostname, "host-a");
        assert_eq!(p.agent_id, "agent-host-a");
        assert_eq!(p.offer_id, OfferId::from("offer-1"));
        assert_eq!(p.tasks.len(), 2);
    }

    #[test]
    fn task_deserializes_with_minimal_fields() {
        let t: Task = serde_json::from_str(r#"{"id":"t1","resource":{"cpu":1.0,"mem_mb":64.0}}"#).unwrap();
        assert_eq!(t.id, TaskId::from("t1"));
        assert!(t.constraint.is_none());
        assert_eq!(t.resource.mem_mb, 64.0);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&TaskId::from("t1")).unwrap();
        assert_eq!(json, "\"t1\"");
    }
}
