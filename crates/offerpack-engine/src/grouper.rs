//! Constraint grouper — partitions dequeued tasks by scheduling constraint.
//!
//! Tasks whose merged (resource minimum, placement expression) constraints
//! are structurally equal land in the same [`TaskGroup`], so a single
//! offer acquisition can serve the whole group.

use std::collections::BTreeMap;

use offerpack_core::{Constraint, ConstraintSignature, ResourceVector, Task};

/// Tasks sharing one scheduling constraint, placed together for a round.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    signature: ConstraintSignature,
    constraint: Constraint,
    tasks: Vec<Task>,
}

impl TaskGroup {
    pub fn new(constraint: Constraint) -> Self {
        Self {
            signature: constraint.signature(),
            constraint,
            tasks: Vec::new(),
        }
    }

    pub fn signature(&self) -> &ConstraintSignature {
        &self.signature
    }

    pub fn constraint(&self) -> &Constraint {
        &self.constraint
    }

    /// Resources consumed by each task; uniform across the group.
    pub fn usage(&self) -> ResourceVector {
        self.constraint.resource_minimum
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn push(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Move the remaining tasks out, leaving the group empty.
    pub fn take_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }

    /// Replace the remaining tasks.
    pub fn set_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    /// Put `tasks` back ahead of the current remaining tasks, keeping their order.
    pub fn reinsert_front(&mut self, mut tasks: Vec<Task>) {
        tasks.append(&mut self.tasks);
        self.tasks = tasks;
    }
}

/// Group tasks by constraint signature.
///
/// Within a group, tasks keep their input order.
pub fn group_tasks(tasks: Vec<Task>) -> BTreeMap<ConstraintSignature, TaskGroup> {
    let mut groups: BTreeMap<ConstraintSignature, TaskGroup> = BTreeMap::new();
    for task in tasks {
        let constraint = task.scheduling_constraint();
        let signature = constraint.signature();
        groups
            .entry(signature)
            .or_insert_with(|| TaskGroup::new(constraint))
            .push(task);
    }
    groups
}
