//! Greedy prefix packing of a task group onto one host offer.
//!
//! All tasks in a group share one resource requirement, so accepting the
//! longest prefix that fits is maximal for that offer. Tasks are never
//! reordered.

use tracing::debug;

use offerpack_core::{HostOffer, Placement, ResourceVector, Task};

/// Tasks accepted onto one offer, plus the placement naming them.
#[derive(Debug, Clone, PartialEq)]
pub struct Packing {
    pub placement: Placement,
    pub tasks: Vec<Task>,
}

/// Pack the longest prefix of `tasks` that fits in `offer`.
///
/// Returns the packing (or `None` if not even one task fits) and the
/// unaccepted suffix in its original order. A zero `usage` fits without
/// limit, so every task is accepted.
pub fn pack(
    mut tasks: Vec<Task>,
    usage: &ResourceVector,
    offer: &HostOffer,
) -> (Option<Packing>, Vec<Task>) {
    if tasks.is_empty() {
        debug!(offer = %offer.id, "no task to place");
        return (None, tasks);
    }

    let mut remain = offer.resources;
    let mut accepted = 0;
    for _ in &tasks {
        match remain.try_subtract(usage) {
            Some(rest) => {
                remain = rest;
                accepted += 1;
            }
            None => {
                debug!(%remain, %usage, "insufficient resource in remain");
                break;
            }
        }
    }

    let remaining = tasks.split_off(accepted);
    debug!(
        offer = %offer.id,
        host = %offer.hostname,
        selected = accepted,
        remaining = remaining.len(),
        "selected tasks to place"
    );

    if tasks.is_empty() {
        return (None, remaining);
    }

    let placement = Placement::for_offer(offer, tasks.iter().map(|t| t.id.clone()).collect());
    (Some(Packing { placement, tasks }), remaining)
}
