//! In-batch deduplication of state changes.
//!
//! A page may touch the same logical key several times. Changes are ranked
//! by `(checkpoint, arrival position)`; per key the highest-ranked set is
//! written, and the highest-ranked remove is applied after it only when it
//! outranks that set. The bulk upsert therefore touches each key once and the
//! stored row reflects the newest change regardless of arrival order.

use std::collections::HashMap;

use crate::types::{StateChange, StateKey};

/// Per-key outcome of a page's state changes, in the order the backends
/// apply them: all `sets` first, then `removes`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePlan {
    pub sets: Vec<StateChange>,
    pub removes: Vec<StateChange>,
}

impl StatePlan {
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.removes.is_empty()
    }
}

#[derive(Default)]
struct Winners {
    set: Option<usize>,
    remove: Option<usize>,
}

/// Reduce a page's state changes (in arrival order) to at most one set and
/// one remove per [`StateKey`].
///
/// Within each list the output follows the arrival position of the chosen
/// change.
pub fn plan_state_changes(changes: &[StateChange]) -> StatePlan {
    let rank = |idx: usize| (changes[idx].checkpoint, idx);

    let mut winners: HashMap<&StateKey, Winners> = HashMap::with_capacity(changes.len());
    for (idx, change) in changes.iter().enumerate() {
        let entry = winners.entry(&change.key).or_default();
        let slot = if change.is_remove() {
            &mut entry.remove
        } else {
            &mut entry.set
        };
        if slot.map_or(true, |current| rank(idx) > rank(current)) {
            *slot = Some(idx);
        }
    }

    let mut set_idx = Vec::new();
    let mut remove_idx = Vec::new();
    for w in winners.values() {
        if let Some(s) = w.set {
            set_idx.push(s);
        }
        if let Some(r) = w.remove {
            if w.set.map_or(true, |s| rank(r) > rank(s)) {
                remove_idx.push(r);
            }
        }
    }
    set_idx.sort_unstable();
    remove_idx.sort_unstable();

    StatePlan {
        sets: set_idx.into_iter().map(|i| changes[i].clone()).collect(),
        removes: remove_idx.into_iter().map(|i| changes[i].clone()).collect(),
    }
}
