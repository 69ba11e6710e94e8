//! Per-group completion tracking.
//!
//! A log group is done once every shell line in it has finished revealing.
//! Thought lines never gate completion, so a group without shell lines is
//! done immediately.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::protocol::LogGroup;

/// Whether every shell line of `group` is in `revealed` (line indices).
pub fn is_group_complete(group: &LogGroup, revealed: &BTreeSet<usize>) -> bool {
    group
        .logs
        .iter()
        .enumerate()
        .filter(|(_, line)| line.is_shell())
        .all(|(index, _)| revealed.contains(&index))
}

/// Reveal tally for the group currently on display.
///
/// Tied to the identity of one shared group; observing a different group
/// starts a new tally.
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    group: Arc<LogGroup>,
    revealed: BTreeSet<usize>,
}

impl CompletionTracker {
    pub fn new(group: Arc<LogGroup>) -> Self {
        Self {
            group,
            revealed: BTreeSet::new(),
        }
    }

    pub fn group(&self) -> &Arc<LogGroup> {
        &self.group
    }

    /// Point the tracker at `group`. Returns `true` if the tally was reset.
    pub fn observe(&mut self, group: &Arc<LogGroup>) -> bool {
        if Arc::ptr_eq(&self.group, group) {
            return false;
        }
        self.group = Arc::clone(group);
        self.revealed.clear();
        true
    }

    /// Record that the shell line at `index` finished revealing.
    ///
    /// Repeated signals and indices that are not shell lines are ignored.
    /// Returns `true` if the signal counted.
    pub fn mark_revealed(&mut self, index: usize) -> bool {
        match self.group.logs.get(index) {
            Some(line) if line.is_shell() => self.revealed.insert(index),
            _ => false,
        }
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed.len()
    }

    pub fn is_complete(&self) -> bool {
        is_group_complete(&self.group, &self.revealed)
    }
}
