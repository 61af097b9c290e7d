//! Wait-for graph used for deadlock detection.

use crate::types::TransactionId;
use std::collections::{btree_set, BTreeMap, BTreeSet, HashSet};

static NO_EDGES: BTreeSet<TransactionId> = BTreeSet::new();

/// Directed graph over transaction IDs.
///
/// An edge `a -> b` means `a` is blocked until `b` releases a lock or leaves
/// the wait queue ahead of it. Nodes are plain IDs; there are no references
/// between nodes.
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    edges: BTreeMap<TransactionId, BTreeSet<TransactionId>>,
}

impl WaitForGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `waiter` waits for `holder`.
    pub fn add_edge(&mut self, waiter: TransactionId, holder: TransactionId) {
        if waiter != holder {
            self.edges.entry(waiter).or_default().insert(holder);
        }
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    fn successors(&self, node: TransactionId) -> btree_set::Iter<'_, TransactionId> {
        self.edges.get(&node).unwrap_or(&NO_EDGES).iter()
    }

    /// Finds a cycle that passes through `start`.
    ///
    /// Returns the transactions on the cycle, beginning with `start`, or
    /// `None` if `start` is not part of any cycle.
    #[must_use]
    pub fn cycle_through(&self, start: TransactionId) -> Option<Vec<TransactionId>> {
        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        let mut stack = vec![self.successors(start)];

        while let Some(frontier) = stack.last_mut() {
            match frontier.next().copied() {
                Some(next) if next == start => return Some(path),
                Some(next) => {
                    if visited.insert(next) {
                        path.push(next);
                        stack.push(self.successors(next));
                    }
                }
                None => {
                    stack.pop();
                    path.pop();
                }
            }
        }
        None
    }
}
