//! Pessimistic row locking.
//!
//! Shared/exclusive locks keyed by [`RowKey`](crate::RowKey), FIFO wait
//! queues, and deadlock detection over a wait-for graph.

mod graph;
mod table;

pub use graph::WaitForGraph;
pub use table::{LockGrant, LockMode, LockTable};
