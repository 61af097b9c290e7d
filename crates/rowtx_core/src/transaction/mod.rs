//! Transaction management.
//!
//! Every transaction runs in one of two modes:
//! - **Locking**: reads take shared locks and see the latest committed
//!   value, writes take exclusive locks held until commit or abort
//! - **Snapshot MVCC**: reads see the database as of the start timestamp
//!   without locking, writes still take exclusive locks and fail on a
//!   conflicting newer commit
//!
//! Commits are serialized by the [`CommitClock`]; a commit publishes all of
//! its versions under one timestamp or none of them.

mod clock;
mod manager;
mod state;

pub use clock::{CommitClock, CommitGuard};
pub use manager::{GcReport, TransactionManager};
pub use state::{Transaction, TransactionState, WriteSet};
