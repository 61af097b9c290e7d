//! Row storage.
//!
//! Every row is a chain of immutable versions stamped with commit
//! timestamps. Snapshot readers resolve the version visible at their start
//! timestamp; locking readers and constraint checks use the chain head.

mod store;
mod version;

pub use store::{PruneReport, RowStore, TableRows, Tables};
pub use version::{RowVersion, VersionChain};
