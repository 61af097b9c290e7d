//! # rowtx Core
//!
//! Transactional in-memory row store.
//!
//! This crate provides:
//! - Tables of typed rows keyed by primary key, each row a version chain
//! - Two concurrency-control modes per transaction: pessimistic row locking
//!   and snapshot MVCC
//! - A lock table with FIFO wait queues and wait-for-graph deadlock detection
//! - PRIMARY KEY, UNIQUE, NOT NULL and CHECK constraints, enforced on every
//!   write and re-validated at commit
//! - Atomic commit ordered by a single commit clock, and garbage collection
//!   of versions no snapshot can see

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
pub mod constraint;
mod database;
mod error;
pub mod lock;
mod schema;
mod stats;
pub mod storage;
pub mod transaction;
mod types;
mod value;

pub use config::Config;
pub use constraint::{CheckPredicate, CompareOp, Constraint, ConstraintKind};
pub use database::{Database, Txn};
pub use error::{CoreError, CoreResult};
pub use lock::{LockMode, LockTable};
pub use schema::{Catalog, ColumnDef, TableSchema};
pub use stats::{DatabaseStats, StatsSnapshot};
pub use transaction::{GcReport, TransactionManager, TransactionState};
pub use types::{IsolationMode, RowKey, TableId, Timestamp, TransactionId};
pub use value::{ColumnType, Row, Value};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
