//! # rowtx Testkit
//!
//! Test utilities for rowtx.
//!
//! This crate provides:
//! - Test fixtures: a seeded `accounts` table and balance helpers
//! - Property-based test generators using proptest
//! - Multi-threaded transfer workloads for both isolation modes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowtx_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_accounts() {
//!     let db = TestDatabase::with_accounts(10, 1_000);
//!     assert_eq!(db.total_balance().unwrap(), 10_000);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
