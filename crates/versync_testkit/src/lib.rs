//! # Versync Testkit
//!
//! Test utilities for Versync.
//!
//! This crate provides:
//! - Test fixtures: temporary repositories, clones and diverged replicas
//! - Property-based generators for working-tree operations
//! - A crash harness for torn log writes and step budgets
//! - Invariant assertions shared by the crate test suites
//!
//! ## Usage
//!
//! ```rust,ignore
//! use versync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_repository() {
//!     with_temp_repo(|repo| {
//!         repo.create_file("/a", b"a").unwrap();
//!         repo.commit("a").unwrap();
//!         assert_no_overlap(repo);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod invariants;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::invariants::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use invariants::*;
