//! # LiveSync Testkit
//!
//! Test utilities for LiveSync.
//!
//! This crate provides:
//! - HR fixtures: schemas, a prepared store and a bidirectional configuration
//! - [`TestHarness`], an engine wired to a memory store with a deferred job
//!   queue and an in-memory sync log
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livesync_testkit::prelude::*;
//!
//! #[test]
//! fn employee_creates_user() {
//!     let harness = TestHarness::hr();
//!     harness.create(employee("EMP-1", "Ada", "ada"));
//!     assert!(harness.find(USER, "ada").is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
