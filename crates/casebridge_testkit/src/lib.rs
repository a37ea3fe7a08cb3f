//! # Casebridge Testkit
//!
//! Test utilities for the case-management procedure bridge.
//!
//! This crate provides:
//! - Fault-injecting procedure stores
//! - A retry observer that records every retry transition
//! - A procedure store seeded with case-management data
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use casebridge_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn recovers_from_outage() {
//!     let store = FlakyStore::new(seeded_case_store(), FaultKind::TransientUnavailable, 2);
//!     // ... build a bridge over `store`
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
