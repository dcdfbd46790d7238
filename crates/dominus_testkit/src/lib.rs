//! # Dominus Testkit
//!
//! Test utilities for Dominus stores.
//!
//! This crate provides:
//! - Test fixtures and store helpers
//! - Property-based test generators using proptest
//! - A reference tree model that mirrors store operations
//! - Fault-injecting storage backends
//! - Fuzz testing harnesses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dominus_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         let doc = store.create_document().unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::model::*;
}

pub use faults::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use model::*;
