//! # taxosync-core
//!
//! Core types, traits, and abstractions for taxosync.
//!
//! This crate provides the domain model shared by the remote client and the
//! reconciliation engine, the error type, remote limits, and the
//! [`TaxonomyStore`] seam both sides meet at.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export commonly used types at crate root
pub use error::{ApiFailure, Error, RequestRecord, Result};
pub use models::*;
pub use traits::*;
