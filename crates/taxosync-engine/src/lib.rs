//! # taxosync-engine
//!
//! Reconciles a remote taxonomy store with an upstream concept graph.
//!
//! A run validates the whole graph against the remote's limits, upserts
//! schemes and concepts, then patches link lists (`related`, `broader`,
//! scheme membership, top concepts) until they match, and finally deletes
//! concepts that dropped out of the payload.

pub mod hierarchy;
pub mod links;
pub mod mapper;
pub mod orchestrator;
pub mod purge;
pub mod report;
pub mod snapshot;
pub mod validate;

pub use hierarchy::{plan_concepts, CreationPlan};
pub use links::ListOutcome;
pub use mapper::{map_resource, ValueShape};
pub use orchestrator::{SyncConfig, SyncEngine};
pub use purge::{purge, PurgeSummary};
pub use report::{FailureSummary, SyncPhase, SyncReport};
pub use snapshot::SyncContext;
pub use validate::validate;
