//! Per-run accounting.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use taxosync_core::Error;

/// Orchestrator states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Validate,
    CreateOrUpdateSchemes,
    CreateOrUpdateConcepts,
    ReconcileRelated,
    ReconcileBroader,
    ReconcileSchemeMembership,
    ReconcileTopConcepts,
    DeleteOrphans,
    Done,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Validate => "validate",
            SyncPhase::CreateOrUpdateSchemes => "create_or_update_schemes",
            SyncPhase::CreateOrUpdateConcepts => "create_or_update_concepts",
            SyncPhase::ReconcileRelated => "reconcile_related",
            SyncPhase::ReconcileBroader => "reconcile_broader",
            SyncPhase::ReconcileSchemeMembership => "reconcile_scheme_membership",
            SyncPhase::ReconcileTopConcepts => "reconcile_top_concepts",
            SyncPhase::DeleteOrphans => "delete_orphans",
            SyncPhase::Done => "done",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remote failure that was logged and skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSummary {
    pub phase: SyncPhase,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

/// Outcome of one sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Patch calls applied to link lists.
    pub patched: usize,
    pub deleted: usize,
    pub failures: Vec<FailureSummary>,
    /// Hierarchy cycles found while planning concept creation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<Vec<String>>,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            created: 0,
            updated: 0,
            unchanged: 0,
            patched: 0,
            deleted: 0,
            failures: Vec::new(),
            cycles: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, phase: SyncPhase, uri: &str, error: &Error) {
        self.failures.push(FailureSummary {
            phase,
            uri: uri.to_string(),
            status: error.api_failure().map(|f| f.status),
            message: error.to_string(),
        });
    }

    /// Remote calls that changed state.
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.patched + self.deleted
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_serializes_counts_and_failures() {
        let mut report = SyncReport::new();
        report.created = 2;
        report.patched = 3;
        report.record_failure(
            SyncPhase::ReconcileBroader,
            "http://ex.com/a",
            &Error::NotFound("concept".to_string()),
        );
        report.finish();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["created"], 2);
        assert_eq!(value["failures"][0]["phase"], "reconcile_broader");
        assert!(value["failures"][0].get("status").is_none());
        assert!(value.get("cycles").is_none());
        assert_eq!(report.mutations(), 5);
        assert!(report.finished_at.unwrap() >= report.started_at);
    }

    #[test]
    fn test_run_ids_are_v7() {
        assert_eq!(SyncReport::new().run_id.get_version_num(), 7);
    }
}
