//! Structured logging field names for taxosync.
//!
//! These name the fields shared across crates, so a run can be followed end
//! to end by filtering on `run_id` and narrowed by subsystem, phase or list.
//! Event-local details (`uri`, `kind`, `item_count`) are spelled inline.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run aborted, or a fallback replace failed |
//! | WARN  | Per-resource failure skipped, rate limit hit, cycle found |
//! | INFO  | Run start/finish, phase completions with counts |
//! | DEBUG | Individual remote mutations, change-detection decisions |
//! | TRACE | Per-page listing, per-property mapping |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for a single reconciliation run. Format: UUIDv7.
pub const RUN_ID: &str = "run_id";

/// Subsystem originating the log event.
/// Values: "remote", "engine", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "contentful", "orchestrator", "links", "validator"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "list_all", "create", "patch", "sync"
pub const OPERATION: &str = "op";

/// Reconciliation phase currently running.
pub const PHASE: &str = "phase";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Link list being reconciled ("broader", "related", "concepts", "topConcepts").
pub const LINK_LIST: &str = "link_list";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_distinct() {
        let names = [RUN_ID, SUBSYSTEM, COMPONENT, OPERATION, PHASE, LINK_LIST];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
