//! Sync run state machine.
//!
//! `Validate -> CreateOrUpdateSchemes -> CreateOrUpdateConcepts ->
//! ReconcileRelated -> ReconcileBroader -> ReconcileSchemeMembership ->
//! ReconcileTopConcepts -> DeleteOrphans -> Done`
//!
//! Creation phases fan out over a bounded worker pool; every result is
//! applied to the snapshot by the single consumer loop. Link phases run one
//! resource at a time because each patch needs the owner's current version.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, info_span, warn, Instrument};

use taxosync_core::{defaults, logging};
use taxosync_core::{
    merge_payload, Error, RemotePayload, RemoteResource, ResourceKind, Result, SourceResource,
    SyncRequest, TaxonomyStore,
};

use crate::hierarchy::plan_concepts;
use crate::links;
use crate::mapper::{managed_keys, map_resource};
use crate::purge::{self, delete_with_retry, PurgeSummary};
use crate::report::{SyncPhase, SyncReport};
use crate::snapshot::SyncContext;
use crate::validate::validate;

/// Configuration for sync runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Concurrent create/replace calls during creation phases.
    pub max_parallel_requests: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel_requests: defaults::MAX_PARALLEL_REQUESTS,
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TAXOSYNC_MAX_PARALLEL_REQUESTS` | `2` | Concurrent creation calls |
    pub fn from_env() -> Self {
        let max_parallel_requests = std::env::var("TAXOSYNC_MAX_PARALLEL_REQUESTS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::MAX_PARALLEL_REQUESTS)
            .max(1);
        Self {
            max_parallel_requests,
        }
    }

    pub fn with_max_parallel_requests(mut self, max: usize) -> Self {
        self.max_parallel_requests = max.max(1);
        self
    }
}

/// Result of writing one scheme or concept.
#[derive(Debug)]
enum Written {
    Created(RemoteResource),
    Updated(RemoteResource),
    Unchanged,
    /// Create failed for a reason other than a URI conflict.
    Skipped(Error),
}

fn is_blank(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Whether replacing `existing` with `payload` would change any mapped key.
fn has_change(existing: &RemoteResource, payload: &RemotePayload, managed: &[&str]) -> bool {
    managed.iter().any(|key| {
        let current = existing.value_of(key).filter(|v| !is_blank(v));
        payload.get(*key) != current.as_ref()
    })
}

fn is_version_conflict(error: &Error) -> bool {
    error.api_failure().is_some_and(|f| f.is_version_conflict())
}

/// Reconciles a [`TaxonomyStore`] with upstream graphs.
pub struct SyncEngine<S> {
    store: S,
    config: SyncConfig,
}

impl<S: TaxonomyStore> SyncEngine<S> {
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Validate against a fresh snapshot without mutating anything.
    pub async fn validate(&self, request: &SyncRequest) -> Result<Vec<String>> {
        let ctx = SyncContext::populate(&self.store).await?;
        Ok(validate(request, &ctx))
    }

    /// Run one full reconciliation.
    ///
    /// Returns [`Error::Validation`] before any mutation when the payload is
    /// rejected, and the first load-bearing remote failure otherwise.
    /// Per-resource failures in later phases are logged and collected in
    /// the report.
    pub async fn sync(&self, request: &SyncRequest) -> Result<SyncReport> {
        let report = SyncReport::new();
        let span = info_span!(
            "sync",
            { logging::RUN_ID } = %report.run_id,
            { logging::SUBSYSTEM } = "engine"
        );
        self.run(request, report).instrument(span).await
    }

    /// Delete the whole taxonomy.
    pub async fn purge(&self) -> Result<PurgeSummary> {
        purge::purge(&self.store, self.config.max_parallel_requests).await
    }

    async fn run(&self, request: &SyncRequest, mut report: SyncReport) -> Result<SyncReport> {
        info!(
            item_count = request.graph.len(),
            max_parallel_requests = self.config.max_parallel_requests,
            "Sync started"
        );

        info!({ logging::PHASE } = %SyncPhase::Validate, "Phase started");
        let mut ctx = SyncContext::populate(&self.store).await?;
        let errors = validate(request, &ctx);
        if !errors.is_empty() {
            error!(error_count = errors.len(), "Validation failed, aborting before any mutation");
            return Err(Error::Validation(errors));
        }

        let schemes: Vec<&SourceResource> = request.schemes().collect();
        self.write_all(
            &mut ctx,
            &mut report,
            SyncPhase::CreateOrUpdateSchemes,
            ResourceKind::ConceptScheme,
            schemes,
        )
        .await?;

        let plan = plan_concepts(request);
        let by_id: HashMap<&str, &SourceResource> =
            request.concepts().map(|c| (c.id.as_str(), c)).collect();
        let concepts: Vec<&SourceResource> = plan
            .order
            .iter()
            .filter_map(|uri| by_id.get(uri.as_str()).copied())
            .collect();
        report.cycles = plan.cycles;
        self.write_all(
            &mut ctx,
            &mut report,
            SyncPhase::CreateOrUpdateConcepts,
            ResourceKind::Concept,
            concepts,
        )
        .await?;

        info!({ logging::PHASE } = %SyncPhase::ReconcileRelated, "Phase started");
        links::reconcile_related(&self.store, &mut ctx, request, &mut report).await;
        info!({ logging::PHASE } = %SyncPhase::ReconcileBroader, "Phase started");
        links::reconcile_broader(&self.store, &mut ctx, request, &mut report).await;
        info!({ logging::PHASE } = %SyncPhase::ReconcileSchemeMembership, "Phase started");
        links::reconcile_scheme_membership(&self.store, &mut ctx, request, &mut report).await;
        info!({ logging::PHASE } = %SyncPhase::ReconcileTopConcepts, "Phase started");
        links::reconcile_top_concepts(&self.store, &mut ctx, request, &mut report).await;

        info!({ logging::PHASE } = %SyncPhase::DeleteOrphans, "Phase started");
        self.delete_orphans(&mut ctx, request, &mut report).await;

        report.finish();
        info!(
            { logging::PHASE } = %SyncPhase::Done,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            patched = report.patched,
            deleted = report.deleted,
            failures = report.failures.len(),
            "Sync finished"
        );
        Ok(report)
    }

    /// Upsert `resources` with bounded concurrency, applying each result to
    /// the snapshot as it completes.
    async fn write_all(
        &self,
        ctx: &mut SyncContext,
        report: &mut SyncReport,
        phase: SyncPhase,
        kind: ResourceKind,
        resources: Vec<&SourceResource>,
    ) -> Result<()> {
        info!({ logging::PHASE } = %phase, item_count = resources.len(), "Phase started");

        // One task per URI keeps snapshot writes disjoint.
        let mut seen = HashSet::new();
        let tasks: Vec<(String, RemotePayload, Option<RemoteResource>)> = resources
            .into_iter()
            .filter(|r| seen.insert(r.id.as_str()))
            .map(|r| {
                (
                    r.id.clone(),
                    map_resource(r, ctx.locales()),
                    ctx.get(kind, &r.id).cloned(),
                )
            })
            .collect();
        let managed_owned = managed_keys(kind);
        let managed: &[&str] = &managed_owned;

        let mut results = stream::iter(tasks)
            .map(|(uri, payload, existing)| async move {
                let written = self
                    .write_one(kind, &uri, &payload, existing.as_ref(), managed)
                    .await;
                (uri, written)
            })
            .buffer_unordered(self.config.max_parallel_requests.max(1));

        while let Some((uri, written)) = results.next().await {
            match written {
                Ok(Written::Created(resource)) => {
                    report.created += 1;
                    ctx.record(kind, resource);
                }
                Ok(Written::Updated(resource)) => {
                    report.updated += 1;
                    ctx.record(kind, resource);
                }
                Ok(Written::Unchanged) => report.unchanged += 1,
                Ok(Written::Skipped(err)) => report.record_failure(phase, &uri, &err),
                Err(err) => {
                    error!(
                        { logging::PHASE } = %phase,
                        uri = %uri,
                        error = %err,
                        "Load-bearing write failed, aborting run"
                    );
                    return Err(err);
                }
            }
        }
        info!({ logging::PHASE } = %phase, "Phase complete");
        Ok(())
    }

    async fn write_one(
        &self,
        kind: ResourceKind,
        uri: &str,
        payload: &RemotePayload,
        existing: Option<&RemoteResource>,
        managed: &[&str],
    ) -> Result<Written> {
        if let Some(existing) = existing {
            if !has_change(existing, payload, managed) {
                debug!(kind = %kind, uri, "Unchanged, skipping");
                return Ok(Written::Unchanged);
            }
            debug!(kind = %kind, uri, resource_id = existing.id(), "Changed, replacing");
            let resource = self.replace(kind, existing, payload, managed).await?;
            return Ok(Written::Updated(resource));
        }

        match self.store.create(kind, payload).await {
            Ok(resource) => {
                debug!(kind = %kind, uri, resource_id = resource.id(), "Created");
                Ok(Written::Created(resource))
            }
            Err(err) if err.api_failure().is_some_and(|f| f.is_uri_conflict()) => {
                let upserted = self.store.resolve_uri_conflict(kind, payload, managed).await?;
                Ok(Written::Updated(upserted.resource))
            }
            Err(err) => {
                warn!(kind = %kind, uri, error = %err, "Create failed, skipping resource");
                Ok(Written::Skipped(err))
            }
        }
    }

    /// Full replace of a resource known to exist; a stale version is
    /// re-read and retried once.
    async fn replace(
        &self,
        kind: ResourceKind,
        existing: &RemoteResource,
        payload: &RemotePayload,
        managed: &[&str],
    ) -> Result<RemoteResource> {
        let body = merge_payload(existing, payload, managed)?;
        match self
            .store
            .replace(kind, existing.id(), &body, existing.version())
            .await
        {
            Err(err) if is_version_conflict(&err) => {
                let fresh = self.store.fetch(kind, existing.id()).await?;
                let body = merge_payload(&fresh, payload, managed)?;
                self.store
                    .replace(kind, fresh.id(), &body, fresh.version())
                    .await
            }
            other => other,
        }
    }

    /// Delete snapshot concepts absent from the payload whose pre-run
    /// schemes are all in the payload. Concepts that no scheme listed, or
    /// that a scheme outside the payload listed, are left alone.
    async fn delete_orphans(
        &self,
        ctx: &mut SyncContext,
        request: &SyncRequest,
        report: &mut SyncReport,
    ) {
        let phase = SyncPhase::DeleteOrphans;
        let payload_concepts: HashSet<&str> = request.concepts().map(|c| c.id.as_str()).collect();
        let payload_schemes: HashSet<&str> = request.schemes().map(|s| s.id.as_str()).collect();

        let orphans: Vec<String> = ctx
            .concepts()
            .map(|(uri, _)| uri)
            .filter(|uri| !payload_concepts.contains(uri.as_str()))
            .filter(|uri| {
                ctx.schemes_referencing_before(uri).is_some_and(|refs| {
                    !refs.is_empty() && refs.iter().all(|s| payload_schemes.contains(s.as_str()))
                })
            })
            .cloned()
            .collect();

        for uri in &orphans {
            let Some(concept) = ctx.concept(uri).cloned() else {
                continue;
            };
            match delete_with_retry(&self.store, ResourceKind::Concept, &concept).await {
                Ok(()) => {
                    debug!(uri = %uri, resource_id = concept.id(), "Orphan deleted");
                    ctx.remove(ResourceKind::Concept, uri);
                    report.deleted += 1;
                }
                Err(err) => {
                    warn!(uri = %uri, error = %err, "Orphan delete failed, skipping");
                    report.record_failure(phase, uri, &err);
                }
            }
        }
        info!(
            { logging::PHASE } = %phase,
            item_count = orphans.len(),
            deleted = report.deleted,
            "Phase complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(value: JsonValue) -> RemoteResource {
        serde_json::from_value(value).unwrap()
    }

    fn payload(value: JsonValue) -> RemotePayload {
        value.as_object().cloned().unwrap()
    }

    const MANAGED: &[&str] = &["uri", "prefLabel", "altLabels"];

    #[test]
    fn test_has_change_equal_payload() {
        let existing = remote(json!({
            "sys": {"id": "c1", "version": 3},
            "uri": "a",
            "prefLabel": {"en-US": "A"},
            "altLabels": {},
            "broader": [{"sys": {"id": "c0", "type": "Link"}}]
        }));
        let body = payload(json!({"uri": "a", "prefLabel": {"en-US": "A"}}));
        assert!(!has_change(&existing, &body, MANAGED));
    }

    #[test]
    fn test_has_change_detects_edit_and_dropped_key() {
        let existing = remote(json!({
            "sys": {"id": "c1", "version": 3},
            "uri": "a",
            "prefLabel": {"en-US": "A"},
            "altLabels": {"en-US": ["x"]}
        }));
        let edited = payload(json!({
            "uri": "a",
            "prefLabel": {"en-US": "B"},
            "altLabels": {"en-US": ["x"]}
        }));
        assert!(has_change(&existing, &edited, MANAGED));

        let dropped = payload(json!({"uri": "a", "prefLabel": {"en-US": "A"}}));
        assert!(has_change(&existing, &dropped, MANAGED));
    }

    #[test]
    fn test_config_builder_clamps() {
        assert_eq!(SyncConfig::default().max_parallel_requests, 2);
        assert_eq!(
            SyncConfig::default()
                .with_max_parallel_requests(0)
                .max_parallel_requests,
            1
        );
    }
}
