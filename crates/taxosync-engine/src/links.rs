//! Link list reconciliation.
//!
//! Every list (`related`, `broader`, `concepts`, `topConcepts`) is brought to
//! its desired contents with at most two patches: one batch of removals in
//! descending index order, then one batch of appends computed against the
//! list as the removal left it. A patch rejected for a stale version is
//! retried once after re-reading the owner.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info, warn};

use taxosync_core::{
    logging, Error, Link, LinkList, PatchOp, RemoteResource, ResourceKind, Result, SourceResource,
    SyncRequest, TaxonomyStore,
};

use crate::report::{SyncPhase, SyncReport};
use crate::snapshot::SyncContext;

/// What one list reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOutcome {
    pub removed: usize,
    pub added: usize,
    /// Patch calls issued (0, 1 or 2).
    pub patches: usize,
}

impl ListOutcome {
    pub fn is_noop(&self) -> bool {
        self.patches == 0
    }
}

fn is_version_conflict(error: &Error) -> bool {
    error.api_failure().is_some_and(|f| f.is_version_conflict())
}

/// Compute ops against the snapshot entry for `uri` and apply them.
///
/// Returns the number of ops applied (0 when nothing needed doing).
async fn patch_with_retry<S, F>(
    store: &S,
    ctx: &mut SyncContext,
    kind: ResourceKind,
    uri: &str,
    mut compute: F,
) -> Result<usize>
where
    S: TaxonomyStore + ?Sized,
    F: FnMut(&RemoteResource, &SyncContext) -> Vec<PatchOp>,
{
    let mut retried = false;
    loop {
        let current = ctx
            .get(kind, uri)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} with uri '{}'", kind, uri)))?;
        let ops = compute(&current, ctx);
        if ops.is_empty() {
            return Ok(0);
        }
        match store.patch(kind, current.id(), &ops, current.version()).await {
            Ok(updated) => {
                ctx.record(kind, updated);
                return Ok(ops.len());
            }
            Err(err) if !retried && is_version_conflict(&err) => {
                debug!(
                    kind = %kind,
                    uri,
                    resource_id = current.id(),
                    "Stale version, re-reading before retry"
                );
                let fresh = store.fetch(kind, current.id()).await?;
                ctx.record(kind, fresh);
                retried = true;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Bring `list` on the resource identified by `owner_uri` to `required`,
/// also keeping any present target for which `keep` returns true.
///
/// Targets are concept URIs; links whose id is unknown to the snapshot are
/// judged by their raw id. Duplicate links are always removed.
pub async fn reconcile_list<S, K>(
    store: &S,
    ctx: &mut SyncContext,
    list: LinkList,
    owner_uri: &str,
    required: &[String],
    keep: K,
) -> Result<ListOutcome>
where
    S: TaxonomyStore + ?Sized,
    K: Fn(&str) -> bool,
{
    let kind = list.owner();
    let mut outcome = ListOutcome::default();

    let removals = |current: &RemoteResource, ctx: &SyncContext| {
        let mut seen = HashSet::new();
        let mut indices = Vec::new();
        for (index, link) in current.links(list).iter().enumerate() {
            let target = ctx.uri_for_id(link.id()).unwrap_or(link.id());
            let wanted = required.iter().any(|r| r == target) || keep(target);
            if !wanted || !seen.insert(link.id()) {
                indices.push(index);
            }
        }
        indices
            .into_iter()
            .rev()
            .map(|index| PatchOp::remove(list, index))
            .collect::<Vec<_>>()
    };
    outcome.removed = patch_with_retry(store, ctx, kind, owner_uri, removals).await?;
    if outcome.removed > 0 {
        outcome.patches += 1;
    }

    let additions = |current: &RemoteResource, ctx: &SyncContext| {
        let mut present: HashSet<&str> = current.link_ids(list).into_iter().collect();
        let mut next = current.links(list).len();
        let mut ops = Vec::new();
        for uri in required {
            let Some(id) = ctx.id_for(ResourceKind::Concept, uri) else {
                continue;
            };
            if present.insert(id) {
                ops.push(PatchOp::add(list, next, Link::concept(id)));
                next += 1;
            }
        }
        ops
    };
    outcome.added = patch_with_retry(store, ctx, kind, owner_uri, additions).await?;
    if outcome.added > 0 {
        outcome.patches += 1;
    }

    if !outcome.is_noop() {
        debug!(
            uri = owner_uri,
            { logging::LINK_LIST } = %list,
            removed = outcome.removed,
            added = outcome.added,
            "Link list reconciled"
        );
    }
    Ok(outcome)
}

fn push_unique(list: &mut Vec<String>, uri: &str) {
    if !list.iter().any(|u| u == uri) {
        list.push(uri.to_string());
    }
}

fn record(report: &mut SyncReport, phase: SyncPhase, uri: &str, result: Result<ListOutcome>) {
    match result {
        Ok(outcome) => report.patched += outcome.patches,
        Err(err) => {
            warn!(
                { logging::PHASE } = %phase,
                uri,
                error = %err,
                "Link reconciliation failed, skipping"
            );
            report.record_failure(phase, uri, &err);
        }
    }
}

/// Canonical `related` edges of the payload, both ends existing remotely.
fn related_edges(request: &SyncRequest, ctx: &SyncContext) -> BTreeSet<(String, String)> {
    let mut edges = BTreeSet::new();
    for concept in request.concepts() {
        for other in &concept.related {
            if *other == concept.id
                || ctx.concept(other).is_none()
                || ctx.concept(&concept.id).is_none()
            {
                continue;
            }
            let (head, tail) = if concept.id < *other {
                (concept.id.clone(), other.clone())
            } else {
                (other.clone(), concept.id.clone())
            };
            edges.insert((head, tail));
        }
    }
    edges
}

fn lists(ctx: &SyncContext, owner: &str, target: &str) -> bool {
    let (Some(owner), Some(target_id)) = (
        ctx.concept(owner),
        ctx.id_for(ResourceKind::Concept, target),
    ) else {
        return false;
    };
    owner.link_ids(LinkList::Related).contains(&target_id)
}

/// Reconcile the symmetric `related` relation.
///
/// Payload concepts own their whole `related` list. A concept outside the
/// payload only loses links that point at payload concepts. A missing edge
/// is added on its head (the lesser URI) only; the remote may mirror it.
pub async fn reconcile_related<S: TaxonomyStore + ?Sized>(
    store: &S,
    ctx: &mut SyncContext,
    request: &SyncRequest,
    report: &mut SyncReport,
) {
    let phase = SyncPhase::ReconcileRelated;
    let payload: BTreeSet<&str> = request.concepts().map(|c| c.id.as_str()).collect();
    let edges = related_edges(request, ctx);

    let mut candidates: BTreeSet<String> = payload
        .iter()
        .filter(|uri| ctx.concept(uri).is_some())
        .map(|uri| uri.to_string())
        .collect();
    for (head, tail) in &edges {
        candidates.insert(head.clone());
        candidates.insert(tail.clone());
    }
    for (uri, concept) in ctx.concepts() {
        let points_into_payload = concept
            .link_ids(LinkList::Related)
            .iter()
            .filter_map(|id| ctx.uri_for_id(id))
            .any(|target| payload.contains(target));
        if points_into_payload {
            candidates.insert(uri.clone());
        }
    }

    for uri in &candidates {
        let in_payload = payload.contains(uri.as_str());
        let partners: BTreeSet<&str> = edges
            .iter()
            .filter_map(|(head, tail)| {
                if head == uri {
                    Some(tail.as_str())
                } else if tail == uri {
                    Some(head.as_str())
                } else {
                    None
                }
            })
            .collect();
        let required: Vec<String> = edges
            .iter()
            .filter(|(head, tail)| head == uri && !lists(ctx, tail, head))
            .map(|(_, tail)| tail.clone())
            .collect();
        let keep = |target: &str| {
            partners.contains(target) || (!in_payload && !payload.contains(target))
        };

        let before: BTreeSet<String> = ctx
            .concept(uri)
            .map(|c| c.link_ids(LinkList::Related).into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        let result = reconcile_list(store, ctx, LinkList::Related, uri, &required, keep).await;
        let changed = result.as_ref().is_ok_and(|o| !o.is_noop());
        record(report, phase, uri, result);
        if !changed {
            continue;
        }

        // The remote keeps `related` symmetric, so counterparts moved too.
        let after: BTreeSet<String> = ctx
            .concept(uri)
            .map(|c| c.link_ids(LinkList::Related).into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        for id in before.symmetric_difference(&after) {
            let Some(counterpart) = ctx.uri_for_id(id).map(str::to_string) else {
                continue;
            };
            match store.fetch(ResourceKind::Concept, id).await {
                Ok(fresh) => ctx.record(ResourceKind::Concept, fresh),
                Err(err) => {
                    warn!(
                        uri = %counterpart,
                        error = %err,
                        "Failed to refresh related counterpart"
                    );
                    report.record_failure(phase, &counterpart, &err);
                }
            }
        }
    }
    info!(
        { logging::PHASE } = %phase,
        edge_count = edges.len(),
        candidate_count = candidates.len(),
        "Phase complete"
    );
}

/// Desired `broader` targets of a payload concept: its own `broader` plus
/// every payload concept listing it as `narrower`.
fn desired_broader(
    request: &SyncRequest,
    concept: &SourceResource,
    ctx: &SyncContext,
) -> Vec<String> {
    let mut desired = Vec::new();
    for parent in &concept.broader {
        push_unique(&mut desired, parent);
    }
    for parent in request.concepts() {
        if parent.narrower.contains(&concept.id) {
            push_unique(&mut desired, &parent.id);
        }
    }
    desired.retain(|uri| *uri != concept.id && ctx.concept(uri).is_some());
    desired
}

/// Reconcile the directed `broader` relation of every payload concept.
pub async fn reconcile_broader<S: TaxonomyStore + ?Sized>(
    store: &S,
    ctx: &mut SyncContext,
    request: &SyncRequest,
    report: &mut SyncReport,
) {
    let phase = SyncPhase::ReconcileBroader;
    let mut count = 0usize;
    for concept in request.concepts() {
        if ctx.concept(&concept.id).is_none() {
            continue;
        }
        let desired = desired_broader(request, concept, ctx);
        let result =
            reconcile_list(store, ctx, LinkList::Broader, &concept.id, &desired, |_| false).await;
        record(report, phase, &concept.id, result);
        count += 1;
    }
    info!({ logging::PHASE } = %phase, item_count = count, "Phase complete");
}

/// Top concepts of `scheme`, in payload order: its `hasTopConcept` list
/// followed by concepts declaring `topConceptOf` it.
pub fn desired_top_concepts(
    request: &SyncRequest,
    scheme: &SourceResource,
    ctx: &SyncContext,
) -> Vec<String> {
    let payload: HashSet<&str> = request.concepts().map(|c| c.id.as_str()).collect();
    let mut desired = Vec::new();
    for top in &scheme.has_top_concept {
        push_unique(&mut desired, top);
    }
    for concept in request.concepts() {
        if concept.top_concept_of.contains(&scheme.id) {
            push_unique(&mut desired, &concept.id);
        }
    }
    desired.retain(|uri| payload.contains(uri.as_str()) && ctx.concept(uri).is_some());
    desired
}

/// Members of `scheme`, in payload order: top concepts plus concepts
/// declaring `inScheme` it. Concepts absent from the payload or never
/// created are left out.
pub fn desired_members(
    request: &SyncRequest,
    scheme: &SourceResource,
    ctx: &SyncContext,
) -> Vec<String> {
    let mut desired = desired_top_concepts(request, scheme, ctx);
    for concept in request.concepts() {
        if concept.in_scheme.contains(&scheme.id) && ctx.concept(&concept.id).is_some() {
            push_unique(&mut desired, &concept.id);
        }
    }
    desired
}

async fn reconcile_schemes<S, F>(
    store: &S,
    ctx: &mut SyncContext,
    request: &SyncRequest,
    report: &mut SyncReport,
    phase: SyncPhase,
    list: LinkList,
    desired_for: F,
) where
    S: TaxonomyStore + ?Sized,
    F: Fn(&SyncRequest, &SourceResource, &SyncContext) -> Vec<String>,
{
    let mut count = 0usize;
    for scheme in request.schemes() {
        if ctx.scheme(&scheme.id).is_none() {
            continue;
        }
        let desired = desired_for(request, scheme, ctx);
        let result = reconcile_list(store, ctx, list, &scheme.id, &desired, |_| false).await;
        record(report, phase, &scheme.id, result);
        count += 1;
    }
    info!({ logging::PHASE } = %phase, item_count = count, "Phase complete");
}

/// Reconcile every payload scheme's `concepts` list.
pub async fn reconcile_scheme_membership<S: TaxonomyStore + ?Sized>(
    store: &S,
    ctx: &mut SyncContext,
    request: &SyncRequest,
    report: &mut SyncReport,
) {
    reconcile_schemes(
        store,
        ctx,
        request,
        report,
        SyncPhase::ReconcileSchemeMembership,
        LinkList::Concepts,
        desired_members,
    )
    .await
}

/// Reconcile every payload scheme's `topConcepts` list. Runs after
/// membership: the remote rejects a top concept that is not a member.
pub async fn reconcile_top_concepts<S: TaxonomyStore + ?Sized>(
    store: &S,
    ctx: &mut SyncContext,
    request: &SyncRequest,
    report: &mut SyncReport,
) {
    reconcile_schemes(
        store,
        ctx,
        request,
        report,
        SyncPhase::ReconcileTopConcepts,
        LinkList::TopConcepts,
        desired_top_concepts,
    )
    .await
}
