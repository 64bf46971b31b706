//! Teardown: delete every concept, then every concept scheme.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use taxosync_core::{RemoteResource, ResourceKind, Result, TaxonomyStore};

/// Counts from a purge run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub concepts: usize,
    pub schemes: usize,
    pub failed: usize,
}

/// Delete `resource`, re-reading it once if its version went stale.
pub(crate) async fn delete_with_retry<S: TaxonomyStore + ?Sized>(
    store: &S,
    kind: ResourceKind,
    resource: &RemoteResource,
) -> Result<()> {
    match store.delete(kind, resource.id(), resource.version()).await {
        Err(err) if err.api_failure().is_some_and(|f| f.is_version_conflict()) => {
            debug!(
                kind = %kind,
                resource_id = resource.id(),
                "Stale version on delete, re-reading"
            );
            let fresh = store.fetch(kind, resource.id()).await?;
            store.delete(kind, fresh.id(), fresh.version()).await
        }
        other => other,
    }
}

async fn delete_all<S: TaxonomyStore + ?Sized>(
    store: &S,
    kind: ResourceKind,
    concurrency: usize,
) -> Result<(usize, usize)> {
    let resources = store.list_all(kind, None).await?;
    let total = resources.len();
    let mut deleted = 0usize;
    let mut failed = 0usize;

    let mut results = stream::iter(resources)
        .map(|resource| async move {
            let result = delete_with_retry(store, kind, &resource).await;
            (resource, result)
        })
        .buffer_unordered(concurrency.max(1));
    while let Some((resource, result)) = results.next().await {
        match result {
            Ok(()) => deleted += 1,
            Err(err) => {
                warn!(
                    kind = %kind,
                    uri = resource.uri().unwrap_or_default(),
                    error = %err,
                    "Delete failed, skipping"
                );
                failed += 1;
            }
        }
    }
    info!(kind = %kind, item_count = total, deleted, failed, "Purged");
    Ok((deleted, failed))
}

/// Remove the whole taxonomy from the store.
///
/// Concepts go first so no scheme still lists them; schemes are re-listed
/// afterwards because those deletions bump their versions.
pub async fn purge<S: TaxonomyStore + ?Sized>(
    store: &S,
    concurrency: usize,
) -> Result<PurgeSummary> {
    let (concepts, concept_failures) = delete_all(store, ResourceKind::Concept, concurrency).await?;
    let (schemes, scheme_failures) =
        delete_all(store, ResourceKind::ConceptScheme, concurrency).await?;
    Ok(PurgeSummary {
        concepts,
        schemes,
        failed: concept_failures + scheme_failures,
    })
}
