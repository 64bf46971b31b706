//! The remote taxonomy store seam.
//!
//! The engine only ever talks to the remote through [`TaxonomyStore`]; the
//! HTTP client and the in-memory mock both implement it.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::*;

/// Outcome of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    /// Create hit a URI conflict and the existing resource was replaced.
    Replaced,
}

#[derive(Debug, Clone)]
pub struct Upserted {
    pub resource: RemoteResource,
    pub action: UpsertAction,
}

/// Build a full-replace body: the existing resource with the caller's
/// `managed_keys` overwritten by `payload` (or dropped when `payload` lacks
/// them). Fields the caller does not manage, link lists included, survive.
pub fn merge_payload(
    existing: &RemoteResource,
    payload: &RemotePayload,
    managed_keys: &[&str],
) -> Result<RemotePayload> {
    let mut body = match serde_json::to_value(existing)? {
        JsonValue::Object(map) => map,
        _ => return Err(Error::Internal("remote resource is not an object".into())),
    };
    for key in managed_keys {
        if !payload.contains_key(*key) {
            body.remove(*key);
        }
    }
    for (key, value) in payload {
        body.insert(key.clone(), value.clone());
    }
    Ok(body)
}

/// Primitive operations of the remote taxonomy store.
///
/// Every mutating call takes the version token the caller last observed and
/// returns the resource as the remote now holds it.
#[async_trait]
pub trait TaxonomyStore: Send + Sync {
    /// Locales configured in the target environment.
    async fn list_locales(&self) -> Result<Vec<Locale>>;

    /// Every resource of `kind`, following pagination until exhausted.
    /// `scheme_id` restricts concepts to one scheme.
    async fn list_all(
        &self,
        kind: ResourceKind,
        scheme_id: Option<&str>,
    ) -> Result<Vec<RemoteResource>>;

    /// Re-read a single resource by remote id.
    async fn fetch(&self, kind: ResourceKind, id: &str) -> Result<RemoteResource>;

    async fn create(&self, kind: ResourceKind, payload: &RemotePayload) -> Result<RemoteResource>;

    /// Full replace guarded by `version`.
    async fn replace(
        &self,
        kind: ResourceKind,
        id: &str,
        body: &RemotePayload,
        version: u64,
    ) -> Result<RemoteResource>;

    /// Apply indexed list operations in order, guarded by `version`.
    async fn patch(
        &self,
        kind: ResourceKind,
        id: &str,
        ops: &[PatchOp],
        version: u64,
    ) -> Result<RemoteResource>;

    async fn delete(&self, kind: ResourceKind, id: &str, version: u64) -> Result<()>;

    /// Create, or on a URI conflict locate the existing resource and replace it.
    async fn upsert(
        &self,
        kind: ResourceKind,
        payload: &RemotePayload,
        managed_keys: &[&str],
    ) -> Result<Upserted> {
        match self.create(kind, payload).await {
            Ok(resource) => Ok(Upserted {
                resource,
                action: UpsertAction::Created,
            }),
            Err(err) if err.api_failure().is_some_and(|f| f.is_uri_conflict()) => {
                self.resolve_uri_conflict(kind, payload, managed_keys).await
            }
            Err(err) => Err(err),
        }
    }

    /// Fallback half of [`TaxonomyStore::upsert`]: find the resource holding
    /// the payload's URI and replace it.
    ///
    /// Errors here are load-bearing: the resource is known to exist, so a
    /// failed replace must reach the caller.
    async fn resolve_uri_conflict(
        &self,
        kind: ResourceKind,
        payload: &RemotePayload,
        managed_keys: &[&str],
    ) -> Result<Upserted> {
        let uri = payload.get("uri").and_then(JsonValue::as_str).unwrap_or_default();
        debug!(kind = %kind, uri, "URI already exists, falling back to replace");
        let existing = self
            .list_all(kind, None)
            .await?
            .into_iter()
            .find(|r| r.uri() == Some(uri))
            .ok_or_else(|| {
                warn!(kind = %kind, uri, "Conflicting resource not found in listing");
                Error::NotFound(format!("{} with uri '{}'", kind, uri))
            })?;

        let body = merge_payload(&existing, payload, managed_keys)?;
        let resource = self
            .replace(kind, existing.id(), &body, existing.version())
            .await?;
        Ok(Upserted {
            resource,
            action: UpsertAction::Replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn existing() -> RemoteResource {
        serde_json::from_value(json!({
            "sys": {"id": "c1", "version": 4},
            "uri": "http://ex.com/a",
            "prefLabel": {"en-US": "Old"},
            "altLabels": {"en-US": ["stale"]},
            "broader": [{"sys": {"id": "c0", "type": "Link", "linkType": "TaxonomyConcept"}}]
        }))
        .unwrap()
    }

    #[test]
    fn test_merge_payload_overwrites_and_drops_managed_keys() {
        let mut payload = RemotePayload::new();
        payload.insert("uri".into(), json!("http://ex.com/a"));
        payload.insert("prefLabel".into(), json!({"en-US": "New"}));

        let managed = ["uri", "prefLabel", "altLabels"];
        let body = merge_payload(&existing(), &payload, &managed).unwrap();

        assert_eq!(body["prefLabel"], json!({"en-US": "New"}));
        assert!(!body.contains_key("altLabels"));
        assert_eq!(body["broader"][0]["sys"]["id"], "c0");
        assert_eq!(body["sys"]["version"], 4);
    }

    #[test]
    fn test_merge_payload_keeps_unmanaged_keys() {
        let payload = RemotePayload::new();
        let body = merge_payload(&existing(), &payload, &[]).unwrap();
        assert_eq!(body["altLabels"], json!({"en-US": ["stale"]}));
    }
}
