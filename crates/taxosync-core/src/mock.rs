//! In-memory taxonomy store for deterministic testing.
//!
//! Mirrors the remote's observable contract: URI uniqueness on create,
//! version checks on every mutation, indexed JSON-Patch semantics on link
//! lists, and `related` kept symmetric when mirroring is enabled.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use taxosync_core::mock::MockTaxonomyStore;
//!
//! let store = MockTaxonomyStore::new().with_locales(vec![Locale::default_locale("en-US")]);
//! let engine = SyncEngine::new(store.clone(), SyncConfig::default());
//! engine.sync(&request).await?;
//! assert_eq!(store.mutation_count(), 3);
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};

use crate::error::{ApiFailure, Error, RequestRecord, Result};
use crate::models::*;
use crate::traits::TaxonomyStore;

/// One recorded call against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub method: String,
    pub kind: ResourceKind,
    /// Remote id, or the URI for creates and "*" for listings.
    pub target: String,
}

impl MockCall {
    pub fn is_mutation(&self) -> bool {
        self.method != "GET"
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    method: String,
    target: String,
    status: u16,
}

#[derive(Debug, Default)]
struct MockState {
    locales: Vec<Locale>,
    schemes: Vec<RemoteResource>,
    concepts: Vec<RemoteResource>,
    next_id: u64,
    calls: Vec<MockCall>,
    failures: Vec<InjectedFailure>,
    mirror_related: bool,
}

impl MockState {
    fn resources(&self, kind: ResourceKind) -> &Vec<RemoteResource> {
        match kind {
            ResourceKind::ConceptScheme => &self.schemes,
            _ => &self.concepts,
        }
    }

    fn resources_mut(&mut self, kind: ResourceKind) -> &mut Vec<RemoteResource> {
        match kind {
            ResourceKind::ConceptScheme => &mut self.schemes,
            _ => &mut self.concepts,
        }
    }

    fn position(&self, kind: ResourceKind, id: &str) -> Option<usize> {
        self.resources(kind).iter().position(|r| r.id() == id)
    }

    fn log(&mut self, method: &str, kind: ResourceKind, target: &str) {
        self.calls.push(MockCall {
            method: method.to_string(),
            kind,
            target: target.to_string(),
        });
    }

    fn injected(&self, method: &str, targets: &[&str]) -> Option<u16> {
        self.failures
            .iter()
            .find(|f| f.method == method && targets.contains(&f.target.as_str()))
            .map(|f| f.status)
    }
}

/// Mock taxonomy store for testing.
#[derive(Clone, Default)]
pub struct MockTaxonomyStore {
    state: Arc<Mutex<MockState>>,
}

fn failure(
    method: &str,
    kind: ResourceKind,
    target: &str,
    status: u16,
    response: JsonValue,
) -> Error {
    ApiFailure {
        endpoint: format!("mock://{}/{}", kind, target),
        status,
        request: RequestRecord::new(method, [("Authorization", "Bearer mock")], None),
        response,
    }
    .into()
}

fn version_conflict(method: &str, kind: ResourceKind, id: &str) -> Error {
    failure(
        method,
        kind,
        id,
        409,
        json!({"sys": {"type": "Error", "id": "VersionMismatch"}}),
    )
}

fn not_found(method: &str, kind: ResourceKind, id: &str) -> Error {
    failure(
        method,
        kind,
        id,
        404,
        json!({"sys": {"type": "Error", "id": "NotFound"}}),
    )
}

fn sys_type(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ConceptScheme => "TaxonomyConceptScheme",
        _ => "TaxonomyConcept",
    }
}

fn build_resource(
    body: &RemotePayload,
    id: &str,
    version: u64,
    kind: ResourceKind,
) -> Result<RemoteResource> {
    let mut map = body.clone();
    map.insert(
        "sys".to_string(),
        json!({"id": id, "version": version, "type": sys_type(kind)}),
    );
    Ok(serde_json::from_value(JsonValue::Object(map))?)
}

fn apply_ops(
    resource: &RemoteResource,
    ops: &[PatchOp],
) -> std::result::Result<RemoteResource, String> {
    let mut value = serde_json::to_value(resource).map_err(|e| e.to_string())?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| "resource is not an object".to_string())?;
    for op in ops {
        let (list, index) = op
            .target()
            .ok_or_else(|| format!("invalid path {}", op.path))?;
        let entry = obj
            .entry(list.as_str())
            .or_insert_with(|| JsonValue::Array(Vec::new()));
        let items = entry
            .as_array_mut()
            .ok_or_else(|| format!("{} is not an array", list))?;
        match op.op {
            PatchAction::Remove => {
                if index >= items.len() {
                    return Err(format!("remove index {} out of bounds for {}", index, list));
                }
                items.remove(index);
            }
            PatchAction::Add => {
                if index > items.len() {
                    return Err(format!("add index {} out of bounds for {}", index, list));
                }
                let link = op
                    .value
                    .as_ref()
                    .ok_or_else(|| "add without value".to_string())?;
                items.insert(index, serde_json::to_value(link).map_err(|e| e.to_string())?);
            }
        }
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

impl MockTaxonomyStore {
    /// Create an empty store with a single `en-US` default locale.
    pub fn new() -> Self {
        let store = Self::default();
        store.state.lock().unwrap().locales = vec![Locale::default_locale("en-US")];
        store
    }

    pub fn with_locales(self, locales: Vec<Locale>) -> Self {
        self.state.lock().unwrap().locales = locales;
        self
    }

    /// Mirror `related` patches onto the counterpart concept.
    pub fn with_related_mirroring(self) -> Self {
        self.state.lock().unwrap().mirror_related = true;
        self
    }

    /// Fail every `method` call whose id or URI equals `target`.
    pub fn fail_on(&self, method: &str, target: &str, status: u16) {
        self.state.lock().unwrap().failures.push(InjectedFailure {
            method: method.to_string(),
            target: target.to_string(),
            status,
        });
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Insert a resource directly, bypassing the call log.
    pub fn seed(&self, kind: ResourceKind, payload: JsonValue) -> RemoteResource {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("{}{}", id_prefix(kind), state.next_id);
        let body = payload.as_object().cloned().unwrap_or_default();
        let resource = build_resource(&body, &id, 1, kind).unwrap();
        state.resources_mut(kind).push(resource.clone());
        resource
    }

    /// Bump a resource's version as if someone else edited it.
    pub fn touch(&self, kind: ResourceKind, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(r) = state.resources_mut(kind).iter_mut().find(|r| r.id() == id) {
            r.sys.version += 1;
        }
    }

    pub fn get_by_uri(&self, kind: ResourceKind, uri: &str) -> Option<RemoteResource> {
        let state = self.state.lock().unwrap();
        state
            .resources(kind)
            .iter()
            .find(|r| r.uri() == Some(uri))
            .cloned()
    }

    pub fn get(&self, kind: ResourceKind, id: &str) -> Option<RemoteResource> {
        let state = self.state.lock().unwrap();
        state.resources(kind).iter().find(|r| r.id() == id).cloned()
    }

    pub fn all(&self, kind: ResourceKind) -> Vec<RemoteResource> {
        self.state.lock().unwrap().resources(kind).clone()
    }

    /// URIs linked from `list` on the resource identified by `uri`, in order.
    pub fn linked_uris(&self, kind: ResourceKind, uri: &str, list: LinkList) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let Some(owner) = state.resources(kind).iter().find(|r| r.uri() == Some(uri)) else {
            return Vec::new();
        };
        owner
            .links(list)
            .iter()
            .map(|link| {
                state
                    .concepts
                    .iter()
                    .find(|c| c.id() == link.id())
                    .and_then(|c| c.uri.clone())
                    .unwrap_or_else(|| link.id().to_string())
            })
            .collect()
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear()
    }

    /// Number of create/replace/patch/delete calls.
    pub fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .count()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    fn mirror_related(state: &mut MockState, before: &[String], after: &RemoteResource) {
        let owner = after.id().to_string();
        let now: Vec<String> = after
            .link_ids(LinkList::Related)
            .iter()
            .map(|s| s.to_string())
            .collect();
        for concept in state.concepts.iter_mut() {
            let id = concept.id().to_string();
            if id == owner {
                continue;
            }
            let lists_owner = concept.related.iter().any(|l| l.id() == owner);
            if now.contains(&id) && !before.contains(&id) && !lists_owner {
                concept.related.push(Link::concept(owner.clone()));
                concept.sys.version += 1;
            } else if before.contains(&id) && !now.contains(&id) && lists_owner {
                concept.related.retain(|l| l.id() != owner);
                concept.sys.version += 1;
            }
        }
    }
}

fn id_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ConceptScheme => "s",
        _ => "c",
    }
}

#[async_trait]
impl TaxonomyStore for MockTaxonomyStore {
    async fn list_locales(&self) -> Result<Vec<Locale>> {
        let mut state = self.state.lock().unwrap();
        state.log("GET", ResourceKind::Other, "locales");
        Ok(state.locales.clone())
    }

    async fn list_all(
        &self,
        kind: ResourceKind,
        scheme_id: Option<&str>,
    ) -> Result<Vec<RemoteResource>> {
        let mut state = self.state.lock().unwrap();
        state.log("GET", kind, scheme_id.unwrap_or("*"));
        if let Some(status) = state.injected("GET", &["*"]) {
            return Err(failure("GET", kind, "*", status, json!({})));
        }
        let all = state.resources(kind).clone();
        match (kind, scheme_id) {
            (ResourceKind::Concept, Some(scheme)) => {
                let members: Vec<String> = state
                    .schemes
                    .iter()
                    .find(|s| s.id() == scheme)
                    .map(|s| s.concepts.iter().map(|l| l.id().to_string()).collect())
                    .unwrap_or_default();
                Ok(all.into_iter().filter(|c| members.iter().any(|m| m == c.id())).collect())
            }
            _ => Ok(all),
        }
    }

    async fn fetch(&self, kind: ResourceKind, id: &str) -> Result<RemoteResource> {
        let mut state = self.state.lock().unwrap();
        state.log("GET", kind, id);
        state
            .resources(kind)
            .iter()
            .find(|r| r.id() == id)
            .cloned()
            .ok_or_else(|| not_found("GET", kind, id))
    }

    async fn create(&self, kind: ResourceKind, payload: &RemotePayload) -> Result<RemoteResource> {
        let mut state = self.state.lock().unwrap();
        let uri = payload
            .get("uri")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        state.log("POST", kind, &uri);
        if let Some(status) = state.injected("POST", &[uri.as_str()]) {
            return Err(failure("POST", kind, &uri, status, json!({"message": "injected"})));
        }
        if state.resources(kind).iter().any(|r| r.uri() == Some(uri.as_str())) {
            return Err(failure(
                "POST",
                kind,
                &uri,
                422,
                json!({
                    "sys": {"type": "Error", "id": "ValidationFailed"},
                    "details": "URI already exists"
                }),
            ));
        }
        state.next_id += 1;
        let id = format!("{}{}", id_prefix(kind), state.next_id);
        let resource = build_resource(payload, &id, 1, kind)?;
        state.resources_mut(kind).push(resource.clone());
        Ok(resource)
    }

    async fn replace(
        &self,
        kind: ResourceKind,
        id: &str,
        body: &RemotePayload,
        version: u64,
    ) -> Result<RemoteResource> {
        let mut state = self.state.lock().unwrap();
        state.log("PUT", kind, id);
        let pos = state
            .position(kind, id)
            .ok_or_else(|| not_found("PUT", kind, id))?;
        let current = state.resources(kind)[pos].clone();
        if let Some(status) = state.injected("PUT", &[id, current.uri().unwrap_or_default()]) {
            return Err(failure("PUT", kind, id, status, json!({"message": "injected"})));
        }
        if current.version() != version {
            return Err(version_conflict("PUT", kind, id));
        }
        let resource = build_resource(body, id, version + 1, kind)?;
        state.resources_mut(kind)[pos] = resource.clone();
        Ok(resource)
    }

    async fn patch(
        &self,
        kind: ResourceKind,
        id: &str,
        ops: &[PatchOp],
        version: u64,
    ) -> Result<RemoteResource> {
        let mut state = self.state.lock().unwrap();
        state.log("PATCH", kind, id);
        let pos = state
            .position(kind, id)
            .ok_or_else(|| not_found("PATCH", kind, id))?;
        let current = state.resources(kind)[pos].clone();
        if let Some(status) = state.injected("PATCH", &[id, current.uri().unwrap_or_default()]) {
            return Err(failure("PATCH", kind, id, status, json!({"message": "injected"})));
        }
        if current.version() != version {
            return Err(version_conflict("PATCH", kind, id));
        }
        let mut updated = apply_ops(&current, ops).map_err(|message| {
            failure("PATCH", kind, id, 422, json!({"message": message}))
        })?;
        updated.sys.version = version + 1;
        state.resources_mut(kind)[pos] = updated.clone();

        if state.mirror_related && kind == ResourceKind::Concept {
            let before: Vec<String> = current
                .link_ids(LinkList::Related)
                .iter()
                .map(|s| s.to_string())
                .collect();
            Self::mirror_related(&mut state, &before, &updated);
        }
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, id: &str, version: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.log("DELETE", kind, id);
        let pos = state
            .position(kind, id)
            .ok_or_else(|| not_found("DELETE", kind, id))?;
        let current = state.resources(kind)[pos].clone();
        if let Some(status) = state.injected("DELETE", &[id, current.uri().unwrap_or_default()]) {
            return Err(failure("DELETE", kind, id, status, json!({"message": "injected"})));
        }
        if current.version() != version {
            return Err(version_conflict("DELETE", kind, id));
        }
        state.resources_mut(kind).remove(pos);

        // Dangling links to a deleted concept disappear from every list.
        if kind == ResourceKind::Concept {
            let strip = |links: &mut Vec<Link>| {
                let before = links.len();
                links.retain(|l| l.id() != id);
                before != links.len()
            };
            for scheme in state.schemes.iter_mut() {
                let a = strip(&mut scheme.concepts);
                let b = strip(&mut scheme.top_concepts);
                if a || b {
                    scheme.sys.version += 1;
                }
            }
            for concept in state.concepts.iter_mut() {
                let a = strip(&mut concept.broader);
                let b = strip(&mut concept.related);
                if a || b {
                    concept.sys.version += 1;
                }
            }
        }
        Ok(())
    }
}
