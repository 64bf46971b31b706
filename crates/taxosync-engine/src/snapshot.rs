//! Per-run read model of the remote store.
//!
//! Populated once at the start of a run and updated in place with every
//! mutation response, so a resource is always read at the version the remote
//! last returned for it.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use taxosync_core::{
    logging, LinkList, Locale, RemoteResource, ResourceKind, Result, TaxonomyStore,
};

use crate::mapper;

/// Snapshot of remote schemes and concepts, keyed by URI.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    locales: Vec<Locale>,
    default_locale: String,
    schemes: BTreeMap<String, RemoteResource>,
    concepts: BTreeMap<String, RemoteResource>,
    /// Remote id -> URI key, for translating links.
    uris: HashMap<String, String>,
    /// Concept URI -> URIs of the schemes listing it when the run started.
    scheme_refs_before: BTreeMap<String, BTreeSet<String>>,
}

fn key_of(resource: &RemoteResource) -> String {
    resource.uri().unwrap_or(resource.id()).to_string()
}

impl SyncContext {
    /// Read locales, schemes and concepts from the store.
    pub async fn populate<S: TaxonomyStore + ?Sized>(store: &S) -> Result<Self> {
        let locales = store.list_locales().await?;
        let schemes = store.list_all(ResourceKind::ConceptScheme, None).await?;
        let concepts = store.list_all(ResourceKind::Concept, None).await?;
        let ctx = Self::from_parts(locales, schemes, concepts);
        info!(
            { logging::SUBSYSTEM } = "engine",
            { logging::COMPONENT } = "snapshot",
            locale_count = ctx.locales.len(),
            scheme_count = ctx.schemes.len(),
            concept_count = ctx.concepts.len(),
            default_locale = %ctx.default_locale,
            "Snapshot populated"
        );
        Ok(ctx)
    }

    pub fn from_parts(
        locales: Vec<Locale>,
        schemes: Vec<RemoteResource>,
        concepts: Vec<RemoteResource>,
    ) -> Self {
        let default_locale = mapper::default_locale(&locales).to_string();

        let mut ctx = Self {
            locales,
            default_locale,
            ..Default::default()
        };
        for concept in concepts {
            ctx.record(ResourceKind::Concept, concept);
        }
        for scheme in schemes {
            ctx.record(ResourceKind::ConceptScheme, scheme);
        }

        let mut refs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (scheme_uri, scheme) in &ctx.schemes {
            let members = scheme
                .links(LinkList::Concepts)
                .iter()
                .chain(scheme.links(LinkList::TopConcepts));
            for link in members {
                if let Some(concept_uri) = ctx.uris.get(link.id()) {
                    refs.entry(concept_uri.clone())
                        .or_default()
                        .insert(scheme_uri.clone());
                }
            }
        }
        ctx.scheme_refs_before = refs;
        ctx
    }

    pub fn locales(&self) -> &[Locale] {
        &self.locales
    }

    /// The locale flagged default, else the first configured, else `en-US`.
    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    fn map(&self, kind: ResourceKind) -> Option<&BTreeMap<String, RemoteResource>> {
        match kind {
            ResourceKind::ConceptScheme => Some(&self.schemes),
            ResourceKind::Concept => Some(&self.concepts),
            ResourceKind::Other => None,
        }
    }

    pub fn get(&self, kind: ResourceKind, uri: &str) -> Option<&RemoteResource> {
        self.map(kind)?.get(uri)
    }

    pub fn concept(&self, uri: &str) -> Option<&RemoteResource> {
        self.concepts.get(uri)
    }

    pub fn scheme(&self, uri: &str) -> Option<&RemoteResource> {
        self.schemes.get(uri)
    }

    pub fn concepts(&self) -> impl Iterator<Item = (&String, &RemoteResource)> {
        self.concepts.iter()
    }

    pub fn schemes(&self) -> impl Iterator<Item = (&String, &RemoteResource)> {
        self.schemes.iter()
    }

    pub fn concept_count(&self) -> usize {
        self.concepts.len()
    }

    pub fn scheme_count(&self) -> usize {
        self.schemes.len()
    }

    /// URI of the resource a link points at.
    pub fn uri_for_id(&self, id: &str) -> Option<&str> {
        self.uris.get(id).map(String::as_str)
    }

    pub fn id_for(&self, kind: ResourceKind, uri: &str) -> Option<&str> {
        self.get(kind, uri).map(RemoteResource::id)
    }

    /// Replace the entry for `resource` with the remote's latest response.
    pub fn record(&mut self, kind: ResourceKind, resource: RemoteResource) {
        let key = key_of(&resource);
        let map = match kind {
            ResourceKind::ConceptScheme => &mut self.schemes,
            ResourceKind::Concept => &mut self.concepts,
            ResourceKind::Other => return,
        };
        debug!(
            kind = %kind,
            uri = %key,
            resource_id = resource.id(),
            version = resource.version(),
            "Snapshot updated"
        );
        self.uris.insert(resource.id().to_string(), key.clone());
        map.insert(key, resource);
    }

    pub fn remove(&mut self, kind: ResourceKind, uri: &str) -> Option<RemoteResource> {
        let removed = match kind {
            ResourceKind::ConceptScheme => self.schemes.remove(uri),
            ResourceKind::Concept => self.concepts.remove(uri),
            ResourceKind::Other => None,
        }?;
        self.uris.remove(removed.id());
        Some(removed)
    }

    /// Schemes that listed the concept (as member or top concept) before
    /// any mutation of this run.
    pub fn schemes_referencing_before(&self, concept_uri: &str) -> Option<&BTreeSet<String>> {
        self.scheme_refs_before.get(concept_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(value: serde_json::Value) -> RemoteResource {
        serde_json::from_value(value).unwrap()
    }

    fn fixture() -> SyncContext {
        SyncContext::from_parts(
            vec![Locale::new("de-DE"), Locale::default_locale("en-US")],
            vec![resource(json!({
                "sys": {"id": "s1", "version": 2},
                "uri": "http://ex.com/s",
                "concepts": [{"sys": {"id": "c1", "type": "Link"}}],
                "topConcepts": [{"sys": {"id": "c2", "type": "Link"}}]
            }))],
            vec![
                resource(json!({"sys": {"id": "c1", "version": 1}, "uri": "http://ex.com/a"})),
                resource(json!({"sys": {"id": "c2", "version": 1}, "uri": "http://ex.com/b"})),
                resource(json!({"sys": {"id": "c3", "version": 1}, "uri": "http://ex.com/c"})),
            ],
        )
    }

    #[test]
    fn test_default_locale_prefers_flagged() {
        assert_eq!(fixture().default_locale(), "en-US");

        let first = SyncContext::from_parts(vec![Locale::new("fr-FR")], vec![], vec![]);
        assert_eq!(first.default_locale(), "fr-FR");

        let none = SyncContext::from_parts(vec![], vec![], vec![]);
        assert_eq!(none.default_locale(), "en-US");
    }

    #[test]
    fn test_lookup_by_uri_and_id() {
        let ctx = fixture();
        assert_eq!(ctx.id_for(ResourceKind::Concept, "http://ex.com/a"), Some("c1"));
        assert_eq!(ctx.uri_for_id("s1"), Some("http://ex.com/s"));
        assert!(ctx.get(ResourceKind::Other, "http://ex.com/a").is_none());
        assert_eq!(ctx.concept_count(), 3);
        assert_eq!(ctx.scheme_count(), 1);
    }

    #[test]
    fn test_pre_run_scheme_references() {
        let ctx = fixture();
        let refs = ctx.schemes_referencing_before("http://ex.com/b").unwrap();
        assert!(refs.contains("http://ex.com/s"));
        assert!(ctx.schemes_referencing_before("http://ex.com/c").is_none());
    }

    #[test]
    fn test_record_replaces_entry_and_keeps_pre_run_refs() {
        let mut ctx = fixture();
        ctx.record(
            ResourceKind::ConceptScheme,
            resource(json!({"sys": {"id": "s1", "version": 3}, "uri": "http://ex.com/s"})),
        );
        assert_eq!(ctx.scheme("http://ex.com/s").unwrap().version(), 3);
        assert!(ctx.schemes_referencing_before("http://ex.com/a").is_some());

        let removed = ctx.remove(ResourceKind::Concept, "http://ex.com/a").unwrap();
        assert_eq!(removed.id(), "c1");
        assert!(ctx.uri_for_id("c1").is_none());
    }
}
