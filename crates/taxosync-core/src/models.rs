//! Domain types shared by the remote client and the reconciliation engine.
//!
//! Two universes meet here: the upstream graph ([`SourceResource`], keyed by
//! URI) and the remote store ([`RemoteResource`], keyed by an opaque id and
//! carrying a version token). The `uri` field is the join key between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

/// Locale-keyed payload sent to the remote on create/replace.
pub type RemotePayload = Map<String, JsonValue>;

// =============================================================================
// RESOURCE KIND
// =============================================================================

/// Kind of a taxonomy resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ConceptScheme,
    Concept,
    /// Anything else the upstream graph carries (collections, ontology nodes).
    #[default]
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ConceptScheme => "ConceptScheme",
            ResourceKind::Concept => "Concept",
            ResourceKind::Other => "Other",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept prefixed forms such as "skos:Concept".
        let local = s
            .rsplit(|c| c == ':' || c == '#' || c == '/')
            .next()
            .unwrap_or(s);
        match local {
            "ConceptScheme" => Ok(ResourceKind::ConceptScheme),
            "Concept" => Ok(ResourceKind::Concept),
            _ => Err(format!("Unknown resource kind: {}", s)),
        }
    }
}

impl Serialize for ResourceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<JsonValue>::deserialize(deserializer)?;
        let kind = value
            .map(reference_ids)
            .unwrap_or_default()
            .iter()
            .find_map(|name| name.parse().ok())
            .unwrap_or_default();
        Ok(kind)
    }
}

// =============================================================================
// SOURCE GRAPH
// =============================================================================

/// Flatten a relation value into a list of ids.
///
/// Accepts `null`, a bare string, an object with `id`/`@id`, or an array of
/// any of those. Anything else contributes nothing.
pub fn reference_ids(value: JsonValue) -> Vec<String> {
    match value {
        JsonValue::String(id) => vec![id],
        JsonValue::Array(items) => items.into_iter().flat_map(reference_ids).collect(),
        JsonValue::Object(mut obj) => match obj.remove("id").or_else(|| obj.remove("@id")) {
            Some(JsonValue::String(id)) => vec![id],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(value.map(reference_ids).unwrap_or_default())
}

/// A node of the upstream graph, immutable for the duration of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResource {
    /// Resource URI, the stable identity key.
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub broader: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub narrower: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<String>,
    #[serde(
        rename = "inScheme",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub in_scheme: Vec<String>,
    #[serde(
        rename = "hasTopConcept",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub has_top_concept: Vec<String>,
    #[serde(
        rename = "topConceptOf",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub top_concept_of: Vec<String>,
    /// Locale-keyed data properties (prefLabel, altLabel, definition, ...).
    #[serde(flatten)]
    pub properties: Map<String, JsonValue>,
}

impl SourceResource {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn concept(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Concept, id)
    }

    pub fn scheme(id: impl Into<String>) -> Self {
        Self::new(ResourceKind::ConceptScheme, id)
    }

    /// Set a data property (builder style).
    pub fn with_property(mut self, key: &str, value: JsonValue) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }
}

/// Inbound sync document: `{ "graph": [ ... ] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    #[serde(default)]
    pub graph: Vec<SourceResource>,
}

impl SyncRequest {
    pub fn new(graph: Vec<SourceResource>) -> Self {
        Self { graph }
    }

    pub fn schemes(&self) -> impl Iterator<Item = &SourceResource> {
        self.of_kind(ResourceKind::ConceptScheme)
    }

    pub fn concepts(&self) -> impl Iterator<Item = &SourceResource> {
        self.of_kind(ResourceKind::Concept)
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &SourceResource> {
        self.graph.iter().filter(move |r| r.kind == kind)
    }

    pub fn find(&self, id: &str) -> Option<&SourceResource> {
        self.graph.iter().find(|r| r.id == id)
    }
}

// =============================================================================
// REMOTE STORE
// =============================================================================

/// Locale configured in the remote environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locale {
    pub code: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Locale {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            default: false,
            name: None,
        }
    }

    pub fn default_locale(code: impl Into<String>) -> Self {
        Self {
            default: true,
            ..Self::new(code)
        }
    }
}

/// System metadata of a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sys {
    pub id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSys {
    pub id: String,
    #[serde(rename = "type", default = "link_type_name")]
    pub kind: String,
    #[serde(rename = "linkType", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
}

fn link_type_name() -> String {
    "Link".to_string()
}

/// Reference to another remote resource by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub sys: LinkSys,
}

impl Link {
    /// Link to a taxonomy concept.
    pub fn concept(id: impl Into<String>) -> Self {
        Self {
            sys: LinkSys {
                id: id.into(),
                kind: link_type_name(),
                link_type: Some("TaxonomyConcept".to_string()),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.sys.id
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Link>, D::Error> {
    Ok(Option::<Vec<Link>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A concept or concept scheme as the remote store returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub sys: Sys,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub broader: Vec<Link>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<Link>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<Link>,
    #[serde(
        rename = "topConcepts",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub top_concepts: Vec<Link>,
    /// Every other field (prefLabel, notations, ...).
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl RemoteResource {
    pub fn id(&self) -> &str {
        &self.sys.id
    }

    pub fn version(&self) -> u64 {
        self.sys.version
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn links(&self, list: LinkList) -> &[Link] {
        match list {
            LinkList::Broader => &self.broader,
            LinkList::Related => &self.related,
            LinkList::Concepts => &self.concepts,
            LinkList::TopConcepts => &self.top_concepts,
        }
    }

    pub fn link_ids(&self, list: LinkList) -> Vec<&str> {
        self.links(list).iter().map(Link::id).collect()
    }

    /// Current value of a payload key, as it would appear in the body.
    pub fn value_of(&self, key: &str) -> Option<JsonValue> {
        match key {
            "uri" => self.uri.clone().map(JsonValue::String),
            _ => self.fields.get(key).cloned(),
        }
    }
}

/// Ordered link list carried by a remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkList {
    Broader,
    Related,
    Concepts,
    TopConcepts,
}

impl LinkList {
    /// JSON field name (and patch path segment).
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkList::Broader => "broader",
            LinkList::Related => "related",
            LinkList::Concepts => "concepts",
            LinkList::TopConcepts => "topConcepts",
        }
    }

    /// Kind of resource that owns this list.
    pub fn owner(&self) -> ResourceKind {
        match self {
            LinkList::Broader | LinkList::Related => ResourceKind::Concept,
            LinkList::Concepts | LinkList::TopConcepts => ResourceKind::ConceptScheme,
        }
    }
}

impl fmt::Display for LinkList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "broader" => Ok(LinkList::Broader),
            "related" => Ok(LinkList::Related),
            "concepts" => Ok(LinkList::Concepts),
            "topConcepts" => Ok(LinkList::TopConcepts),
            _ => Err(format!("Unknown link list: {}", s)),
        }
    }
}

// =============================================================================
// PATCH OPERATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    Add,
    Remove,
}

/// Indexed add/remove against an ordered link list (JSON-Patch subset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: PatchAction,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Link>,
}

impl PatchOp {
    pub fn add(list: LinkList, index: usize, link: Link) -> Self {
        Self {
            op: PatchAction::Add,
            path: format!("/{}/{}", list, index),
            value: Some(link),
        }
    }

    pub fn remove(list: LinkList, index: usize) -> Self {
        Self {
            op: PatchAction::Remove,
            path: format!("/{}/{}", list, index),
            value: None,
        }
    }

    /// Parse `path` back into its list and index.
    pub fn target(&self) -> Option<(LinkList, usize)> {
        let mut parts = self.path.trim_start_matches('/').splitn(2, '/');
        let list = parts.next()?.parse().ok()?;
        let index = parts.next()?.parse().ok()?;
        Some((list, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_kind_from_str() {
        assert_eq!("Concept".parse::<ResourceKind>(), Ok(ResourceKind::Concept));
        assert_eq!(
            "skos:ConceptScheme".parse::<ResourceKind>(),
            Ok(ResourceKind::ConceptScheme)
        );
        assert!("Collection".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_source_resource_accepts_relation_encodings() {
        let resource: SourceResource = serde_json::from_value(json!({
            "id": "http://ex.com/a",
            "type": "Concept",
            "broader": "http://ex.com/p",
            "related": [{"id": "http://ex.com/r1"}, "http://ex.com/r2"],
            "inScheme": null,
            "prefLabel": {"en": "A"}
        }))
        .unwrap();

        assert_eq!(resource.kind, ResourceKind::Concept);
        assert_eq!(resource.broader, vec!["http://ex.com/p"]);
        assert_eq!(resource.related, vec!["http://ex.com/r1", "http://ex.com/r2"]);
        assert!(resource.in_scheme.is_empty());
        assert_eq!(resource.properties["prefLabel"], json!({"en": "A"}));
        assert!(!resource.properties.contains_key("broader"));
    }

    #[test]
    fn test_source_resource_type_array() {
        let resource: SourceResource =
            serde_json::from_value(json!({"id": "s", "type": ["ConceptScheme"]})).unwrap();
        assert_eq!(resource.kind, ResourceKind::ConceptScheme);

        let other: SourceResource =
            serde_json::from_value(json!({"id": "o", "type": "Collection"})).unwrap();
        assert_eq!(other.kind, ResourceKind::Other);
    }

    #[test]
    fn test_sync_request_filters_by_kind() {
        let request: SyncRequest = serde_json::from_value(json!({
            "graph": [
                {"id": "s", "type": "ConceptScheme", "hasTopConcept": ["a"]},
                {"id": "a", "type": "Concept", "inScheme": "s"},
                {"id": "x", "type": "Collection"}
            ]
        }))
        .unwrap();

        assert_eq!(request.schemes().count(), 1);
        assert_eq!(request.concepts().count(), 1);
        assert_eq!(request.find("a").map(|r| r.in_scheme.clone()), Some(vec!["s".to_string()]));
    }

    #[test]
    fn test_remote_resource_null_links() {
        let resource: RemoteResource = serde_json::from_value(json!({
            "sys": {"id": "c1", "version": 3, "type": "TaxonomyConcept"},
            "uri": "http://ex.com/a",
            "broader": [{"sys": {"id": "c0", "type": "Link", "linkType": "TaxonomyConcept"}}],
            "related": null,
            "prefLabel": {"en-US": "A"}
        }))
        .unwrap();

        assert_eq!(resource.id(), "c1");
        assert_eq!(resource.version(), 3);
        assert_eq!(resource.link_ids(LinkList::Broader), vec!["c0"]);
        assert!(resource.related.is_empty());
        assert_eq!(resource.value_of("prefLabel"), Some(json!({"en-US": "A"})));
        assert_eq!(resource.value_of("uri"), Some(json!("http://ex.com/a")));
    }

    #[test]
    fn test_patch_op_serialization() {
        let add = PatchOp::add(LinkList::TopConcepts, 2, Link::concept("c9"));
        assert_eq!(
            serde_json::to_value(&add).unwrap(),
            json!({
                "op": "add",
                "path": "/topConcepts/2",
                "value": {"sys": {"id": "c9", "type": "Link", "linkType": "TaxonomyConcept"}}
            })
        );

        let remove = PatchOp::remove(LinkList::Broader, 0);
        assert_eq!(
            serde_json::to_value(&remove).unwrap(),
            json!({"op": "remove", "path": "/broader/0"})
        );
        assert_eq!(remove.target(), Some((LinkList::Broader, 0)));
    }
}
