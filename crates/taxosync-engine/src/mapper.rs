//! Value mapping from upstream properties to the remote payload.
//!
//! Source data arrives in three locale encodings:
//!
//! | Encoding | Example |
//! |----------|---------|
//! | locale map | `{"en": "Label", "de": ["A", "B"]}` |
//! | single pair | `{"@value": "Label", "language": "en"}` |
//! | pair array | `[{"@value": "A", "language": "en"}, ...]` |
//!
//! All three are normalized into an ordered `locale -> values` list, then
//! shaped according to the property's [`ValueShape`]. Mapping never fails:
//! malformed input is omitted.

use serde_json::{Map, Value as JsonValue};
use tracing::trace;

use taxosync_core::defaults::DEFAULT_LOCALE;
use taxosync_core::{Locale, RemotePayload, ResourceKind, SourceResource};

/// How a mapped property is laid out in the remote payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// `{locale: value}`; extra values per locale are dropped.
    OnePerLocale,
    /// `{locale: value}` where the remote accepts exactly one value. Extra
    /// values in the default locale pass through as an array so validation
    /// can report them; other locales keep their first value.
    SingleValuePerLocale,
    /// `{locale: [values]}`.
    ManyPerLocale,
    /// Plain `[string]`, not locale keyed.
    StringList,
}

/// One source property and where it lands remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyMapping {
    pub source: &'static str,
    pub target: &'static str,
    pub shape: ValueShape,
}

const fn mapping(source: &'static str, target: &'static str, shape: ValueShape) -> PropertyMapping {
    PropertyMapping {
        source,
        target,
        shape,
    }
}

pub const SCHEME_PROPERTIES: &[PropertyMapping] = &[
    mapping("title", "prefLabel", ValueShape::OnePerLocale),
    mapping("description", "definition", ValueShape::SingleValuePerLocale),
];

pub const CONCEPT_PROPERTIES: &[PropertyMapping] = &[
    mapping("prefLabel", "prefLabel", ValueShape::OnePerLocale),
    mapping("altLabel", "altLabels", ValueShape::ManyPerLocale),
    mapping("hiddenLabel", "hiddenLabels", ValueShape::ManyPerLocale),
    mapping("notation", "notations", ValueShape::StringList),
    mapping("changeNote", "note", ValueShape::SingleValuePerLocale),
    mapping("definition", "definition", ValueShape::SingleValuePerLocale),
    mapping("editorialNote", "editorialNote", ValueShape::SingleValuePerLocale),
    mapping("example", "example", ValueShape::SingleValuePerLocale),
    mapping("historyNote", "historyNote", ValueShape::SingleValuePerLocale),
    mapping("scopeNote", "scopeNote", ValueShape::SingleValuePerLocale),
];

/// Property table for a resource kind.
pub fn mappings_for(kind: ResourceKind) -> &'static [PropertyMapping] {
    match kind {
        ResourceKind::ConceptScheme => SCHEME_PROPERTIES,
        ResourceKind::Concept => CONCEPT_PROPERTIES,
        ResourceKind::Other => &[],
    }
}

/// Remote keys the mapper owns for `kind` (`uri` included).
pub fn managed_keys(kind: ResourceKind) -> Vec<&'static str> {
    std::iter::once("uri")
        .chain(mappings_for(kind).iter().map(|m| m.target))
        .collect()
}

/// The locale flagged `default`, else the first configured, else `en-US`.
pub fn default_locale(locales: &[Locale]) -> &str {
    locales
        .iter()
        .find(|l| l.default)
        .or_else(|| locales.first())
        .map_or(DEFAULT_LOCALE, |l| l.code.as_str())
}

/// Map a source resource into its remote payload.
pub fn map_resource(resource: &SourceResource, locales: &[Locale]) -> RemotePayload {
    let mut payload = RemotePayload::new();
    payload.insert("uri".to_string(), JsonValue::String(resource.id.clone()));

    for prop in mappings_for(resource.kind) {
        let Some(raw) = resource.properties.get(prop.source) else {
            continue;
        };
        let value = match prop.shape {
            ValueShape::StringList => string_list(raw),
            shape => normalize(raw).and_then(|pairs| shape_locales(pairs, shape, locales)),
        };
        match value {
            Some(value) => {
                payload.insert(prop.target.to_string(), value);
            }
            None => trace!(uri = %resource.id, property = prop.source, "Property omitted"),
        }
    }
    payload
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

fn push_values(out: &mut Vec<(String, Vec<JsonValue>)>, locale: &str, value: JsonValue) {
    let values: Vec<JsonValue> = match value {
        JsonValue::Array(items) => items.into_iter().filter(|v| !is_blank(v)).collect(),
        other if is_blank(&other) => Vec::new(),
        other => vec![other],
    };
    if values.is_empty() {
        return;
    }
    match out.iter_mut().find(|(code, _)| code.as_str() == locale) {
        Some((_, existing)) => existing.extend(values),
        None => out.push((locale.to_string(), values)),
    }
}

/// Language tag of a tagged value object, if it is one.
fn tagged(obj: &Map<String, JsonValue>) -> Option<(&str, &JsonValue)> {
    let value = obj.get("@value")?;
    let language = obj
        .get("language")
        .or_else(|| obj.get("@language"))
        .and_then(JsonValue::as_str)?;
    Some((language, value))
}

/// Normalize any of the three source encodings into `[(locale, values)]`.
pub fn normalize(value: &JsonValue) -> Option<Vec<(String, Vec<JsonValue>)>> {
    let mut out = Vec::new();
    match value {
        JsonValue::Object(obj) if obj.contains_key("@value") => {
            let (language, value) = tagged(obj)?;
            push_values(&mut out, language, value.clone());
        }
        JsonValue::Object(obj) => {
            for (locale, value) in obj {
                push_values(&mut out, locale, value.clone());
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                let (language, value) = item.as_object().and_then(tagged)?;
                push_values(&mut out, language, value.clone());
            }
        }
        _ => return None,
    }
    Some(out)
}

fn shape_locales(
    pairs: Vec<(String, Vec<JsonValue>)>,
    shape: ValueShape,
    locales: &[Locale],
) -> Option<JsonValue> {
    let mut grouped: Vec<(&str, Vec<JsonValue>)> = Vec::new();
    for (code, values) in pairs {
        let Some(locale) = locales.iter().find(|l| l.code.eq_ignore_ascii_case(&code)) else {
            trace!(locale = %code, "Dropping locale not configured remotely");
            continue;
        };
        match grouped.iter_mut().find(|(c, _)| *c == locale.code) {
            Some((_, existing)) => existing.extend(values),
            None => grouped.push((locale.code.as_str(), values)),
        }
    }

    let default = default_locale(locales);
    let mut out = Map::new();
    for (code, mut values) in grouped {
        let value = match shape {
            ValueShape::OnePerLocale => values.swap_remove(0),
            ValueShape::SingleValuePerLocale if values.len() == 1 || code != default => {
                values.swap_remove(0)
            }
            ValueShape::SingleValuePerLocale | ValueShape::ManyPerLocale => {
                JsonValue::Array(values)
            }
            ValueShape::StringList => continue,
        };
        out.insert(code.to_string(), value);
    }
    (!out.is_empty()).then_some(JsonValue::Object(out))
}

fn as_plain_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Object(obj) => obj.get("@value").and_then(as_plain_string),
        _ => None,
    }
}

/// Flatten tagged values into bare strings.
fn string_list(value: &JsonValue) -> Option<JsonValue> {
    let strings: Vec<String> = match value {
        JsonValue::Array(items) => items.iter().filter_map(as_plain_string).collect(),
        other => as_plain_string(other).into_iter().collect(),
    };
    let items: Vec<JsonValue> = strings.into_iter().map(JsonValue::String).collect();
    (!items.is_empty()).then_some(JsonValue::Array(items))
}
