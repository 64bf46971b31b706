//! Pre-flight checks against the remote's capacity and shape limits.
//!
//! Every violation is collected; nothing here talks to the remote. The
//! orchestrator aborts the run before the first mutation when the list is
//! non-empty.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use taxosync_core::defaults::{
    MAX_CONCEPTS, MAX_CONCEPTS_PER_SCHEME, MAX_CONCEPT_SCHEMES, MAX_LABELS_PER_LOCALE,
    MAX_LABEL_LENGTH, MAX_RELATIONS, MAX_URI_LENGTH,
};
use taxosync_core::{logging, RemotePayload, ResourceKind, SourceResource, SyncRequest};

use crate::mapper::{map_resource, mappings_for, ValueShape};
use crate::snapshot::SyncContext;

/// Validate `request` against the snapshot, returning every violation.
pub fn validate(request: &SyncRequest, ctx: &SyncContext) -> Vec<String> {
    let mut errors = Vec::new();
    if request.graph.is_empty() {
        return errors;
    }

    validate_scheme_counts(request, ctx, &mut errors);
    validate_concept_counts(request, ctx, &mut errors);
    validate_scheme_sizes(request, &mut errors);
    validate_resources(request, ctx, &mut errors);
    validate_notations(request, ctx, &mut errors);

    if errors.is_empty() {
        debug!(
            { logging::SUBSYSTEM } = "engine",
            { logging::COMPONENT } = "validator",
            item_count = request.graph.len(),
            "Payload valid"
        );
    } else {
        warn!(
            { logging::SUBSYSTEM } = "engine",
            { logging::COMPONENT } = "validator",
            error_count = errors.len(),
            "Payload rejected"
        );
    }
    errors
}

fn distinct_ids<'a>(resources: impl Iterator<Item = &'a SourceResource>) -> BTreeSet<&'a str> {
    resources.map(|r| r.id.as_str()).collect()
}

pub fn validate_scheme_counts(request: &SyncRequest, ctx: &SyncContext, errors: &mut Vec<String>) {
    let payload = distinct_ids(request.schemes());
    let new = payload.iter().filter(|uri| ctx.scheme(uri).is_none()).count();
    let existing = ctx.scheme_count();
    if payload.len() > MAX_CONCEPT_SCHEMES {
        errors.push(format!(
            "Maximum {} concept scheme allowed in Contentful. Payload contains {}.",
            MAX_CONCEPT_SCHEMES,
            payload.len()
        ));
    }
    if new + existing > MAX_CONCEPT_SCHEMES {
        errors.push(format!(
            "Maximum {} concept scheme allowed in Contentful. Payload adds {} new concept schemes but there are already {} concept schemes in Contentful.",
            MAX_CONCEPT_SCHEMES, new, existing
        ));
    }
}

pub fn validate_concept_counts(request: &SyncRequest, ctx: &SyncContext, errors: &mut Vec<String>) {
    let payload = distinct_ids(request.concepts());
    let new = payload.iter().filter(|uri| ctx.concept(uri).is_none()).count();
    let existing = ctx.concept_count();
    if payload.len() > MAX_CONCEPTS {
        errors.push(format!(
            "Maximum {} concepts allowed in Contentful. Payload contains {}.",
            MAX_CONCEPTS,
            payload.len()
        ));
    }
    if new + existing > MAX_CONCEPTS {
        errors.push(format!(
            "Maximum {} concepts allowed in Contentful. Payload adds {} new concepts but there are already {} concepts in Contentful.",
            MAX_CONCEPTS, new, existing
        ));
    }
}

/// Payload concepts belonging to `scheme` through `inScheme`, `topConceptOf`
/// or the scheme's own `hasTopConcept`.
pub(crate) fn scheme_members<'a>(
    request: &'a SyncRequest,
    scheme: &SourceResource,
) -> BTreeSet<&'a str> {
    request
        .concepts()
        .filter(|c| {
            c.in_scheme.contains(&scheme.id)
                || c.top_concept_of.contains(&scheme.id)
                || scheme.has_top_concept.contains(&c.id)
        })
        .map(|c| c.id.as_str())
        .collect()
}

pub fn validate_scheme_sizes(request: &SyncRequest, errors: &mut Vec<String>) {
    for scheme in request.schemes() {
        let count = scheme_members(request, scheme).len();
        if count > MAX_CONCEPTS_PER_SCHEME {
            errors.push(format!(
                "Maximum {} concepts allowed per concept scheme. Concept scheme with uri '{}' has {} concepts, {} more than allowed.",
                MAX_CONCEPTS_PER_SCHEME,
                scheme.id,
                count,
                count - MAX_CONCEPTS_PER_SCHEME
            ));
        }
    }
}

fn noun(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::ConceptScheme => "concept scheme",
        _ => "concept",
    }
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn as_values(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn as_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn validate_resources(request: &SyncRequest, ctx: &SyncContext, errors: &mut Vec<String>) {
    for resource in &request.graph {
        if resource.kind == ResourceKind::Other {
            continue;
        }
        let payload = map_resource(resource, ctx.locales());
        validate_resource(resource, &payload, ctx.default_locale(), errors);
    }
}

fn validate_resource(
    resource: &SourceResource,
    payload: &RemotePayload,
    default_locale: &str,
    errors: &mut Vec<String>,
) {
    let uri = &resource.id;
    let noun = noun(resource.kind);

    if char_len(uri) > MAX_URI_LENGTH {
        errors.push(format!(
            "URI '{}' is too long. Max length is {}.",
            uri, MAX_URI_LENGTH
        ));
    }

    let pref_labels = payload.get("prefLabel").and_then(JsonValue::as_object);
    let has_default = pref_labels
        .and_then(|labels| labels.get(default_locale))
        .is_some_and(|v| !as_text(v).trim().is_empty());
    if !has_default {
        errors.push(format!(
            "'prefLabel' is missing for {} with uri '{}' in locale {}.",
            noun, uri, default_locale
        ));
    }
    for (locale, label) in pref_labels.into_iter().flatten() {
        if char_len(&as_text(label)) > MAX_LABEL_LENGTH {
            errors.push(format!(
                "'prefLabel' for {} '{}' in locale {} is too long. Max length is {}.",
                noun, uri, locale, MAX_LABEL_LENGTH
            ));
        }
    }

    for key in ["altLabels", "hiddenLabels"] {
        let Some(by_locale) = payload.get(key).and_then(JsonValue::as_object) else {
            continue;
        };
        for (locale, values) in by_locale {
            let values = as_values(values);
            for value in &values {
                let text = as_text(value);
                if char_len(&text) > MAX_LABEL_LENGTH {
                    errors.push(format!(
                        "'{}' value '{}' for {} with uri '{}' is too long. Max length is {}.",
                        key, text, noun, uri, MAX_LABEL_LENGTH
                    ));
                }
            }
            if values.len() > MAX_LABELS_PER_LOCALE {
                errors.push(format!(
                    "'{}' for {} with uri '{}' has {} values in locale {}. Max {} allowed.",
                    key,
                    noun,
                    uri,
                    values.len(),
                    locale,
                    MAX_LABELS_PER_LOCALE
                ));
            }
        }
    }

    if let Some(notations) = payload.get("notations").and_then(JsonValue::as_array) {
        for value in notations {
            let text = as_text(value);
            if char_len(&text) > MAX_LABEL_LENGTH {
                errors.push(format!(
                    "'notations' value '{}' for {} with uri '{}' is too long. Max length is {}.",
                    text, noun, uri, MAX_LABEL_LENGTH
                ));
            }
        }
        if notations.len() > MAX_LABELS_PER_LOCALE {
            errors.push(format!(
                "'notations' for {} with uri '{}' has {} values. Max {} allowed.",
                noun,
                uri,
                notations.len(),
                MAX_LABELS_PER_LOCALE
            ));
        }
    }

    for (name, targets) in [("broader", &resource.broader), ("related", &resource.related)] {
        let count = targets.iter().collect::<BTreeSet<_>>().len();
        if count > MAX_RELATIONS {
            errors.push(format!(
                "'{}' for {} with uri '{}' has {} values. Max {} allowed.",
                name, noun, uri, count, MAX_RELATIONS
            ));
        }
    }

    for mapping in mappings_for(resource.kind) {
        if mapping.shape != ValueShape::SingleValuePerLocale {
            continue;
        }
        let too_many = payload
            .get(mapping.target)
            .and_then(|by_locale| by_locale.get(default_locale))
            .and_then(JsonValue::as_array)
            .is_some_and(|items| items.len() > 1);
        if too_many {
            errors.push(format!(
                "Too many '{}' for {} with uri '{}' only 1 value allowed.",
                mapping.target, noun, uri
            ));
        }
    }
}

fn notations_of(value: Option<&JsonValue>) -> Vec<String> {
    let mut seen = Vec::new();
    for item in value.and_then(JsonValue::as_array).into_iter().flatten() {
        let text = as_text(item);
        if !seen.contains(&text) {
            seen.push(text);
        }
    }
    seen
}

/// A notation may appear on one concept only, across the payload and the
/// remote concepts the payload does not carry.
pub fn validate_notations(request: &SyncRequest, ctx: &SyncContext, errors: &mut Vec<String>) {
    let payload: Vec<(&str, Vec<String>)> = request
        .concepts()
        .map(|c| {
            let mapped = map_resource(c, ctx.locales());
            (c.id.as_str(), notations_of(mapped.get("notations")))
        })
        .collect();
    let payload_ids: BTreeSet<&str> = payload.iter().map(|(uri, _)| *uri).collect();
    let remote: Vec<(&str, Vec<String>)> = ctx
        .concepts()
        .filter(|(uri, _)| !payload_ids.contains(uri.as_str()))
        .map(|(uri, concept)| (uri.as_str(), notations_of(concept.fields.get("notations"))))
        .collect();

    for (index, (uri, notations)) in payload.iter().enumerate() {
        for notation in notations {
            let others = payload
                .iter()
                .enumerate()
                .filter(|(other, (other_uri, _))| *other != index && other_uri != uri)
                .map(|(_, entry)| entry)
                .chain(remote.iter());
            for (other_uri, other_notations) in others {
                if other_notations.contains(notation) {
                    errors.push(format!(
                        "Notation value '{}' for concept with uri '{}' is already used in concept with uri '{}'.",
                        notation, uri, other_uri
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taxosync_core::{Locale, RemoteResource};

    fn ctx() -> SyncContext {
        SyncContext::from_parts(
            vec![Locale::new("en"), Locale::default_locale("en-US")],
            vec![],
            vec![],
        )
    }

    fn ctx_with(schemes: usize, concepts: Vec<RemoteResource>) -> SyncContext {
        let schemes: Vec<RemoteResource> = (0..schemes)
            .map(|i| {
                serde_json::from_value(json!({
                    "sys": {"id": format!("s{}", i)},
                    "uri": format!("a{}", i)
                }))
                .unwrap()
            })
            .collect();
        SyncContext::from_parts(
            vec![Locale::new("en"), Locale::default_locale("en-US")],
            schemes,
            concepts,
        )
    }

    fn concept(uri: &str, label: &str) -> SourceResource {
        SourceResource::concept(uri).with_property("prefLabel", json!({"en-US": label}))
    }

    fn long(n: usize) -> String {
        "x".repeat(n)
    }

    fn schemes(n: usize) -> SyncRequest {
        SyncRequest::new(
            (0..n)
                .map(|i| {
                    SourceResource::scheme(format!("b{}", i))
                        .with_property("title", json!({"en-US": "T"}))
                })
                .collect(),
        )
    }

    #[test]
    fn test_empty_graph_is_valid() {
        assert!(validate(&SyncRequest::default(), &ctx()).is_empty());
    }

    #[test]
    fn test_scheme_limit_happy_path() {
        assert!(validate(&schemes(10), &ctx_with(10, vec![])).is_empty());
    }

    #[test]
    fn test_scheme_limit_payload_over_limit() {
        let errors = validate(&schemes(21), &ctx_with(10, vec![]));
        assert_eq!(
            errors,
            vec![
                "Maximum 20 concept scheme allowed in Contentful. Payload contains 21.".to_string(),
                "Maximum 20 concept scheme allowed in Contentful. Payload adds 21 new concept schemes but there are already 10 concept schemes in Contentful.".to_string(),
            ]
        );
    }

    #[test]
    fn test_scheme_limit_payload_plus_existing() {
        let errors = validate(&schemes(11), &ctx_with(10, vec![]));
        assert_eq!(
            errors,
            vec![
                "Maximum 20 concept scheme allowed in Contentful. Payload adds 11 new concept schemes but there are already 10 concept schemes in Contentful.".to_string()
            ]
        );
    }

    #[test]
    fn test_existing_schemes_are_not_new() {
        let mut request = schemes(11);
        for (i, scheme) in request.graph.iter_mut().enumerate() {
            scheme.id = format!("a{}", i);
        }
        assert!(validate(&request, &ctx_with(15, vec![])).is_empty());
    }

    #[test]
    fn test_scheme_with_title_and_extra_properties() {
        let request = SyncRequest::new(vec![SourceResource::scheme(long(500))
            .with_property("title", json!({"en-US": "Test 1"}))
            .with_property("description", json!({"en-US": "Test description"}))
            .with_property("prefLabel", json!({"en-us": "ignored"}))
            .with_property("revisionNo", json!(4))]);
        assert!(validate(&request, &ctx()).is_empty());
    }

    #[test]
    fn test_uri_too_long() {
        let uri = long(501);
        let errors = validate(&SyncRequest::new(vec![concept(&uri, "A")]), &ctx());
        assert_eq!(errors, vec![format!("URI '{}' is too long. Max length is 500.", uri)]);
    }

    #[test]
    fn test_pref_label_required() {
        let errors = validate(&SyncRequest::new(vec![SourceResource::concept("a")]), &ctx());
        assert_eq!(
            errors,
            vec!["'prefLabel' is missing for concept with uri 'a' in locale en-US.".to_string()]
        );
    }

    #[test]
    fn test_pref_label_length() {
        let errors = validate(&SyncRequest::new(vec![concept("a", &long(257))]), &ctx());
        assert_eq!(
            errors,
            vec![
                "'prefLabel' for concept 'a' in locale en-US is too long. Max length is 256.".to_string()
            ]
        );
        assert!(validate(&SyncRequest::new(vec![concept("a", &long(256))]), &ctx()).is_empty());
    }

    #[test]
    fn test_label_and_notation_lengths() {
        let alt = long(257);
        let hidden = long(258);
        let notation = long(259);
        let request = SyncRequest::new(vec![concept("a", "A")
            .with_property("altLabel", json!({"en-US": alt}))
            .with_property("hiddenLabel", json!({"en-us": hidden}))
            .with_property("notation", json!([notation]))]);

        let errors = validate(&request, &ctx());
        assert_eq!(
            errors,
            vec![
                format!(
                    "'altLabels' value '{}' for concept with uri 'a' is too long. Max length is 256.",
                    alt
                ),
                format!(
                    "'hiddenLabels' value '{}' for concept with uri 'a' is too long. Max length is 256.",
                    hidden
                ),
                format!(
                    "'notations' value '{}' for concept with uri 'a' is too long. Max length is 256.",
                    notation
                ),
            ]
        );
    }

    #[test]
    fn test_label_count_per_locale() {
        let labels: Vec<String> = (0..21).map(|i| format!("alt {}", i)).collect();
        let request = SyncRequest::new(vec![
            concept("a", "A").with_property("altLabel", json!({"en-US": labels}))
        ]);
        assert_eq!(
            validate(&request, &ctx()),
            vec![
                "'altLabels' for concept with uri 'a' has 21 values in locale en-US. Max 20 allowed.".to_string()
            ]
        );
    }

    #[test]
    fn test_relation_count() {
        let mut resource = concept("a", "A");
        resource.broader = (0..6).map(|i| format!("p{}", i)).collect();
        assert_eq!(
            validate(&SyncRequest::new(vec![resource]), &ctx()),
            vec!["'broader' for concept with uri 'a' has 6 values. Max 5 allowed.".to_string()]
        );
    }

    #[test]
    fn test_single_value_properties() {
        let two = |name: &str| json!({"en-us": [format!("{} 1", name), format!("{} 2", name)]});
        let request = SyncRequest::new(vec![concept("a", "A")
            .with_property("example", two("example"))
            .with_property("editorialNote", two("editorial"))
            .with_property("scopeNote", two("scope"))
            .with_property("historyNote", two("history"))
            .with_property("changeNote", two("change"))]);

        assert_eq!(
            validate(&request, &ctx()),
            vec![
                "Too many 'note' for concept with uri 'a' only 1 value allowed.".to_string(),
                "Too many 'editorialNote' for concept with uri 'a' only 1 value allowed.".to_string(),
                "Too many 'example' for concept with uri 'a' only 1 value allowed.".to_string(),
                "Too many 'historyNote' for concept with uri 'a' only 1 value allowed.".to_string(),
                "Too many 'scopeNote' for concept with uri 'a' only 1 value allowed.".to_string(),
            ]
        );

        let single = SyncRequest::new(vec![
            concept("a", "A").with_property("example", json!({"en-us": "one"}))
        ]);
        assert!(validate(&single, &ctx()).is_empty());
    }

    #[test]
    fn test_single_value_properties_checked_in_default_locale_only() {
        let request = SyncRequest::new(vec![concept("a", "A")
            .with_property("scopeNote", json!({"en-US": "one", "de": ["eins", "zwei"]}))]);
        let ctx = SyncContext::from_parts(
            vec![Locale::default_locale("en-US"), Locale::new("de")],
            vec![],
            vec![],
        );
        assert!(validate(&request, &ctx).is_empty());
    }

    fn concepts(n: usize) -> SyncRequest {
        SyncRequest::new((0..n).map(|i| concept(&format!("b{}", i), "B")).collect())
    }

    fn existing_concepts(n: usize) -> Vec<RemoteResource> {
        (0..n)
            .map(|i| {
                serde_json::from_value(json!({
                    "sys": {"id": format!("c{}", i)},
                    "uri": format!("e{}", i)
                }))
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_concept_limit_happy_path() {
        assert!(validate(&concepts(3000), &ctx_with(0, existing_concepts(3000))).is_empty());
    }

    #[test]
    fn test_concept_limit_payload_over_limit() {
        let errors = validate(&concepts(6001), &ctx_with(0, existing_concepts(10)));
        assert_eq!(
            errors,
            vec![
                "Maximum 6000 concepts allowed in Contentful. Payload contains 6001.".to_string(),
                "Maximum 6000 concepts allowed in Contentful. Payload adds 6001 new concepts but there are already 10 concepts in Contentful.".to_string(),
            ]
        );
    }

    #[test]
    fn test_concept_limit_payload_plus_existing() {
        let errors = validate(&concepts(11), &ctx_with(0, existing_concepts(5990)));
        assert_eq!(
            errors,
            vec![
                "Maximum 6000 concepts allowed in Contentful. Payload adds 11 new concepts but there are already 5990 concepts in Contentful.".to_string()
            ]
        );
    }

    #[test]
    fn test_existing_concepts_are_not_new() {
        let mut request = concepts(11);
        for (i, concept) in request.graph.iter_mut().enumerate() {
            concept.id = format!("e{}", i);
        }
        assert!(validate(&request, &ctx_with(0, existing_concepts(5995))).is_empty());
    }

    #[test]
    fn test_notation_unique_within_payload() {
        let request = SyncRequest::new(vec![
            concept("a", "A").with_property("notation", json!(["notation1"])),
            concept("b", "B").with_property("notation", json!(["notation2", "notation1"])),
        ]);
        assert_eq!(
            validate(&request, &ctx()),
            vec![
                "Notation value 'notation1' for concept with uri 'a' is already used in concept with uri 'b'.".to_string(),
                "Notation value 'notation1' for concept with uri 'b' is already used in concept with uri 'a'.".to_string(),
            ]
        );
    }

    #[test]
    fn test_notation_unique_against_remote() {
        let remote = serde_json::from_value(json!({
            "sys": {"id": "c9"}, "uri": "x", "notations": ["notation1"]
        }))
        .unwrap();
        let request = SyncRequest::new(vec![
            concept("a", "A").with_property("notation", json!(["notation1"]))
        ]);
        assert_eq!(
            validate(&request, &ctx_with(0, vec![remote])),
            vec![
                "Notation value 'notation1' for concept with uri 'a' is already used in concept with uri 'x'.".to_string()
            ]
        );
    }

    #[test]
    fn test_remote_copy_of_payload_concept_not_a_duplicate() {
        let remote = serde_json::from_value(json!({
            "sys": {"id": "c1"}, "uri": "a", "notations": ["notation1"]
        }))
        .unwrap();
        let request = SyncRequest::new(vec![
            concept("a", "A").with_property("notation", json!(["notation1"]))
        ]);
        assert!(validate(&request, &ctx_with(0, vec![remote])).is_empty());
    }

    #[test]
    fn test_per_scheme_overflow() {
        let mut graph =
            vec![SourceResource::scheme("s").with_property("title", json!({"en-US": "S"}))];
        for i in 0..(MAX_CONCEPTS_PER_SCHEME + 3) {
            let mut c = concept(&format!("c{}", i), "C");
            c.in_scheme = vec!["s".to_string()];
            graph.push(c);
        }
        assert_eq!(
            validate(&SyncRequest::new(graph), &ctx()),
            vec![
                "Maximum 2000 concepts allowed per concept scheme. Concept scheme with uri 's' has 2003 concepts, 3 more than allowed.".to_string()
            ]
        );
    }
}
