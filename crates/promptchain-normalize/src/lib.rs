//! JSON normalization: turns a stage's raw JSON output into the canonical
//! `{items: [...]}` envelope described in spec.md §4.2.

use promptchain_error::ParseError;
use promptchain_types::Item;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Canonical normalized output of a JSON stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedEnvelope {
    pub items: Vec<Item>,
    /// Items dropped because their canonical value hashed the same as an
    /// earlier item (spec.md §4.2 "Duplicates").
    #[serde(default)]
    pub dropped_duplicates: usize,
    /// Top-level keys from the source object, outside `items`, preserved
    /// verbatim on the envelope.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Parse raw JSON text and normalize it into the canonical envelope.
///
/// # Errors
/// Returns [`ParseError::InvalidJson`] if `raw` does not parse as JSON, or
/// [`ParseError::InvalidJsonShape`] if the parsed root is neither an array
/// nor an object carrying an `items` array.
pub fn normalize(raw: &str) -> Result<NormalizedEnvelope, ParseError> {
    let root: Value =
        serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let (elements, extra) = match root {
        Value::Array(elements) => (elements, Map::new()),
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(elements)) => (elements, map),
            Some(other) => {
                return Err(ParseError::InvalidJsonShape {
                    found: format!("object with 'items' of type {}", type_name(&other)),
                });
            }
            None => {
                return Err(ParseError::InvalidJsonShape {
                    found: "object without an 'items' array".to_string(),
                });
            }
        },
        other => {
            return Err(ParseError::InvalidJsonShape {
                found: type_name(&other).to_string(),
            });
        }
    };

    Ok(normalize_elements(elements, extra))
}

/// Normalize an already-parsed list of elements (used by the Map Scheduler
/// when `list_source` is a JSON file, per spec.md §4.5 step 2).
#[must_use]
pub fn normalize_elements(elements: Vec<Value>, extra: Map<String, Value>) -> NormalizedEnvelope {
    let mut items = Vec::with_capacity(elements.len());
    let mut seen = std::collections::HashSet::new();
    let mut dropped_duplicates = 0usize;

    for element in elements {
        let (value, mut attributes, selected_override) = match element {
            Value::Object(mut obj) => {
                let selected = match obj.remove("_selected") {
                    Some(Value::Bool(b)) => Some(b),
                    _ => None,
                };
                obj.remove("id");
                obj.remove("value");
                (Value::Object(spread_source(&obj)), obj, selected)
            }
            other => (other, Map::new(), None),
        };

        let id = canonical_item_id(&value);
        if !seen.insert(id.clone()) {
            dropped_duplicates += 1;
            continue;
        }

        attributes.remove("_selected");
        attributes.remove("id");
        attributes.remove("value");

        let mut item = Item::new(id, value);
        item._selected = selected_override.unwrap_or(true);
        item.attributes = attributes;
        items.push(item);
    }

    NormalizedEnvelope {
        items,
        dropped_duplicates,
        extra,
    }
}

/// For an object-element, `value` is the element itself (spec.md §4.2:
/// "objects spread their keys alongside value") — the full object, id and
/// _selected already stripped out by the caller for the attributes side.
fn spread_source(obj: &Map<String, Value>) -> Map<String, Value> {
    obj.clone()
}

/// `"item_" + hex(first 8 bytes of SHA-256 of canonical JSON of value)`.
///
/// Canonical JSON uses JCS (RFC 8785): sorted object keys, no insignificant
/// whitespace, UTF-8 — the same canonicalization family spec.md §4.2
/// requires, implemented via `serde_json_canonicalizer`.
#[must_use]
pub fn canonical_item_id(value: &Value) -> String {
    let canonical =
        serde_json_canonicalizer::to_vec(value).expect("serde_json::Value always canonicalizes");
    let digest = Sha256::digest(&canonical);
    format!("item_{}", hex::encode(&digest[..8]))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn array_root_becomes_items() {
        let env = normalize(r#"[1, 2, "three"]"#).unwrap();
        assert_eq!(env.items.len(), 3);
        assert_eq!(env.items[0].value, json!(1));
        assert!(env.items.iter().all(|i| i._selected));
        assert_eq!(env.dropped_duplicates, 0);
    }

    #[test]
    fn object_with_items_preserves_extra_top_level_keys() {
        let env = normalize(r#"{"items": [1, 2], "note": "hello"}"#).unwrap();
        assert_eq!(env.items.len(), 2);
        assert_eq!(env.extra.get("note"), Some(&json!("hello")));
    }

    #[test]
    fn object_without_items_is_invalid_shape() {
        let err = normalize(r#"{"foo": "bar"}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJsonShape { .. }));
    }

    #[test]
    fn non_json_is_invalid_json() {
        let err = normalize("not json at all").unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn empty_array_normalizes_to_zero_items() {
        let env = normalize("[]").unwrap();
        assert!(env.items.is_empty());
    }

    #[test]
    fn duplicate_values_are_dropped_and_counted() {
        let env = normalize(r#"[{"x": 1}, {"x": 1}, {"x": 2}]"#).unwrap();
        assert_eq!(env.items.len(), 2);
        assert_eq!(env.dropped_duplicates, 1);
    }

    #[test]
    fn selected_false_is_preserved() {
        let env = normalize(r#"[{"x": 1, "_selected": false}]"#).unwrap();
        assert!(!env.items[0]._selected);
    }

    #[test]
    fn non_boolean_selected_defaults_to_true() {
        let env = normalize(r#"[{"x": 1, "_selected": "nope"}]"#).unwrap();
        assert!(env.items[0]._selected);
    }

    #[test]
    fn ordering_is_preserved() {
        let env = normalize(r#"[{"x": 3}, {"x": 1}, {"x": 2}]"#).unwrap();
        let xs: Vec<i64> = env
            .items
            .iter()
            .map(|i| i.value["x"].as_i64().unwrap())
            .collect();
        assert_eq!(xs, vec![3, 1, 2]);
    }

    #[test]
    fn id_is_stable_regardless_of_object_key_order() {
        let a = canonical_item_id(&json!({"b": 1, "a": 2}));
        let b = canonical_item_id(&json!({"a": 2, "b": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn id_format_matches_item_prefix_and_hex_length() {
        let id = canonical_item_id(&json!({"a": 1}));
        assert!(id.starts_with("item_"));
        assert_eq!(id.len(), "item_".len() + 16); // 8 bytes -> 16 hex chars
    }

    proptest! {
        #[test]
        fn id_is_pure_function_of_value(n in 0i64..1_000_000) {
            let v = json!({"n": n});
            let id1 = canonical_item_id(&v);
            let id2 = canonical_item_id(&v);
            prop_assert_eq!(id1, id2);
        }

        #[test]
        fn reordering_list_does_not_change_ids(a in 0i64..100, b in 0i64..100) {
            prop_assume!(a != b);
            let list1 = vec![json!({"n": a}), json!({"n": b})];
            let list2 = vec![json!({"n": b}), json!({"n": a})];
            let env1 = normalize_elements(list1, Map::new());
            let env2 = normalize_elements(list2, Map::new());
            let ids1: std::collections::HashSet<_> = env1.items.iter().map(|i| i.id.clone()).collect();
            let ids2: std::collections::HashSet<_> = env2.items.iter().map(|i| i.id.clone()).collect();
            prop_assert_eq!(ids1, ids2);
        }
    }
}
