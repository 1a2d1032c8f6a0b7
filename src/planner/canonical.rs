//! Order-independent canonical forms of property values.
//!
//! Two values that differ only in mapping key order or list element order
//! produce the same canonical string. The diff engine and the config hasher
//! both compare values through this form.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Returns a copy of `value` with mapping keys sorted and list elements
/// sorted by their canonical text, recursively.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::with_capacity(sorted.len());
            for (key, item) in sorted {
                out.insert(key.clone(), item);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut canonical: Vec<Value> = items.iter().map(canonicalize).collect();
            canonical.sort_by_cached_key(Value::to_string);
            Value::Array(canonical)
        }
        other => other.clone(),
    }
}

/// Returns the canonical textual form of `value`.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Compares two values in canonical form.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    canonical_string(a) == canonical_string(b)
}

/// Renders a value for plan output: strings bare, everything else as
/// compact canonical JSON.
#[must_use]
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => canonical_string(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mapping_key_order_is_irrelevant() {
        let a = json!({"protocol": "tcp", "ports": "22"});
        let b = json!({"ports": "22", "protocol": "tcp"});
        assert_eq!(canonical_string(&a), canonical_string(&b));
    }

    #[test]
    fn test_list_order_is_irrelevant() {
        let a = json!(["web", "prod", {"b": 1, "a": 2}]);
        let b = json!([{"a": 2, "b": 1}, "prod", "web"]);
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn test_scalars_keep_type() {
        assert!(!values_equal(&json!(10), &json!("10")));
        assert!(values_equal(&json!(true), &json!(true)));
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("s-1vcpu-1gb")), "s-1vcpu-1gb");
        assert_eq!(render_value(&json!(25)), "25");
        assert_eq!(render_value(&json!({"b": 1, "a": 2})), r#"{"a":2,"b":1}"#);
    }
}
