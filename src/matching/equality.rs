// Deep structural equality between rule values and decoded requests

use serde_json::{Map, Value};

/// Resolve a rule-side key against a decoded object, tolerating the
/// snake/camel spelling difference between proto and JSON field names.
pub fn resolve_key(map: &Map<String, Value>, key: &str) -> Option<String> {
    if map.contains_key(key) {
        return Some(key.to_string());
    }

    let camel = snake_to_camel(key);
    if map.contains_key(&camel) {
        return Some(camel);
    }

    let snake = camel_to_snake(key);
    if map.contains_key(&snake) {
        return Some(snake);
    }

    None
}

/// Maps compare as unordered (every expected entry must be present and
/// equal); lists compare in order and must have equal length.
pub fn deep_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Object(actual_map), Value::Object(expected_map)) => {
            if actual_map.len() != expected_map.len() {
                return false;
            }
            expected_map.iter().all(|(key, expected_value)| {
                resolve_key(actual_map, key)
                    .and_then(|resolved| actual_map.get(&resolved))
                    .map(|actual_value| deep_equal(actual_value, expected_value))
                    .unwrap_or(false)
            })
        }
        (Value::Array(actual_items), Value::Array(expected_items)) => {
            actual_items.len() == expected_items.len()
                && actual_items
                    .iter()
                    .zip(expected_items)
                    .all(|(a, e)| deep_equal(a, e))
        }
        (Value::Number(a), Value::Number(e)) => {
            // 5 and 5.0 are the same value to a rule author
            match (a.as_f64(), e.as_f64()) {
                (Some(a), Some(e)) => a == e,
                _ => a == e,
            }
        }
        _ => actual == expected,
    }
}

pub fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

pub fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
