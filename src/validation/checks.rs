// Leaf value checks shared by the constraint evaluator

use email_address::EmailAddress;
use prost_reflect::{Kind, Value};
use url::Host;

/// Length of a value for min_len/max_len: characters for strings, bytes
/// for byte fields, items for repeated fields and maps.
pub fn value_len(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => Some(s.chars().count() as u64),
        Value::Bytes(b) => Some(b.len() as u64),
        Value::List(items) => Some(items.len() as u64),
        Value::Map(entries) => Some(entries.len() as u64),
        _ => None,
    }
}

/// Numeric view of a value for range comparisons.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::I32(v) => Some(*v as f64),
        Value::I64(v) => Some(*v as f64),
        Value::U32(v) => Some(*v as f64),
        Value::U64(v) => Some(*v as f64),
        Value::F32(v) => Some(*v as f64),
        Value::F64(v) => Some(*v),
        Value::EnumNumber(v) => Some(*v as f64),
        _ => None,
    }
}

/// `required` fails on unset fields and on scalar defaults: empty strings
/// and zero numerics do not satisfy it.
pub fn is_default(value: &Value) -> bool {
    match value {
        Value::Bool(v) => !v,
        Value::I32(v) => *v == 0,
        Value::I64(v) => *v == 0,
        Value::U32(v) => *v == 0,
        Value::U64(v) => *v == 0,
        Value::F32(v) => *v == 0.0,
        Value::F64(v) => *v == 0.0,
        Value::String(s) => s.is_empty(),
        Value::Bytes(b) => b.is_empty(),
        Value::EnumNumber(v) => *v == 0,
        Value::List(items) => items.is_empty(),
        Value::Map(entries) => entries.is_empty(),
        Value::Message(_) => false,
    }
}

/// Exact equality between a decoded field value and a rule-supplied JSON
/// constant. Enum fields accept either the value name or its number.
pub fn equals_json(value: &Value, expected: &serde_json::Value, kind: &Kind) -> bool {
    match value {
        Value::String(s) => expected.as_str() == Some(s.as_str()),
        Value::Bool(b) => expected.as_bool() == Some(*b),
        Value::Bytes(bytes) => expected
            .as_str()
            .map(|s| s.as_bytes() == bytes.as_ref())
            .unwrap_or(false),
        Value::EnumNumber(number) => {
            if let Some(n) = expected.as_i64() {
                return n == *number as i64;
            }
            if let (Some(name), Kind::Enum(desc)) = (expected.as_str(), kind) {
                return desc
                    .get_value_by_name(name)
                    .map(|v| v.number() == *number)
                    .unwrap_or(false);
            }
            false
        }
        _ => match (as_f64(value), expected.as_f64()) {
            (Some(actual), Some(wanted)) => actual == wanted,
            _ => false,
        },
    }
}

pub fn is_email(value: &str) -> bool {
    EmailAddress::is_valid(value)
}

pub fn is_uuid(value: &str) -> bool {
    uuid::Uuid::parse_str(value).is_ok()
}

pub fn is_ip(value: &str) -> bool {
    value.parse::<std::net::IpAddr>().is_ok()
}

/// Hostnames must parse as a DNS domain, not an IP literal.
pub fn is_hostname(value: &str) -> bool {
    !value.is_empty() && matches!(Host::parse(value), Ok(Host::Domain(_)))
}
