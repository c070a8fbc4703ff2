// Shared readers for constraint option messages
//
// pgv and protovalidate attach near-identical rule submessages to field
// options; both extractors lower them through these helpers.

use super::ir::ConstraintKind;
use prost_reflect::{DynamicMessage, Value};
use regex::Regex;
use tracing::warn;

pub fn sub_message(message: &DynamicMessage, name: &str) -> Option<DynamicMessage> {
    if !message.has_field_by_name(name) {
        return None;
    }
    match message.get_field_by_name(name)?.as_ref() {
        Value::Message(m) => Some(m.clone()),
        _ => None,
    }
}

pub fn bool_field(message: &DynamicMessage, name: &str) -> Option<bool> {
    if !message.has_field_by_name(name) {
        return None;
    }
    message.get_field_by_name(name)?.as_bool()
}

pub fn u64_field(message: &DynamicMessage, name: &str) -> Option<u64> {
    if !message.has_field_by_name(name) {
        return None;
    }
    match message.get_field_by_name(name)?.as_ref() {
        Value::U32(v) => Some(*v as u64),
        Value::U64(v) => Some(*v),
        Value::I32(v) if *v >= 0 => Some(*v as u64),
        Value::I64(v) if *v >= 0 => Some(*v as u64),
        _ => None,
    }
}

pub fn f64_field(message: &DynamicMessage, name: &str) -> Option<f64> {
    if !message.has_field_by_name(name) {
        return None;
    }
    super::checks::as_f64(message.get_field_by_name(name)?.as_ref())
}

pub fn string_field(message: &DynamicMessage, name: &str) -> Option<String> {
    if !message.has_field_by_name(name) {
        return None;
    }
    message
        .get_field_by_name(name)?
        .as_str()
        .map(|s| s.to_string())
}

pub fn list_field(message: &DynamicMessage, name: &str) -> Vec<serde_json::Value> {
    if !message.has_field_by_name(name) {
        return Vec::new();
    }
    match message.get_field_by_name(name).as_deref() {
        Some(Value::List(items)) => items.iter().filter_map(json_of_scalar).collect(),
        _ => Vec::new(),
    }
}

fn json_of_scalar(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Bool(v) => Some(serde_json::json!(v)),
        Value::I32(v) => Some(serde_json::json!(v)),
        Value::I64(v) => Some(serde_json::json!(v)),
        Value::U32(v) => Some(serde_json::json!(v)),
        Value::U64(v) => Some(serde_json::json!(v)),
        Value::F32(v) => Some(serde_json::json!(v)),
        Value::F64(v) => Some(serde_json::json!(v)),
        Value::String(v) => Some(serde_json::json!(v)),
        Value::EnumNumber(v) => Some(serde_json::json!(v)),
        _ => None,
    }
}

fn const_field(message: &DynamicMessage, name: &str) -> Option<serde_json::Value> {
    if !message.has_field_by_name(name) {
        return None;
    }
    json_of_scalar(message.get_field_by_name(name)?.as_ref())
}

/// The scalar-rule submessage names shared by both dialects.
pub const SCALAR_RULE_FIELDS: [&str; 13] = [
    "float", "double", "int32", "int64", "uint32", "uint64", "sint32", "sint64", "fixed32",
    "fixed64", "sfixed32", "sfixed64", "bool",
];

/// Lower one rules submessage (StringRules, Int32Rules, ...) into kinds.
pub fn lower_rules(type_name: &str, rule_field: &str, rules: &DynamicMessage) -> Vec<ConstraintKind> {
    let mut kinds = Vec::new();

    match rule_field {
        "string" => {
            if let Some(len) = u64_field(rules, "len") {
                kinds.push(ConstraintKind::MinLen(len));
                kinds.push(ConstraintKind::MaxLen(len));
            }
            if let Some(min) = u64_field(rules, "min_len") {
                kinds.push(ConstraintKind::MinLen(min));
            }
            if let Some(max) = u64_field(rules, "max_len") {
                kinds.push(ConstraintKind::MaxLen(max));
            }
            if let Some(pattern) = string_field(rules, "pattern") {
                match Regex::new(&pattern) {
                    Ok(regex) => kinds.push(ConstraintKind::Pattern(regex)),
                    Err(err) => warn!(
                        "Ignoring unparseable pattern on {}: {}",
                        type_name, err
                    ),
                }
            }
            if bool_field(rules, "email") == Some(true) {
                kinds.push(ConstraintKind::Email);
            }
            if bool_field(rules, "uuid") == Some(true) {
                kinds.push(ConstraintKind::Uuid);
            }
            if bool_field(rules, "hostname") == Some(true) {
                kinds.push(ConstraintKind::Hostname);
            }
            if bool_field(rules, "ip") == Some(true) {
                kinds.push(ConstraintKind::Ip);
            }
            push_membership(&mut kinds, rules);
        }
        "bytes" => {
            if let Some(min) = u64_field(rules, "min_len") {
                kinds.push(ConstraintKind::MinLen(min));
            }
            if let Some(max) = u64_field(rules, "max_len") {
                kinds.push(ConstraintKind::MaxLen(max));
            }
        }
        "enum" => {
            if bool_field(rules, "defined_only") == Some(true) {
                kinds.push(ConstraintKind::EnumDefinedOnly);
            }
            push_membership(&mut kinds, rules);
        }
        "repeated" => {
            if let Some(min) = u64_field(rules, "min_items") {
                kinds.push(ConstraintKind::MinLen(min));
            }
            if let Some(max) = u64_field(rules, "max_items") {
                kinds.push(ConstraintKind::MaxLen(max));
            }
        }
        "map" => {
            if let Some(min) = u64_field(rules, "min_pairs") {
                kinds.push(ConstraintKind::MinLen(min));
            }
            if let Some(max) = u64_field(rules, "max_pairs") {
                kinds.push(ConstraintKind::MaxLen(max));
            }
        }
        name if SCALAR_RULE_FIELDS.contains(&name) => {
            if let Some(v) = f64_field(rules, "gte") {
                kinds.push(ConstraintKind::Gte(v));
            }
            if let Some(v) = f64_field(rules, "lte") {
                kinds.push(ConstraintKind::Lte(v));
            }
            if let Some(v) = f64_field(rules, "gt") {
                kinds.push(ConstraintKind::Gt(v));
            }
            if let Some(v) = f64_field(rules, "lt") {
                kinds.push(ConstraintKind::Lt(v));
            }
            push_membership(&mut kinds, rules);
        }
        _ => {}
    }

    // `const` applies uniformly across rule messages that declare it
    if let Some(value) = const_field(rules, "const") {
        kinds.push(ConstraintKind::Const(value));
    }

    kinds
}

fn push_membership(kinds: &mut Vec<ConstraintKind>, rules: &DynamicMessage) {
    let within = list_field(rules, "in");
    if !within.is_empty() {
        kinds.push(ConstraintKind::In(within));
    }
    let outside = list_field(rules, "not_in");
    if !outside.is_empty() {
        kinds.push(ConstraintKind::NotIn(outside));
    }
}

/// Rule submessage names probed on the dialects' field-rule messages.
pub fn rule_field_names() -> impl Iterator<Item = &'static str> {
    SCALAR_RULE_FIELDS
        .into_iter()
        .chain(["string", "bytes", "enum", "repeated", "map"])
}
