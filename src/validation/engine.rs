// Constraint evaluation against decoded dynamic messages

use super::cel::{CelEvaluator, CelOutcome};
use super::ir::{ConstraintKind, ValidationIr};
use super::{checks, pgv, protovalidate};
use crate::config::{ValidationMode, ValidationSource};
use crate::error::Violation;
use prost_reflect::{DescriptorPool, DynamicMessage, FieldDescriptor, Kind, ReflectMessage, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Outcome of validating one request message.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    /// Constraint ids that could not be evaluated (no CEL engine linked).
    pub unsupported: Vec<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Immutable validator built once per descriptor snapshot.
pub struct Validator {
    irs: HashMap<String, ValidationIr>,
    mode: ValidationMode,
    enabled: bool,
    evaluate_cel: bool,
    resolved_source: ValidationSource,
    cel: Arc<dyn CelEvaluator>,
}

impl Validator {
    pub fn build(
        pool: &DescriptorPool,
        source: ValidationSource,
        mode: ValidationMode,
        enabled: bool,
        message_cel_experimental: bool,
        cel: Arc<dyn CelEvaluator>,
    ) -> Self {
        let resolved_source = match source {
            ValidationSource::Auto => {
                if protovalidate::is_present(pool) {
                    ValidationSource::Protovalidate
                } else {
                    ValidationSource::Pgv
                }
            }
            explicit => explicit,
        };

        let irs = match resolved_source {
            ValidationSource::Protovalidate => protovalidate::extract(pool),
            _ => pgv::extract(pool),
        };

        debug!(
            "Validator built: source={:?}, {} constrained type(s)",
            resolved_source,
            irs.len()
        );

        Self {
            irs,
            mode,
            enabled,
            evaluate_cel: resolved_source == ValidationSource::Protovalidate
                || message_cel_experimental,
            resolved_source,
            cel,
        }
    }

    pub fn disabled() -> Self {
        Self {
            irs: HashMap::new(),
            mode: ValidationMode::PerMessage,
            enabled: false,
            evaluate_cel: false,
            resolved_source: ValidationSource::Pgv,
            cel: Arc::new(super::cel::UnsupportedCelEvaluator),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn resolved_source(&self) -> ValidationSource {
        self.resolved_source
    }

    pub fn ir_for(&self, type_name: &str) -> Option<&ValidationIr> {
        self.irs.get(type_name)
    }

    pub fn constrained_types(&self) -> usize {
        self.irs.len()
    }

    pub fn validate(&self, message: &DynamicMessage) -> ValidationReport {
        let mut report = ValidationReport::default();
        if !self.enabled {
            return report;
        }
        self.validate_message(message, "", &mut report);
        report
    }

    fn validate_message(&self, message: &DynamicMessage, prefix: &str, report: &mut ValidationReport) {
        let descriptor = message.descriptor();

        if let Some(ir) = self.irs.get(descriptor.full_name()) {
            let mut failed_paths: HashSet<String> = HashSet::new();

            for constraint in &ir.field_constraints {
                let Some(field) = descriptor.get_field_by_name(&constraint.field) else {
                    continue;
                };
                let path = format!("{}{}", prefix, constraint.field);

                // per_message stops at the first failure per leaf field but
                // keeps checking sibling fields
                if self.mode == ValidationMode::PerMessage && failed_paths.contains(&path) {
                    continue;
                }

                match self.evaluate(&constraint.kind, message, &field, report) {
                    Ok(()) => {}
                    Err(violation_message) => {
                        failed_paths.insert(path.clone());
                        report.violations.push(Violation::new(
                            path,
                            constraint.kind.id(),
                            violation_message,
                        ));
                    }
                }
            }

            if self.evaluate_cel {
                for constraint in &ir.message_constraints {
                    let json = message_json(message);
                    match self.cel.evaluate(&constraint.expression, &json) {
                        CelOutcome::Valid => {}
                        CelOutcome::Violation { message: text } => {
                            report.violations.push(Violation::new(
                                prefix.trim_end_matches('.'),
                                if constraint.id.is_empty() {
                                    "cel".to_string()
                                } else {
                                    constraint.id.clone()
                                },
                                if text.is_empty() {
                                    constraint.message.clone()
                                } else {
                                    text
                                },
                            ));
                        }
                        CelOutcome::Unsupported => {
                            report.unsupported.push(if constraint.id.is_empty() {
                                "cel".to_string()
                            } else {
                                constraint.id.clone()
                            });
                        }
                    }
                }
            }
        }

        // Recurse into populated nested messages so their own constraints
        // apply with dotted path prefixes
        for field in descriptor.fields() {
            if !message.has_field(&field) {
                continue;
            }

            if field.is_map() {
                let value_is_message = matches!(
                    field.kind(),
                    Kind::Message(entry) if matches!(
                        entry.map_entry_value_field().kind(),
                        Kind::Message(_)
                    )
                );
                if !value_is_message {
                    continue;
                }
                if let Value::Map(entries) = message.get_field(&field).as_ref() {
                    for (key, value) in entries {
                        if let Value::Message(nested) = value {
                            if skip_recursion(nested) {
                                continue;
                            }
                            let child =
                                format!("{}{}[{}].", prefix, field.name(), map_key_label(key));
                            self.validate_message(nested, &child, report);
                        }
                    }
                }
            } else if field.is_list() {
                if !matches!(field.kind(), Kind::Message(_)) {
                    continue;
                }
                if let Value::List(items) = message.get_field(&field).as_ref() {
                    for (index, item) in items.iter().enumerate() {
                        if let Value::Message(nested) = item {
                            if skip_recursion(nested) {
                                continue;
                            }
                            let child = format!("{}{}[{}].", prefix, field.name(), index);
                            self.validate_message(nested, &child, report);
                        }
                    }
                }
            } else if matches!(field.kind(), Kind::Message(_)) {
                if let Value::Message(nested) = message.get_field(&field).as_ref() {
                    if skip_recursion(nested) {
                        continue;
                    }
                    let child = format!("{}{}.", prefix, field.name());
                    self.validate_message(nested, &child, report);
                }
            }
        }
    }

    fn evaluate(
        &self,
        kind: &ConstraintKind,
        message: &DynamicMessage,
        field: &FieldDescriptor,
        report: &mut ValidationReport,
    ) -> Result<(), String> {
        if let ConstraintKind::Required = kind {
            // Unset fields and scalar defaults both fail: an explicitly
            // sent "" or 0 is no more a value than an absent field
            if !message.has_field(field) {
                return Err("value is required".to_string());
            }
            return if checks::is_default(message.get_field(field).as_ref()) {
                Err("value is required".to_string())
            } else {
                Ok(())
            };
        }

        let value = message.get_field(field);
        let value = value.as_ref();

        match kind {
            ConstraintKind::Required => unreachable!("handled above"),
            ConstraintKind::MinLen(min) => match checks::value_len(value) {
                Some(len) if len < *min => {
                    Err(format!("length must be at least {}, got {}", min, len))
                }
                _ => Ok(()),
            },
            ConstraintKind::MaxLen(max) => match checks::value_len(value) {
                Some(len) if len > *max => {
                    Err(format!("length must be at most {}, got {}", max, len))
                }
                _ => Ok(()),
            },
            ConstraintKind::Gte(bound) => compare(value, |v| v >= *bound, || {
                format!("must be greater than or equal to {}", bound)
            }),
            ConstraintKind::Lte(bound) => compare(value, |v| v <= *bound, || {
                format!("must be less than or equal to {}", bound)
            }),
            ConstraintKind::Gt(bound) => {
                compare(value, |v| v > *bound, || format!("must be greater than {}", bound))
            }
            ConstraintKind::Lt(bound) => {
                compare(value, |v| v < *bound, || format!("must be less than {}", bound))
            }
            ConstraintKind::Const(expected) => {
                if checks::equals_json(value, expected, &field.kind()) {
                    Ok(())
                } else {
                    Err(format!("must equal {}", expected))
                }
            }
            ConstraintKind::In(allowed) => {
                if allowed
                    .iter()
                    .any(|candidate| checks::equals_json(value, candidate, &field.kind()))
                {
                    Ok(())
                } else {
                    Err(format!("must be one of {}", serde_json::Value::from(allowed.clone())))
                }
            }
            ConstraintKind::NotIn(banned) => {
                if banned
                    .iter()
                    .any(|candidate| checks::equals_json(value, candidate, &field.kind()))
                {
                    Err(format!(
                        "must not be one of {}",
                        serde_json::Value::from(banned.clone())
                    ))
                } else {
                    Ok(())
                }
            }
            ConstraintKind::Pattern(regex) => string_check(value, |s| {
                // Unanchored: authors anchor explicitly with ^...$
                if regex.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("must match pattern \"{}\"", regex.as_str()))
                }
            }),
            ConstraintKind::Email => string_check(value, |s| {
                if checks::is_email(s) {
                    Ok(())
                } else {
                    Err("must be a valid email address".to_string())
                }
            }),
            ConstraintKind::Uuid => string_check(value, |s| {
                if checks::is_uuid(s) {
                    Ok(())
                } else {
                    Err("must be a valid UUID".to_string())
                }
            }),
            ConstraintKind::Hostname => string_check(value, |s| {
                if checks::is_hostname(s) {
                    Ok(())
                } else {
                    Err("must be a valid hostname".to_string())
                }
            }),
            ConstraintKind::Ip => string_check(value, |s| {
                if checks::is_ip(s) {
                    Ok(())
                } else {
                    Err("must be a valid IP address".to_string())
                }
            }),
            ConstraintKind::EnumDefinedOnly => {
                if let (Value::EnumNumber(number), Kind::Enum(descriptor)) =
                    (value, field.kind())
                {
                    if descriptor.get_value(*number).is_some() {
                        Ok(())
                    } else {
                        Err(format!("must be a defined enum value, got {}", number))
                    }
                } else {
                    Ok(())
                }
            }
            ConstraintKind::Cel {
                id,
                expression,
                message: text,
            } => {
                if !self.evaluate_cel {
                    return Ok(());
                }
                match self.cel.evaluate(expression, &reflect_to_json(value)) {
                    CelOutcome::Valid => Ok(()),
                    CelOutcome::Violation { message: detail } => Err(if detail.is_empty() {
                        text.clone()
                    } else {
                        detail
                    }),
                    CelOutcome::Unsupported => {
                        report.unsupported.push(if id.is_empty() {
                            "cel".to_string()
                        } else {
                            id.clone()
                        });
                        Ok(())
                    }
                }
            }
        }
    }
}

fn compare<F, M>(value: &Value, predicate: F, message: M) -> Result<(), String>
where
    F: Fn(f64) -> bool,
    M: Fn() -> String,
{
    match checks::as_f64(value) {
        Some(v) if !predicate(v) => Err(message()),
        _ => Ok(()),
    }
}

// Format constraints are presence-conditional: an unset proto3 string
// decodes as "", and pairing them with `required` is how authors demand a
// value. Length and range rules still see the default.
fn string_check<F>(value: &Value, check: F) -> Result<(), String>
where
    F: Fn(&str) -> Result<(), String>,
{
    match value {
        Value::String(s) if !s.is_empty() => check(s),
        _ => Ok(()),
    }
}

fn skip_recursion(message: &DynamicMessage) -> bool {
    message
        .descriptor()
        .full_name()
        .starts_with("google.protobuf.")
}

fn map_key_label(key: &prost_reflect::MapKey) -> String {
    match key {
        prost_reflect::MapKey::Bool(v) => v.to_string(),
        prost_reflect::MapKey::I32(v) => v.to_string(),
        prost_reflect::MapKey::I64(v) => v.to_string(),
        prost_reflect::MapKey::U32(v) => v.to_string(),
        prost_reflect::MapKey::U64(v) => v.to_string(),
        prost_reflect::MapKey::String(v) => v.clone(),
    }
}

fn message_json(message: &DynamicMessage) -> serde_json::Value {
    serde_json::to_value(message).unwrap_or(serde_json::Value::Null)
}

fn reflect_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(v) => serde_json::json!(v),
        Value::I32(v) => serde_json::json!(v),
        Value::I64(v) => serde_json::json!(v),
        Value::U32(v) => serde_json::json!(v),
        Value::U64(v) => serde_json::json!(v),
        Value::F32(v) => serde_json::json!(v),
        Value::F64(v) => serde_json::json!(v),
        Value::String(v) => serde_json::json!(v),
        Value::EnumNumber(v) => serde_json::json!(v),
        Value::Message(m) => message_json(m),
        Value::List(items) => {
            serde_json::Value::Array(items.iter().map(reflect_to_json).collect())
        }
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (key, item) in entries {
                map.insert(map_key_label(key), reflect_to_json(item));
            }
            serde_json::Value::Object(map)
        }
        Value::Bytes(bytes) => {
            use base64::Engine as _;
            serde_json::json!(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}
