// Dialect-neutral constraint representation
//
// Both extractors (pgv and protovalidate) lower their annotations into this
// form; nothing downstream knows which dialect a constraint came from.

use regex::Regex;
use serde_json::Value;

/// A single field-level constraint kind with its parameters.
#[derive(Debug, Clone)]
pub enum ConstraintKind {
    Required,
    MinLen(u64),
    MaxLen(u64),
    Gte(f64),
    Lte(f64),
    Gt(f64),
    Lt(f64),
    Const(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Pattern(Regex),
    Email,
    Uuid,
    Hostname,
    Ip,
    EnumDefinedOnly,
    /// CEL expression attached to a field or message; evaluated through the
    /// `CelEvaluator` capability.
    Cel {
        id: String,
        expression: String,
        message: String,
    },
}

impl ConstraintKind {
    /// Stable identifier reported in violations and the event log.
    pub fn id(&self) -> &str {
        match self {
            ConstraintKind::Required => "required",
            ConstraintKind::MinLen(_) => "min_len",
            ConstraintKind::MaxLen(_) => "max_len",
            ConstraintKind::Gte(_) => "gte",
            ConstraintKind::Lte(_) => "lte",
            ConstraintKind::Gt(_) => "gt",
            ConstraintKind::Lt(_) => "lt",
            ConstraintKind::Const(_) => "const",
            ConstraintKind::In(_) => "in",
            ConstraintKind::NotIn(_) => "not_in",
            ConstraintKind::Pattern(_) => "pattern",
            ConstraintKind::Email => "email",
            ConstraintKind::Uuid => "uuid",
            ConstraintKind::Hostname => "hostname",
            ConstraintKind::Ip => "ip",
            ConstraintKind::EnumDefinedOnly => "enum.defined_only",
            ConstraintKind::Cel { id, .. } => {
                if id.is_empty() {
                    "cel"
                } else {
                    id
                }
            }
        }
    }
}

/// Constraint attached to one field of the message this IR describes.
#[derive(Debug, Clone)]
pub struct FieldConstraint {
    /// Field name within the owning message (nested messages carry their
    /// own IR; the engine prefixes paths while recursing).
    pub field: String,
    pub kind: ConstraintKind,
}

/// Message-level CEL constraint.
#[derive(Debug, Clone)]
pub struct MessageConstraint {
    pub id: String,
    pub expression: String,
    pub message: String,
}

/// All constraints extracted for one message type.
#[derive(Debug, Clone, Default)]
pub struct ValidationIr {
    pub type_name: String,
    pub field_constraints: Vec<FieldConstraint>,
    pub message_constraints: Vec<MessageConstraint>,
}

impl ValidationIr {
    pub fn is_empty(&self) -> bool {
        self.field_constraints.is_empty() && self.message_constraints.is_empty()
    }
}
