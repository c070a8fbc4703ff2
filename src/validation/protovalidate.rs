// Constraint extraction for the protovalidate (buf.validate) dialect
//
// Reads `(buf.validate.field)` on field options and `(buf.validate.message)`
// on message options. The rule submessages mirror pgv's, with a top-level
// `required` flag and CEL constraints on both levels.

use super::ir::{ConstraintKind, FieldConstraint, MessageConstraint, ValidationIr};
use super::options;
use prost_reflect::{DescriptorPool, DynamicMessage, Value};
use std::collections::HashMap;

const FIELD_EXTENSION: &str = "buf.validate.field";
const MESSAGE_EXTENSION: &str = "buf.validate.message";

pub fn extract(pool: &DescriptorPool) -> HashMap<String, ValidationIr> {
    let field_ext = pool.get_extension_by_name(FIELD_EXTENSION);
    let message_ext = pool.get_extension_by_name(MESSAGE_EXTENSION);
    if field_ext.is_none() && message_ext.is_none() {
        return HashMap::new();
    }

    let mut irs = HashMap::new();

    for message in pool.all_messages() {
        let mut ir = ValidationIr {
            type_name: message.full_name().to_string(),
            ..Default::default()
        };

        if let Some(ext) = &message_ext {
            let message_options = message.options();
            if message_options.has_extension(ext) {
                let extension = message_options.get_extension(ext);
                if let Value::Message(constraints) = extension.as_ref() {
                    if options::bool_field(constraints, "disabled") != Some(true) {
                        ir.message_constraints = cel_constraints(constraints)
                            .map(|(id, expression, text)| MessageConstraint {
                                id,
                                expression,
                                message: text,
                            })
                            .collect();
                    }
                }
            }
        }

        if let Some(ext) = &field_ext {
            for field in message.fields() {
                let field_options = field.options();
                if !field_options.has_extension(ext) {
                    continue;
                }
                let extension = field_options.get_extension(ext);
                let Value::Message(constraints) = extension.as_ref() else {
                    continue;
                };

                if options::bool_field(constraints, "required") == Some(true) {
                    ir.field_constraints.push(FieldConstraint {
                        field: field.name().to_string(),
                        kind: ConstraintKind::Required,
                    });
                }

                for (id, expression, text) in cel_constraints(constraints) {
                    ir.field_constraints.push(FieldConstraint {
                        field: field.name().to_string(),
                        kind: ConstraintKind::Cel {
                            id,
                            expression,
                            message: text,
                        },
                    });
                }

                for rule_field in options::rule_field_names() {
                    if let Some(rule_message) = options::sub_message(constraints, rule_field) {
                        for kind in
                            options::lower_rules(message.full_name(), rule_field, &rule_message)
                        {
                            ir.field_constraints.push(FieldConstraint {
                                field: field.name().to_string(),
                                kind,
                            });
                        }
                    }
                }
            }
        }

        if !ir.is_empty() {
            irs.insert(message.full_name().to_string(), ir);
        }
    }

    irs
}

/// True when any field or message in the pool carries a buf.validate
/// annotation; drives `VALIDATION_SOURCE=auto`.
pub fn is_present(pool: &DescriptorPool) -> bool {
    let field_ext = pool.get_extension_by_name(FIELD_EXTENSION);
    let message_ext = pool.get_extension_by_name(MESSAGE_EXTENSION);

    pool.all_messages().any(|message| {
        if let Some(ext) = &message_ext {
            if message.options().has_extension(ext) {
                return true;
            }
        }
        if let Some(ext) = &field_ext {
            return message
                .fields()
                .any(|field| field.options().has_extension(ext));
        }
        false
    })
}

/// Iterate `cel` items of a FieldConstraints/MessageConstraints message as
/// `(id, expression, message)` tuples.
fn cel_constraints(
    constraints: &DynamicMessage,
) -> impl Iterator<Item = (String, String, String)> + '_ {
    let items = match constraints.get_field_by_name("cel").as_deref() {
        Some(Value::List(items)) => items.clone(),
        _ => Vec::new(),
    };

    items.into_iter().filter_map(|item| {
        let Value::Message(constraint) = item else {
            return None;
        };
        let expression = options::string_field(&constraint, "expression")?;
        Some((
            options::string_field(&constraint, "id").unwrap_or_default(),
            expression,
            options::string_field(&constraint, "message").unwrap_or_default(),
        ))
    })
}
