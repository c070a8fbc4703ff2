// Constraint extraction for the protoc-gen-validate dialect
//
// Reads the `(validate.rules)` extension on field options. The extension
// descriptor is only present when the loaded protos import
// `validate/validate.proto`; without it there is nothing to extract.

use super::ir::{ConstraintKind, FieldConstraint, ValidationIr};
use super::options;
use prost_reflect::{DescriptorPool, Value};
use std::collections::HashMap;

const FIELD_RULES_EXTENSION: &str = "validate.rules";

pub fn extract(pool: &DescriptorPool) -> HashMap<String, ValidationIr> {
    let Some(rules_ext) = pool.get_extension_by_name(FIELD_RULES_EXTENSION) else {
        return HashMap::new();
    };

    let mut irs = HashMap::new();

    for message in pool.all_messages() {
        let mut ir = ValidationIr {
            type_name: message.full_name().to_string(),
            ..Default::default()
        };

        for field in message.fields() {
            let field_options = field.options();
            if !field_options.has_extension(&rules_ext) {
                continue;
            }
            let extension = field_options.get_extension(&rules_ext);
            let Value::Message(rules) = extension.as_ref() else {
                continue;
            };

            // message FieldRules { MessageRules message; oneof type {...} }
            if let Some(message_rules) = options::sub_message(rules, "message") {
                if options::bool_field(&message_rules, "required") == Some(true) {
                    ir.field_constraints.push(FieldConstraint {
                        field: field.name().to_string(),
                        kind: ConstraintKind::Required,
                    });
                }
            }

            for rule_field in options::rule_field_names() {
                if let Some(rule_message) = options::sub_message(rules, rule_field) {
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

        if !ir.is_empty() {
            irs.insert(message.full_name().to_string(), ir);
        }
    }

    irs
}
