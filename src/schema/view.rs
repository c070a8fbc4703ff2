// Admin-facing JSON views of descriptors

use super::Registry;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use serde::Serialize;
use serde_json::json;

/// Service listing entry for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceView {
    pub name: String,
    pub package: String,
    pub methods: Vec<MethodView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodView {
    pub name: String,
    pub fqmn: String,
    pub rule_key: String,
    pub request_type: String,
    pub response_type: String,
    pub request_stream: bool,
    pub response_stream: bool,
}

impl Registry {
    pub fn list_services(&self) -> Vec<ServiceView> {
        let mut services: Vec<ServiceView> = self
            .pool()
            .services()
            .map(|service| {
                let mut methods: Vec<MethodView> = service
                    .methods()
                    .map(|method| MethodView {
                        name: method.name().to_string(),
                        fqmn: format!("{}/{}", service.full_name(), method.name()),
                        rule_key: format!("{}.{}", service.full_name(), method.name())
                            .to_lowercase(),
                        request_type: method.input().full_name().to_string(),
                        response_type: method.output().full_name().to_string(),
                        request_stream: method.is_client_streaming(),
                        response_stream: method.is_server_streaming(),
                    })
                    .collect();
                methods.sort_by(|a, b| a.name.cmp(&b.name));

                ServiceView {
                    name: service.full_name().to_string(),
                    package: service.parent_file().package_name().to_string(),
                    methods,
                }
            })
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        services
    }

    /// Descriptor view of a message or enum type, for `/admin/schema/{type}`.
    pub fn schema_of(&self, type_name: &str) -> Option<serde_json::Value> {
        let type_name = super::strip_leading_dot(type_name);

        if let Some(message) = self.pool().get_message_by_name(type_name) {
            return Some(describe_message(&message));
        }

        if let Some(enum_desc) = self.pool().get_enum_by_name(type_name) {
            let values: Vec<serde_json::Value> = enum_desc
                .values()
                .map(|v| json!({"name": v.name(), "number": v.number()}))
                .collect();
            return Some(json!({
                "type": "enum",
                "name": enum_desc.full_name(),
                "values": values,
            }));
        }

        None
    }
}

fn describe_message(message: &MessageDescriptor) -> serde_json::Value {
    let fields: Vec<serde_json::Value> = message.fields().map(|f| describe_field(&f)).collect();

    let oneofs: Vec<serde_json::Value> = message
        .oneofs()
        .map(|o| {
            json!({
                "name": o.name(),
                "fields": o.fields().map(|f| f.name().to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();

    json!({
        "type": "message",
        "name": message.full_name(),
        "fields": fields,
        "oneofs": oneofs,
    })
}

fn describe_field(field: &FieldDescriptor) -> serde_json::Value {
    let label = if field.is_map() {
        "map"
    } else if field.is_list() {
        "repeated"
    } else if field.containing_oneof().is_some() {
        "optional"
    } else {
        "singular"
    };

    let mut view = json!({
        "name": field.name(),
        "number": field.number(),
        "kind": kind_name(&field.kind()),
        "label": label,
    });

    match field.kind() {
        Kind::Message(m) => {
            view["type_name"] = json!(m.full_name());
        }
        Kind::Enum(e) => {
            view["type_name"] = json!(e.full_name());
        }
        _ => {}
    }

    view
}

fn kind_name(kind: &Kind) -> &'static str {
    match kind {
        Kind::Double => "double",
        Kind::Float => "float",
        Kind::Int32 => "int32",
        Kind::Int64 => "int64",
        Kind::Uint32 => "uint32",
        Kind::Uint64 => "uint64",
        Kind::Sint32 => "sint32",
        Kind::Sint64 => "sint64",
        Kind::Fixed32 => "fixed32",
        Kind::Fixed64 => "fixed64",
        Kind::Sfixed32 => "sfixed32",
        Kind::Sfixed64 => "sfixed64",
        Kind::Bool => "bool",
        Kind::String => "string",
        Kind::Bytes => "bytes",
        Kind::Message(_) => "message",
        Kind::Enum(_) => "enum",
    }
}
