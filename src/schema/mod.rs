// Schema registry: descriptor snapshot with dynamic encode/decode

pub mod loader;
pub mod view;

pub use loader::{LoadedSchemas, ProtoFileReport, ProtoFileStatus};

use crate::error::RpcError;
use once_cell::sync::Lazy;
use prost::Message;
use prost_reflect::{
    DescriptorPool, DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions,
};
use serde::Serialize;
use std::collections::HashMap;

static DESERIALIZE_OPTIONS: Lazy<DeserializeOptions> =
    Lazy::new(|| DeserializeOptions::new().deny_unknown_fields(false));

// Defaults are emitted and proto field names are used so that rule authors
// see the same spelling in requests and responses.
static SERIALIZE_OPTIONS: Lazy<SerializeOptions> = Lazy::new(|| {
    SerializeOptions::new()
        .skip_default_fields(false)
        .use_proto_field_name(true)
});

/// One RPC method of the snapshot, indexed by fully-qualified method name.
#[derive(Debug, Clone, Serialize)]
pub struct MethodSpec {
    /// `package.Service/Method`
    pub fqmn: String,
    /// lower-cased `package.service.method`
    pub rule_key: String,
    pub service: String,
    pub method: String,
    pub request_type: String,
    pub response_type: String,
    pub request_stream: bool,
    pub response_stream: bool,
}

/// Immutable descriptor snapshot. Built on every (re)load, never mutated.
pub struct Registry {
    pool: DescriptorPool,
    methods: HashMap<String, MethodSpec>,
    reports: Vec<ProtoFileReport>,
}

impl Registry {
    pub fn from_loaded(loaded: LoadedSchemas) -> Self {
        let mut methods = HashMap::new();

        for service in loaded.pool.services() {
            for method in service.methods() {
                let fqmn = format!("{}/{}", service.full_name(), method.name());
                let spec = MethodSpec {
                    fqmn: fqmn.clone(),
                    rule_key: format!("{}.{}", service.full_name(), method.name())
                        .to_lowercase(),
                    service: service.full_name().to_string(),
                    method: method.name().to_string(),
                    request_type: method.input().full_name().to_string(),
                    response_type: method.output().full_name().to_string(),
                    request_stream: method.is_client_streaming(),
                    response_stream: method.is_server_streaming(),
                };
                methods.insert(fqmn, spec);
            }
        }

        Self {
            pool: loaded.pool,
            methods,
            reports: loaded.reports,
        }
    }

    pub fn empty() -> Self {
        Self {
            pool: DescriptorPool::new(),
            methods: HashMap::new(),
            reports: Vec::new(),
        }
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn reports(&self) -> &[ProtoFileReport] {
        &self.reports
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSpec> {
        self.methods.values()
    }

    /// Look up `package.Service/Method`. A leading dot is tolerated.
    pub fn lookup_method(&self, fqmn: &str) -> Result<&MethodSpec, RpcError> {
        let fqmn = strip_leading_dot(fqmn);
        self.methods
            .get(fqmn)
            .ok_or_else(|| RpcError::MethodUnknown(fqmn.to_string()))
    }

    pub fn message_descriptor(&self, type_name: &str) -> Result<MessageDescriptor, RpcError> {
        let type_name = strip_leading_dot(type_name);
        self.pool
            .get_message_by_name(type_name)
            .ok_or_else(|| RpcError::Internal(format!("message type not found: {}", type_name)))
    }

    /// Decode protobuf wire bytes into a dynamic message.
    pub fn decode_proto(&self, type_name: &str, bytes: &[u8]) -> Result<DynamicMessage, RpcError> {
        let desc = self.message_descriptor(type_name)?;
        DynamicMessage::decode(desc, bytes).map_err(|e| RpcError::DecodeError(e.to_string()))
    }

    /// Decode a JSON document into a dynamic message. Unknown fields are
    /// tolerated; enum values accept either name or number.
    pub fn decode_json(&self, type_name: &str, bytes: &[u8]) -> Result<DynamicMessage, RpcError> {
        let desc = self.message_descriptor(type_name)?;
        let mut deserializer = serde_json::Deserializer::from_slice(bytes);
        let message =
            DynamicMessage::deserialize_with_options(desc, &mut deserializer, &DESERIALIZE_OPTIONS)
                .map_err(|e| RpcError::DecodeError(e.to_string()))?;
        deserializer
            .end()
            .map_err(|e| RpcError::DecodeError(e.to_string()))?;
        Ok(message)
    }

    /// Decode an already-parsed JSON value into a dynamic message. Rule
    /// bodies enter the encoders through here.
    pub fn decode_json_value(
        &self,
        type_name: &str,
        value: &serde_json::Value,
    ) -> Result<DynamicMessage, RpcError> {
        let desc = self.message_descriptor(type_name)?;
        DynamicMessage::deserialize_with_options(desc, value.clone(), &DESERIALIZE_OPTIONS)
            .map_err(|e| RpcError::DecodeError(e.to_string()))
    }

    /// Encode a rule body (JSON object) as the given type, to wire bytes.
    pub fn encode_proto(
        &self,
        type_name: &str,
        value: &serde_json::Value,
    ) -> Result<Vec<u8>, RpcError> {
        let message = self
            .decode_json_value(type_name, value)
            .map_err(as_encode_error)?;
        Ok(message.encode_to_vec())
    }

    /// Encode a rule body (JSON object) as the given type, to canonical JSON.
    /// Round-tripping through the descriptor fills defaults and rejects
    /// bodies that do not fit the declared response type.
    pub fn encode_json(
        &self,
        type_name: &str,
        value: &serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let message = self
            .decode_json_value(type_name, value)
            .map_err(as_encode_error)?;
        self.message_to_json(&message)
    }

    /// Canonical JSON form of a dynamic message (defaults included, proto
    /// field names, enum names).
    pub fn message_to_json(&self, message: &DynamicMessage) -> Result<serde_json::Value, RpcError> {
        message
            .serialize_with_options(serde_json::value::Serializer, &SERIALIZE_OPTIONS)
            .map_err(|e| RpcError::EncodeError(e.to_string()))
    }
}

/// Fully-qualified names are stored without the leading dot.
pub fn strip_leading_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

/// A rule body that does not fit its declared type is the rule author's
/// mistake, not the client's.
fn as_encode_error(err: RpcError) -> RpcError {
    match err {
        RpcError::DecodeError(message) => RpcError::EncodeError(message),
        other => other,
    }
}
