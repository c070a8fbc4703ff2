// Call-level error taxonomy shared by all three wire dialects

use http::StatusCode;
use serde::Serialize;

/// A single constraint violation reported by the validation engine.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Violation {
    pub field_path: String,
    pub constraint_id: String,
    pub message: String,
}

impl Violation {
    pub fn new(
        field_path: impl Into<String>,
        constraint_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field_path: field_path.into(),
            constraint_id: constraint_id.into(),
            message: message.into(),
        }
    }
}

/// Everything that can terminate an RPC before (or instead of) a normal reply.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("method not found: {0}")]
    MethodUnknown(String),

    #[error("failed to decode request: {0}")]
    DecodeError(String),

    #[error("request validation failed: {}", first_violation_message(.0))]
    ValidationFailed(Vec<Violation>),

    #[error("no rule matched the request")]
    RuleNotMatched,

    #[error("failed to encode response: {0}")]
    EncodeError(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("call cancelled")]
    Cancelled,
}

fn first_violation_message(violations: &[Violation]) -> String {
    violations
        .first()
        .map(|v| format!("{}: {}", v.field_path, v.message))
        .unwrap_or_else(|| "unknown violation".to_string())
}

impl RpcError {
    /// Connect error code string, per the Connect protocol error model.
    pub fn connect_code(&self) -> &'static str {
        match self {
            RpcError::MethodUnknown(_) => "not_found",
            RpcError::DecodeError(_) => "invalid_argument",
            RpcError::ValidationFailed(_) => "invalid_argument",
            RpcError::RuleNotMatched => "unimplemented",
            RpcError::EncodeError(_) => "internal",
            RpcError::Internal(_) => "internal",
            RpcError::Cancelled => "canceled",
        }
    }

    /// Numeric gRPC status code, used in `grpc-status` trailers.
    pub fn grpc_status(&self) -> u32 {
        match self {
            RpcError::MethodUnknown(_) => 5,      // NOT_FOUND
            RpcError::DecodeError(_) => 3,        // INVALID_ARGUMENT
            RpcError::ValidationFailed(_) => 3,   // INVALID_ARGUMENT
            RpcError::RuleNotMatched => 12,       // UNIMPLEMENTED
            RpcError::EncodeError(_) => 13,       // INTERNAL
            RpcError::Internal(_) => 13,          // INTERNAL
            RpcError::Cancelled => 1,             // CANCELLED
        }
    }

    /// HTTP status the Connect protocol assigns to the error code.
    pub fn connect_http_status(&self) -> StatusCode {
        match self.connect_code() {
            "invalid_argument" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "unimplemented" => StatusCode::NOT_IMPLEMENTED,
            "canceled" => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message suitable for `grpc-message` trailers and Connect bodies.
    pub fn public_message(&self) -> String {
        self.to_string()
    }

    /// Violations carried by a `ValidationFailed`, empty otherwise.
    pub fn violations(&self) -> &[Violation] {
        match self {
            RpcError::ValidationFailed(v) => v,
            _ => &[],
        }
    }

    /// Short stable name used by metrics and the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::MethodUnknown(_) => "method_unknown",
            RpcError::DecodeError(_) => "decode_error",
            RpcError::ValidationFailed(_) => "validation_failed",
            RpcError::RuleNotMatched => "rule_not_matched",
            RpcError::EncodeError(_) => "encode_error",
            RpcError::Internal(_) => "internal",
            RpcError::Cancelled => "cancelled",
        }
    }
}
