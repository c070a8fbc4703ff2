// Wire dialect detection from request content types

use crate::metrics::Protocol;

/// Payload encoding within a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Json,
    Proto,
}

/// The three dialects served on the shared `/{package}.{Service}/{Method}`
/// path, told apart by content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Connect RPC. Unary bodies are bare; `application/connect+*` request
    /// bodies carry the streaming envelope.
    Connect { codec: Codec, enveloped: bool },
    /// gRPC-Web; `text` wraps the whole body in base64.
    GrpcWeb { codec: Codec, text: bool },
    /// Native gRPC over HTTP/2.
    Grpc { codec: Codec },
}

impl Dialect {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        // Parameters such as charset are irrelevant here
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/grpc-web-text" | "application/grpc-web-text+proto" => {
                Some(Dialect::GrpcWeb {
                    codec: Codec::Proto,
                    text: true,
                })
            }
            "application/grpc-web+json" => Some(Dialect::GrpcWeb {
                codec: Codec::Json,
                text: false,
            }),
            "application/grpc-web" | "application/grpc-web+proto" => Some(Dialect::GrpcWeb {
                codec: Codec::Proto,
                text: false,
            }),
            "application/grpc+json" => Some(Dialect::Grpc { codec: Codec::Json }),
            "application/grpc" | "application/grpc+proto" => {
                Some(Dialect::Grpc { codec: Codec::Proto })
            }
            "application/json" => Some(Dialect::Connect {
                codec: Codec::Json,
                enveloped: false,
            }),
            "application/proto" => Some(Dialect::Connect {
                codec: Codec::Proto,
                enveloped: false,
            }),
            "application/connect+json" => Some(Dialect::Connect {
                codec: Codec::Json,
                enveloped: true,
            }),
            "application/connect+proto" => Some(Dialect::Connect {
                codec: Codec::Proto,
                enveloped: true,
            }),
            _ => None,
        }
    }

    pub fn codec(&self) -> Codec {
        match self {
            Dialect::Connect { codec, .. }
            | Dialect::GrpcWeb { codec, .. }
            | Dialect::Grpc { codec } => *codec,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Dialect::Connect { .. } => Protocol::Connect,
            Dialect::GrpcWeb { .. } => Protocol::GrpcWeb,
            Dialect::Grpc { .. } => Protocol::Grpc,
        }
    }

    /// Content type of a successful response.
    pub fn response_content_type(&self, server_streaming: bool) -> &'static str {
        match self {
            Dialect::Connect { codec: Codec::Json, .. } => {
                // Streams are newline-delimited JSON and keep the JSON type
                "application/json"
            }
            Dialect::Connect { codec: Codec::Proto, .. } => {
                if server_streaming {
                    "application/connect+proto"
                } else {
                    "application/proto"
                }
            }
            Dialect::GrpcWeb {
                codec: Codec::Json,
                text: false,
            } => "application/grpc-web+json",
            Dialect::GrpcWeb { text: true, .. } => "application/grpc-web-text+proto",
            Dialect::GrpcWeb { .. } => "application/grpc-web+proto",
            Dialect::Grpc { codec: Codec::Json } => "application/grpc+json",
            Dialect::Grpc { .. } => "application/grpc",
        }
    }
}
