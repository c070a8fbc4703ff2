// Environment-driven server configuration

use serde::Serialize;
use std::path::PathBuf;

// Environment variable names
pub const ENV_GRPC_PORT: &str = "GRPC_PORT";
pub const ENV_GRPC_TLS_PORT: &str = "GRPC_TLS_PORT";
pub const ENV_GRPC_TLS_CERT: &str = "GRPC_TLS_CERT";
pub const ENV_GRPC_TLS_KEY: &str = "GRPC_TLS_KEY";
pub const ENV_GRPC_TLS_CA: &str = "GRPC_TLS_CA";
pub const ENV_GRPC_MTLS_ENABLED: &str = "GRPC_MTLS_ENABLED";
pub const ENV_CONNECT_ENABLED: &str = "CONNECT_ENABLED";
pub const ENV_CONNECT_PORT: &str = "CONNECT_PORT";
pub const ENV_CONNECT_CORS_ENABLED: &str = "CONNECT_CORS_ENABLED";
pub const ENV_CONNECT_CORS_ORIGINS: &str = "CONNECT_CORS_ORIGINS";
pub const ENV_ADMIN_PORT: &str = "ADMIN_PORT";
pub const ENV_VALIDATION_ENABLED: &str = "VALIDATION_ENABLED";
pub const ENV_VALIDATION_SOURCE: &str = "VALIDATION_SOURCE";
pub const ENV_VALIDATION_MODE: &str = "VALIDATION_MODE";
pub const ENV_VALIDATION_CEL_MESSAGE: &str = "VALIDATION_CEL_MESSAGE";
pub const ENV_DEBUG_VALIDATION: &str = "DEBUG_VALIDATION";
pub const ENV_PROTO_DIR: &str = "PROTO_DIR";
pub const ENV_RULES_DIR: &str = "RULES_DIR";
pub const ENV_UPLOADS_DIR: &str = "UPLOADS_DIR";

/// Which constraint dialect the extractor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationSource {
    Auto,
    Pgv,
    Protovalidate,
}

impl ValidationSource {
    /// Parse the env value; the legacy alias `buf` maps to protovalidate.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "pgv" => Some(Self::Pgv),
            "protovalidate" | "buf" => Some(Self::Protovalidate),
            _ => None,
        }
    }
}

/// How many violations the engine reports per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    PerMessage,
    Aggregate,
}

impl ValidationMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "per_message" => Some(Self::PerMessage),
            "aggregate" => Some(Self::Aggregate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: Option<PathBuf>,
    pub require_client_cert: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub grpc_port: u16,
    pub tls: Option<TlsSettings>,
    pub connect_enabled: bool,
    pub connect_port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    pub admin_port: u16,
    pub validation_enabled: bool,
    pub validation_source: ValidationSource,
    pub validation_mode: ValidationMode,
    pub message_cel_experimental: bool,
    pub debug_validation: bool,
    pub proto_dir: PathBuf,
    pub rules_dir: PathBuf,
    pub uploads_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            grpc_port: default_grpc_port(),
            tls: None,
            connect_enabled: false,
            connect_port: default_connect_port(),
            cors_enabled: false,
            cors_origins: vec!["*".to_string()],
            admin_port: default_admin_port(),
            validation_enabled: true,
            validation_source: ValidationSource::Auto,
            validation_mode: ValidationMode::PerMessage,
            message_cel_experimental: false,
            debug_validation: false,
            proto_dir: PathBuf::from(default_proto_dir()),
            rules_dir: PathBuf::from(default_rules_dir()),
            uploads_dir: PathBuf::from(default_uploads_dir()),
        }
    }
}

pub fn default_grpc_port() -> u16 {
    50051
}

pub fn default_connect_port() -> u16 {
    50052
}

pub fn default_admin_port() -> u16 {
    3000
}

pub fn default_proto_dir() -> &'static str {
    "protos"
}

pub fn default_rules_dir() -> &'static str {
    "rules/grpc"
}

pub fn default_uploads_dir() -> &'static str {
    "uploads"
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(port) = env_u16(ENV_GRPC_PORT) {
            config.grpc_port = port;
        }
        config.tls = Self::tls_from_env();
        config.connect_enabled = env_bool(ENV_CONNECT_ENABLED).unwrap_or(false);
        if let Some(port) = env_u16(ENV_CONNECT_PORT) {
            config.connect_port = port;
        }
        config.cors_enabled = env_bool(ENV_CONNECT_CORS_ENABLED).unwrap_or(false);
        if let Ok(origins) = std::env::var(ENV_CONNECT_CORS_ORIGINS) {
            config.cors_origins = parse_origins(&origins);
        }
        if let Some(port) = env_u16(ENV_ADMIN_PORT) {
            config.admin_port = port;
        }

        config.validation_enabled = env_bool(ENV_VALIDATION_ENABLED).unwrap_or(true);
        if let Ok(source) = std::env::var(ENV_VALIDATION_SOURCE) {
            match ValidationSource::parse(&source) {
                Some(parsed) => config.validation_source = parsed,
                None => tracing::warn!(
                    "Unknown {} value '{}', using 'auto'",
                    ENV_VALIDATION_SOURCE,
                    source
                ),
            }
        }
        if let Ok(mode) = std::env::var(ENV_VALIDATION_MODE) {
            match ValidationMode::parse(&mode) {
                Some(parsed) => config.validation_mode = parsed,
                None => tracing::warn!(
                    "Unknown {} value '{}', using 'per_message'",
                    ENV_VALIDATION_MODE,
                    mode
                ),
            }
        }
        config.message_cel_experimental = std::env::var(ENV_VALIDATION_CEL_MESSAGE)
            .map(|v| v.eq_ignore_ascii_case("experimental"))
            .unwrap_or(false);
        config.debug_validation = env_bool(ENV_DEBUG_VALIDATION).unwrap_or(false);

        if let Ok(dir) = std::env::var(ENV_PROTO_DIR) {
            config.proto_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(ENV_RULES_DIR) {
            config.rules_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var(ENV_UPLOADS_DIR) {
            config.uploads_dir = PathBuf::from(dir);
        }

        config
    }

    /// TLS is enabled only when port, cert and key are all present.
    fn tls_from_env() -> Option<TlsSettings> {
        let port = env_u16(ENV_GRPC_TLS_PORT)?;
        let cert = std::env::var(ENV_GRPC_TLS_CERT).ok()?;
        let key = std::env::var(ENV_GRPC_TLS_KEY).ok()?;

        Some(TlsSettings {
            port,
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
            ca_path: std::env::var(ENV_GRPC_TLS_CA).ok().map(PathBuf::from),
            require_client_cert: env_bool(ENV_GRPC_MTLS_ENABLED).unwrap_or(false),
        })
    }
}

/// Accepts 1/true/yes/on (case-insensitive) as true, 0/false/no/off as false.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_bool(&v))
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    let origins: Vec<String> = raw
        .split(',')
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    if origins.is_empty() {
        vec!["*".to_string()]
    } else {
        origins
    }
}
