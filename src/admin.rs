// Admin surface: status, schema inspection, uploads, health probes

use crate::schema::ProtoFileStatus;
use crate::world::AppState;
use axum::Router;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/status", get(status))
        .route("/admin/services", get(services))
        .route("/admin/schema/{type_name}", get(schema))
        .route("/admin/metrics", get(metrics))
        .route("/admin/upload/proto", post(upload_proto))
        .route("/admin/upload/rule", post(upload_rule))
        .route("/admin/reload", post(reload))
        .route("/health", get(health))
        .route("/liveness", get(liveness))
        .route("/readiness", get(readiness))
        .with_state(state)
}

async fn status(State(state): State<Arc<AppState>>) -> Response {
    let world = state.snapshot();
    let config = &state.config;

    let loaded = world
        .registry
        .reports()
        .iter()
        .filter(|r| r.status == ProtoFileStatus::Loaded)
        .count();
    let skipped = world.registry.reports().len() - loaded;

    axum::Json(json!({
        "grpc_ports": {
            "plaintext": config.grpc_port,
            "tls": config.tls.as_ref().map(|t| t.port),
        },
        "connect_rpc": {
            "enabled": config.connect_enabled,
            "port": config.connect_port,
            "cors_enabled": config.cors_enabled,
        },
        "loaded_services": world.registry.list_services().len(),
        "rules": {
            "keys": world.rules.rule_keys(),
            "options": world.rules.total_candidates(),
            "orphans": world.rules.orphan_keys(),
        },
        "protos": {
            "loaded": loaded,
            "skipped": skipped,
        },
        "validation": {
            "enabled": world.validator.enabled(),
            "source": world.validator.resolved_source(),
            "mode": config.validation_mode,
            "constrained_types": world.validator.constrained_types(),
        },
        "built_at": world.built_at.to_rfc3339(),
    }))
    .into_response()
}

async fn services(State(state): State<Arc<AppState>>) -> Response {
    let world = state.snapshot();
    axum::Json(json!({
        "services": world.registry.list_services(),
        "orphan_rule_keys": world.rules.orphan_keys(),
    }))
    .into_response()
}

async fn schema(
    State(state): State<Arc<AppState>>,
    Path(type_name): Path<String>,
) -> Response {
    let world = state.snapshot();

    if world.registry.reports().is_empty() && world.registry.methods().next().is_none() {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "no schemas loaded");
    }

    match world.registry.schema_of(&type_name) {
        Some(view) => axum::Json(view).into_response(),
        None => error_body(
            StatusCode::NOT_FOUND,
            &format!("type not found: {}", type_name),
        ),
    }
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(json!({
        "counters": state.metrics.snapshot(),
        "recent_validation_events": state.metrics.recent_events(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    filename: String,
    content: String,
}

async fn upload_proto(
    State(state): State<Arc<AppState>>,
    axum::Json(upload): axum::Json<UploadRequest>,
) -> Response {
    let Some(filename) = sanitize_filename(&upload.filename, &["proto"]) else {
        return error_body(StatusCode::BAD_REQUEST, "filename must be a bare .proto name");
    };

    let target = state.config.proto_dir.join(&filename);
    replace_and_reload(&state, target, &upload.content, true).await
}

async fn upload_rule(
    State(state): State<Arc<AppState>>,
    axum::Json(upload): axum::Json<UploadRequest>,
) -> Response {
    let Some(filename) = sanitize_filename(&upload.filename, &["yaml", "yml", "json"]) else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "filename must be a bare .yaml, .yml or .json name",
        );
    };

    let target = state.config.rules_dir.join(&filename);
    replace_and_reload(&state, target, &upload.content, false).await
}

/// Persist the uploaded file, rebuild, and swap. On a failed rebuild the
/// file is rolled back so the on-disk tree always matches the published
/// snapshot.
async fn replace_and_reload(
    state: &Arc<AppState>,
    target: PathBuf,
    content: &str,
    full_rebuild: bool,
) -> Response {
    let previous = std::fs::read_to_string(&target).ok();

    if let Some(parent) = target.parent() {
        if let Err(err) = std::fs::create_dir_all(parent) {
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
        }
    }
    if let Err(err) = std::fs::write(&target, content) {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    }

    let result = if full_rebuild {
        state.rebuild().await
    } else {
        state.reload_rules().await
    };

    match result {
        Ok(_) => {
            info!("Replaced {} and reloaded", target.display());
            axum::Json(json!({"status": "ok", "file": target.display().to_string()}))
                .into_response()
        }
        Err(err) => {
            warn!("Upload of {} rejected: {:#}", target.display(), err);
            match previous {
                Some(content) => {
                    let _ = std::fs::write(&target, content);
                }
                None => {
                    let _ = std::fs::remove_file(&target);
                }
            }
            error_body(StatusCode::UNPROCESSABLE_ENTITY, &format!("{:#}", err))
        }
    }
}

async fn reload(State(state): State<Arc<AppState>>) -> Response {
    match state.rebuild().await {
        Ok(_) => axum::Json(json!({"status": "ok"})).into_response(),
        Err(err) => error_body(StatusCode::UNPROCESSABLE_ENTITY, &format!("{:#}", err)),
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    let world = state.snapshot();
    axum::Json(json!({
        "status": "ok",
        "services": world.registry.list_services().len(),
        "rules": world.rules.total_candidates(),
    }))
    .into_response()
}

async fn liveness() -> Response {
    axum::Json(json!({"status": "ok"})).into_response()
}

async fn readiness(State(state): State<Arc<AppState>>) -> Response {
    let world = state.snapshot();
    if world.registry.methods().next().is_some() {
        axum::Json(json!({"status": "ready"})).into_response()
    } else {
        error_body(StatusCode::SERVICE_UNAVAILABLE, "no schemas loaded")
    }
}

/// Uploads may only name a bare file with an allowed extension; anything
/// that looks like a path is rejected.
fn sanitize_filename(filename: &str, allowed_extensions: &[&str]) -> Option<String> {
    let trimmed = filename.trim();
    if trimmed.is_empty()
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains("..")
        || trimmed.starts_with('.')
    {
        return None;
    }

    let extension = std::path::Path::new(trimmed)
        .extension()?
        .to_string_lossy()
        .to_lowercase();
    if !allowed_extensions.contains(&extension.as_str()) {
        return None;
    }

    Some(trimmed.to_string())
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(json!({"error": message}))).into_response()
}
