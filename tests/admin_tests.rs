use axum::body::Body;
use http::{Request, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use wishmock::admin;
use wishmock::config::Config;
use wishmock::world::AppState;

const PROTO: &str = r#"
syntax = "proto3";
package helloworld;

message HelloRequest { string name = 1; }
message HelloReply { string message = 1; }

service Greeter {
  rpc SayHello(HelloRequest) returns (HelloReply);
}
"#;

struct TestAdmin {
    state: Arc<AppState>,
    router: axum::Router,
    dir: TempDir,
}

async fn admin_server(rules: &[(&str, &str)]) -> TestAdmin {
    let dir = tempfile::tempdir().unwrap();
    let protos = dir.path().join("protos");
    let rules_dir = dir.path().join("rules");
    std::fs::create_dir_all(&protos).unwrap();
    std::fs::create_dir_all(&rules_dir).unwrap();
    std::fs::write(protos.join("helloworld.proto"), PROTO).unwrap();
    for (name, content) in rules {
        std::fs::write(rules_dir.join(name), content).unwrap();
    }

    let config = Config {
        proto_dir: protos,
        rules_dir,
        ..Config::default()
    };
    let state = AppState::new(config);
    state.bootstrap().await;
    let router = admin::router(state.clone());

    TestAdmin { state, router, dir }
}

async fn get_json(router: &axum::Router, path: &str) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(path)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, value)
}

async fn post_json(
    router: &axum::Router,
    path: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_status_payload() {
    let server = admin_server(&[(
        "helloworld.Greeter.SayHello.yaml",
        "responses:\n  - body: { message: \"hi\" }\n",
    )])
    .await;

    let (status, value) = get_json(&server.router, "/admin/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["loaded_services"], 1);
    assert_eq!(value["protos"]["loaded"], 1);
    assert_eq!(value["protos"]["skipped"], 0);
    assert_eq!(value["rules"]["options"], 1);
    assert_eq!(value["rules"]["keys"][0], "helloworld.greeter.sayhello");
    assert_eq!(value["grpc_ports"]["plaintext"], 50051);
}

#[tokio::test]
async fn test_services_listing_carries_rule_keys() {
    let server = admin_server(&[]).await;

    let (status, value) = get_json(&server.router, "/admin/services").await;
    assert_eq!(status, StatusCode::OK);
    let services = value["services"].as_array().unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0]["name"], "helloworld.Greeter");
    assert_eq!(
        services[0]["methods"][0]["rule_key"],
        "helloworld.greeter.sayhello"
    );
    assert_eq!(
        services[0]["methods"][0]["request_type"],
        "helloworld.HelloRequest"
    );
}

#[tokio::test]
async fn test_schema_view_and_not_found() {
    let server = admin_server(&[]).await;

    let (status, value) = get_json(&server.router, "/admin/schema/helloworld.HelloRequest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["type"], "message");
    assert_eq!(value["fields"][0]["name"], "name");

    let (status, _) = get_json(&server.router, "/admin/schema/helloworld.Missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rule_swaps_in_new_candidates() {
    let server = admin_server(&[]).await;
    assert_eq!(
        server
            .state
            .snapshot()
            .rules
            .candidates("helloworld.greeter.sayhello")
            .len(),
        0
    );

    let (status, value) = post_json(
        &server.router,
        "/admin/upload/rule",
        json!({
            "filename": "helloworld.Greeter.SayHello.yaml",
            "content": "responses:\n  - body: { message: \"uploaded\" }\n"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", value);

    let world = server.state.snapshot();
    let candidates = world.rules.candidates("helloworld.greeter.sayhello");
    assert_eq!(candidates.len(), 1);
}

#[tokio::test]
async fn test_broken_upload_is_rejected_and_rolled_back() {
    let server = admin_server(&[(
        "helloworld.Greeter.SayHello.yaml",
        "responses:\n  - body: { message: \"original\" }\n",
    )])
    .await;

    let (status, value) = post_json(
        &server.router,
        "/admin/upload/rule",
        json!({
            "filename": "helloworld.Greeter.SayHello.yaml",
            "content": "responses: ["
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(value["error"].as_str().unwrap().contains("parse"));

    // Previous world retained
    let world = server.state.snapshot();
    let candidates = world.rules.candidates("helloworld.greeter.sayhello");
    assert_eq!(candidates.len(), 1);

    // File rolled back to its previous content
    let on_disk = std::fs::read_to_string(
        server
            .dir
            .path()
            .join("rules")
            .join("helloworld.Greeter.SayHello.yaml"),
    )
    .unwrap();
    assert!(on_disk.contains("original"));
}

#[tokio::test]
async fn test_upload_proto_rebuilds_descriptor() {
    let server = admin_server(&[]).await;

    let (status, _) = post_json(
        &server.router,
        "/admin/upload/proto",
        json!({
            "filename": "extra.proto",
            "content": "syntax = \"proto3\";\npackage extra;\nmessage Ping { string id = 1; }\nservice Pinger { rpc Ping(Ping) returns (Ping); }\n"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let world = server.state.snapshot();
    assert!(world.registry.lookup_method("extra.Pinger/Ping").is_ok());
}

#[tokio::test]
async fn test_upload_rejects_path_traversal() {
    let server = admin_server(&[]).await;

    let (status, _) = post_json(
        &server.router,
        "/admin/upload/proto",
        json!({"filename": "../evil.proto", "content": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(
        &server.router,
        "/admin/upload/rule",
        json!({"filename": "nested/rule.yaml", "content": ""}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_probes() {
    let server = admin_server(&[]).await;

    let (status, value) = get_json(&server.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "ok");

    let (status, _) = get_json(&server.router, "/liveness").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get_json(&server.router, "/readiness").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let server = admin_server(&[]).await;
    server.state.metrics.record_match_attempt();
    server.state.metrics.record_miss();

    let (status, value) = get_json(&server.router, "/admin/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["counters"]["rule_matching"]["attempts_total"], 1);
    assert_eq!(value["counters"]["rule_matching"]["misses_total"], 1);
    assert!(value["recent_validation_events"].as_array().unwrap().is_empty());
}
