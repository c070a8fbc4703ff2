use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wishmock::config::{ValidationMode, ValidationSource};
use wishmock::schema::{Registry, loader};
use wishmock::validation::{UnsupportedCelEvaluator, Validator};

// Trimmed copy of protoc-gen-validate's annotation schema, as operators
// ship it next to their own protos.
const PGV_PROTO: &str = r#"
syntax = "proto2";
package validate;

import "google/protobuf/descriptor.proto";

extend google.protobuf.FieldOptions {
  optional FieldRules rules = 1071;
}

message FieldRules {
  optional MessageRules message = 17;
  oneof type {
    Int32Rules int32 = 3;
    Int64Rules int64 = 4;
    StringRules string = 14;
    EnumRules enum = 16;
    RepeatedRules repeated = 18;
  }
}

message Int32Rules {
  optional int32 const = 1;
  optional int32 lt = 2;
  optional int32 lte = 3;
  optional int32 gt = 4;
  optional int32 gte = 5;
  repeated int32 in = 6;
  repeated int32 not_in = 7;
}

message Int64Rules {
  optional int64 const = 1;
  optional int64 lt = 2;
  optional int64 lte = 3;
  optional int64 gt = 4;
  optional int64 gte = 5;
  repeated int64 in = 6;
  repeated int64 not_in = 7;
}

message StringRules {
  optional string const = 1;
  optional uint64 min_len = 2;
  optional uint64 max_len = 3;
  optional string pattern = 6;
  repeated string in = 10;
  repeated string not_in = 11;
  oneof well_known {
    bool email = 12;
    bool hostname = 13;
    bool ip = 14;
    bool uuid = 22;
  }
}

message EnumRules {
  optional bool defined_only = 2;
}

message RepeatedRules {
  optional uint64 min_items = 1;
  optional uint64 max_items = 2;
}

message MessageRules {
  optional bool skip = 1;
  optional bool required = 2;
}
"#;

const PGV_DEMO: &str = r#"
syntax = "proto3";
package demo;

import "validate/validate.proto";

message Profile {
  string id = 1 [(validate.rules).string.uuid = true];
}

message SignupRequest {
  string name = 1 [(validate.rules).string.min_len = 3, (validate.rules).string.pattern = "^[a-z]+$"];
  string email = 2 [(validate.rules).string.email = true];
  int32 age = 3 [(validate.rules).int32.lte = 150];
  string plan = 4 [(validate.rules).string.in = "free", (validate.rules).string.in = "pro"];
  Profile profile = 5 [(validate.rules).message.required = true];
}

service Signup {
  rpc Create(SignupRequest) returns (SignupRequest);
}
"#;

fn write_pgv_tree(dir: &Path) {
    std::fs::create_dir_all(dir.join("validate")).unwrap();
    std::fs::write(dir.join("validate/validate.proto"), PGV_PROTO).unwrap();
    std::fs::write(dir.join("demo.proto"), PGV_DEMO).unwrap();
}

fn build(
    dir: &TempDir,
    source: ValidationSource,
    mode: ValidationMode,
) -> (Registry, Validator) {
    let registry = Registry::from_loaded(loader::load(dir.path(), &[]).unwrap());
    let validator = Validator::build(
        registry.pool(),
        source,
        mode,
        true,
        false,
        Arc::new(UnsupportedCelEvaluator),
    );
    (registry, validator)
}

fn valid_request() -> serde_json::Value {
    serde_json::json!({
        "name": "alice",
        "email": "alice@example.com",
        "age": 30,
        "plan": "free",
        "profile": {"id": "8c5498f4-40f9-4a81-9a07-e9f267b10a6d"}
    })
}

#[test]
fn test_pgv_aggregate_reports_every_violation() {
    let dir = tempfile::tempdir().unwrap();
    write_pgv_tree(dir.path());
    let (registry, validator) = build(&dir, ValidationSource::Auto, ValidationMode::Aggregate);

    // auto resolves to pgv when no buf.validate annotations exist
    assert_eq!(validator.resolved_source(), ValidationSource::Pgv);

    let mut request = valid_request();
    request["name"] = serde_json::json!("ab");
    request["email"] = serde_json::json!("invalid");
    request["age"] = serde_json::json!(200);

    let message = registry
        .decode_json_value("demo.SignupRequest", &request)
        .unwrap();
    let report = validator.validate(&message);

    let mut paths: Vec<&str> = report
        .violations
        .iter()
        .map(|v| v.field_path.as_str())
        .collect();
    paths.sort();
    assert_eq!(paths, ["age", "email", "name"]);

    let name = report
        .violations
        .iter()
        .find(|v| v.field_path == "name")
        .unwrap();
    assert_eq!(name.constraint_id, "min_len");
    let age = report
        .violations
        .iter()
        .find(|v| v.field_path == "age")
        .unwrap();
    assert_eq!(age.constraint_id, "lte");
}

#[test]
fn test_per_message_stops_at_first_failure_per_field() {
    let dir = tempfile::tempdir().unwrap();
    write_pgv_tree(dir.path());

    // "AB" violates both min_len and the lowercase pattern
    let mut request = valid_request();
    request["name"] = serde_json::json!("AB");

    let (registry, validator) = build(&dir, ValidationSource::Pgv, ValidationMode::Aggregate);
    let message = registry
        .decode_json_value("demo.SignupRequest", &request)
        .unwrap();
    let aggregate = validator.validate(&message);
    assert_eq!(
        aggregate
            .violations
            .iter()
            .filter(|v| v.field_path == "name")
            .count(),
        2
    );

    let (registry, validator) = build(&dir, ValidationSource::Pgv, ValidationMode::PerMessage);
    let message = registry
        .decode_json_value("demo.SignupRequest", &request)
        .unwrap();
    let per_message = validator.validate(&message);
    assert_eq!(
        per_message
            .violations
            .iter()
            .filter(|v| v.field_path == "name")
            .count(),
        1
    );
    assert_eq!(per_message.violations[0].constraint_id, "min_len");
}

#[test]
fn test_required_rejects_missing_message_field() {
    let dir = tempfile::tempdir().unwrap();
    write_pgv_tree(dir.path());
    let (registry, validator) = build(&dir, ValidationSource::Pgv, ValidationMode::Aggregate);

    let mut request = valid_request();
    request.as_object_mut().unwrap().remove("profile");

    let message = registry
        .decode_json_value("demo.SignupRequest", &request)
        .unwrap();
    let report = validator.validate(&message);

    let profile = report
        .violations
        .iter()
        .find(|v| v.field_path == "profile")
        .unwrap();
    assert_eq!(profile.constraint_id, "required");
}

#[test]
fn test_nested_violations_carry_dotted_paths() {
    let dir = tempfile::tempdir().unwrap();
    write_pgv_tree(dir.path());
    let (registry, validator) = build(&dir, ValidationSource::Pgv, ValidationMode::Aggregate);

    let mut request = valid_request();
    request["profile"]["id"] = serde_json::json!("not-a-uuid");

    let message = registry
        .decode_json_value("demo.SignupRequest", &request)
        .unwrap();
    let report = validator.validate(&message);

    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].field_path, "profile.id");
    assert_eq!(report.violations[0].constraint_id, "uuid");
}

#[test]
fn test_membership_constraint() {
    let dir = tempfile::tempdir().unwrap();
    write_pgv_tree(dir.path());
    let (registry, validator) = build(&dir, ValidationSource::Pgv, ValidationMode::Aggregate);

    let mut request = valid_request();
    request["plan"] = serde_json::json!("enterprise");

    let message = registry
        .decode_json_value("demo.SignupRequest", &request)
        .unwrap();
    let report = validator.validate(&message);

    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].field_path, "plan");
    assert_eq!(report.violations[0].constraint_id, "in");
}

#[test]
fn test_valid_request_passes() {
    let dir = tempfile::tempdir().unwrap();
    write_pgv_tree(dir.path());
    let (registry, validator) = build(&dir, ValidationSource::Pgv, ValidationMode::Aggregate);

    let message = registry
        .decode_json_value("demo.SignupRequest", &valid_request())
        .unwrap();
    let report = validator.validate(&message);
    assert!(report.ok(), "unexpected violations: {:?}", report.violations);
}

// Trimmed copy of protovalidate's annotation schema.
const PROTOVALIDATE_PROTO: &str = r#"
syntax = "proto3";
package buf.validate;

import "google/protobuf/descriptor.proto";

extend google.protobuf.FieldOptions {
  FieldConstraints field = 1159;
}

extend google.protobuf.MessageOptions {
  MessageConstraints message = 1159;
}

message Constraint {
  string id = 1;
  string message = 2;
  string expression = 3;
}

message MessageConstraints {
  bool disabled = 1;
  repeated Constraint cel = 3;
}

message FieldConstraints {
  repeated Constraint cel = 23;
  bool required = 25;
  oneof type {
    Int32Rules int32 = 3;
    StringRules string = 14;
  }
}

message Int32Rules {
  optional int32 lte = 3;
  optional int32 gte = 5;
}

message StringRules {
  optional uint64 min_len = 2;
  optional bool email = 12;
}
"#;

const PROTOVALIDATE_DEMO: &str = r#"
syntax = "proto3";
package inventory;

import "buf/validate/validate.proto";

message Widget {
  option (buf.validate.message).cel = {
    id: "widget.size_positive"
    message: "size must be positive"
    expression: "this.size > 0"
  };

  int32 size = 1 [(buf.validate.field).int32.lte = 10];
  string owner_email = 2 [(buf.validate.field).string.email = true];
  string label = 3 [(buf.validate.field).required = true];
}

service Widgets {
  rpc Create(Widget) returns (Widget);
}
"#;

fn write_protovalidate_tree(dir: &Path) {
    std::fs::create_dir_all(dir.join("buf/validate")).unwrap();
    std::fs::write(dir.join("buf/validate/validate.proto"), PROTOVALIDATE_PROTO).unwrap();
    std::fs::write(dir.join("inventory.proto"), PROTOVALIDATE_DEMO).unwrap();
}

#[test]
fn test_auto_detects_protovalidate() {
    let dir = tempfile::tempdir().unwrap();
    write_protovalidate_tree(dir.path());
    let (registry, validator) = build(&dir, ValidationSource::Auto, ValidationMode::Aggregate);

    assert_eq!(validator.resolved_source(), ValidationSource::Protovalidate);

    let request = serde_json::json!({
        "size": 20,
        "owner_email": "bad-address",
        "label": "ok"
    });
    let message = registry
        .decode_json_value("inventory.Widget", &request)
        .unwrap();
    let report = validator.validate(&message);

    let mut ids: Vec<&str> = report
        .violations
        .iter()
        .map(|v| v.constraint_id.as_str())
        .collect();
    ids.sort();
    assert_eq!(ids, ["email", "lte"]);
}

#[test]
fn test_protovalidate_required_flag() {
    let dir = tempfile::tempdir().unwrap();
    write_protovalidate_tree(dir.path());
    let (registry, validator) =
        build(&dir, ValidationSource::Protovalidate, ValidationMode::Aggregate);

    let request = serde_json::json!({"size": 5, "owner_email": "a@b.test"});
    let message = registry
        .decode_json_value("inventory.Widget", &request)
        .unwrap();
    let report = validator.validate(&message);

    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].field_path, "label");
    assert_eq!(report.violations[0].constraint_id, "required");

    // An explicitly sent empty string is no better than an absent field
    let request = serde_json::json!({"size": 5, "owner_email": "a@b.test", "label": ""});
    let message = registry
        .decode_json_value("inventory.Widget", &request)
        .unwrap();
    let report = validator.validate(&message);

    assert_eq!(report.violations.len(), 1);
    assert_eq!(report.violations[0].constraint_id, "required");
}

#[test]
fn test_message_cel_without_engine_is_unsupported_not_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    write_protovalidate_tree(dir.path());
    let (registry, validator) =
        build(&dir, ValidationSource::Protovalidate, ValidationMode::Aggregate);

    let request = serde_json::json!({
        "size": 5,
        "owner_email": "a@b.test",
        "label": "ok"
    });
    let message = registry
        .decode_json_value("inventory.Widget", &request)
        .unwrap();
    let report = validator.validate(&message);

    assert!(report.ok());
    assert_eq!(report.unsupported, ["widget.size_positive"]);
}

#[test]
fn test_legacy_buf_alias_forces_protovalidate() {
    let dir = tempfile::tempdir().unwrap();
    write_protovalidate_tree(dir.path());

    let source = ValidationSource::parse("buf").unwrap();
    let (_registry, validator) = build(&dir, source, ValidationMode::Aggregate);
    assert_eq!(validator.resolved_source(), ValidationSource::Protovalidate);
}
