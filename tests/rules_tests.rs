use std::path::Path;
use tempfile::TempDir;
use wishmock::rules::RuleStore;
use wishmock::schema::{Registry, loader};

const GREETER_PROTO: &str = r#"
syntax = "proto3";
package helloworld;

message HelloRequest { string name = 1; }
message HelloReply { string message = 1; }

service Greeter {
  rpc SayHello(HelloRequest) returns (HelloReply);
  rpc SayHelloStream(HelloRequest) returns (stream HelloReply);
}
"#;

fn registry(dir: &Path) -> Registry {
    std::fs::write(dir.join("greeter.proto"), GREETER_PROTO).unwrap();
    Registry::from_loaded(loader::load(dir, &[]).unwrap())
}

fn workspace() -> (TempDir, Registry) {
    let dir = tempfile::tempdir().unwrap();
    let protos = dir.path().join("protos");
    std::fs::create_dir_all(&protos).unwrap();
    std::fs::create_dir_all(dir.path().join("rules")).unwrap();
    let registry = registry(&protos);
    (dir, registry)
}

fn write_rule(dir: &TempDir, name: &str, content: &str) {
    std::fs::write(dir.path().join("rules").join(name), content).unwrap();
}

fn load(dir: &TempDir, registry: &Registry) -> RuleStore {
    RuleStore::load(&dir.path().join("rules"), registry).unwrap()
}

#[test]
fn test_case_insensitive_rule_keys() {
    let (dir, registry) = workspace();
    write_rule(
        &dir,
        "HelloWorld.Greeter.SayHello.YAML",
        "responses:\n  - body: { message: \"hi\" }\n",
    );

    let store = load(&dir, &registry);
    assert_eq!(store.candidates("helloworld.greeter.sayhello").len(), 1);
    assert!(store.orphan_keys().is_empty());
}

#[test]
fn test_document_arrays_concatenate_in_order() {
    let (dir, registry) = workspace();
    write_rule(
        &dir,
        "helloworld.Greeter.SayHello.json",
        r#"[
  {"responses": [{"body": {"message": "one"}}, {"body": {"message": "two"}}]},
  {"responses": [{"body": {"message": "three"}}]}
]"#,
    );

    let store = load(&dir, &registry);
    let candidates = store.candidates("helloworld.greeter.sayhello");
    assert_eq!(candidates.len(), 3);
    let bodies: Vec<&str> = candidates
        .iter()
        .map(|c| c.response.body.as_ref().unwrap()["message"].as_str().unwrap())
        .collect();
    assert_eq!(bodies, ["one", "two", "three"]);
    assert!(candidates.windows(2).all(|w| w[0].load_index < w[1].load_index));
}

#[test]
fn test_stream_fields_round_trip() {
    let (dir, registry) = workspace();
    write_rule(
        &dir,
        "helloworld.Greeter.SayHelloStream.yaml",
        r#"
responses:
  - stream_items:
      - { message: "a" }
      - { message: "b" }
    stream_delay_ms: 25
    stream_loop: true
    stream_random_order: true
"#,
    );

    let store = load(&dir, &registry);
    let candidate = &store.candidates("helloworld.greeter.sayhellostream")[0];
    assert_eq!(candidate.response.stream_items.len(), 2);
    assert_eq!(candidate.response.stream_delay_ms, 25);
    assert!(candidate.response.stream_loop);
    assert!(candidate.response.stream_random_order);
}

#[test]
fn test_reload_with_identical_inputs_is_idempotent() {
    let (dir, registry) = workspace();
    write_rule(
        &dir,
        "helloworld.Greeter.SayHello.yaml",
        "responses:\n  - body: { message: \"hi\" }\n    priority: 3\n",
    );

    let first = load(&dir, &registry);
    let second = load(&dir, &registry);

    assert_eq!(first.rule_keys(), second.rule_keys());
    assert_eq!(first.total_candidates(), second.total_candidates());
    assert_eq!(first.orphan_keys(), second.orphan_keys());

    let a = &first.candidates("helloworld.greeter.sayhello")[0];
    let b = &second.candidates("helloworld.greeter.sayhello")[0];
    assert_eq!(a.load_index, b.load_index);
    assert_eq!(a.response.priority, b.response.priority);
    assert_eq!(a.response.body, b.response.body);
}

#[test]
fn test_failed_file_fails_the_whole_load() {
    let (dir, registry) = workspace();
    write_rule(
        &dir,
        "helloworld.Greeter.SayHello.yaml",
        "responses:\n  - body: { message: \"hi\" }\n",
    );
    write_rule(&dir, "helloworld.Greeter.SayHelloStream.yaml", "responses: [");

    assert!(RuleStore::load(&dir.path().join("rules"), &registry).is_err());
}

#[test]
fn test_doc_level_match_is_carried_to_every_candidate() {
    let (dir, registry) = workspace();
    write_rule(
        &dir,
        "helloworld.Greeter.SayHello.yaml",
        r#"
match:
  metadata: { x-tenant: acme }
responses:
  - body: { message: "one" }
  - body: { message: "two" }
"#,
    );

    let store = load(&dir, &registry);
    let candidates = store.candidates("helloworld.greeter.sayhello");
    assert_eq!(candidates.len(), 2);
    for candidate in candidates {
        let doc_match = candidate.doc_match.as_ref().unwrap();
        assert_eq!(doc_match.metadata.len(), 1);
        assert_eq!(candidate.specificity(), 1);
    }
}
