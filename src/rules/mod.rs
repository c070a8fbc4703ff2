// Rule store: loads YAML/JSON rule files keyed by package.service.method

pub mod model;

pub use model::{Candidate, ResponseRule, RuleDocument, When};

use crate::schema::Registry;
use anyhow::{Context, Result, anyhow, bail};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const RULE_EXTENSIONS: [&str; 3] = ["yaml", "yml", "json"];

/// Immutable candidate map built on every (re)load. A failed load keeps
/// the previous store in place; the swap is all-or-nothing.
#[derive(Default, Debug)]
pub struct RuleStore {
    rules: HashMap<String, Vec<Candidate>>,
    /// Rule keys with no matching method in the current descriptor.
    orphan_keys: Vec<String>,
    files_loaded: usize,
}

impl RuleStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse every rule file under `rules_dir` against the given registry.
    pub fn load(rules_dir: &Path, registry: &Registry) -> Result<Self> {
        let files = collect_rule_files(rules_dir);
        debug!("Loading {} rule file(s) from {}", files.len(), rules_dir.display());

        let stream_methods: HashMap<String, bool> = registry
            .methods()
            .map(|m| (m.rule_key.clone(), m.response_stream))
            .collect();

        let mut rules: HashMap<String, Vec<Candidate>> = HashMap::new();
        let mut load_index = 0usize;

        for file in &files {
            let rule_key = rule_key_for(file)
                .ok_or_else(|| anyhow!("rule file has no usable name: {}", file.display()))?;
            let documents = parse_rule_file(file)
                .with_context(|| format!("failed to parse rule file {}", file.display()))?;

            let response_stream = stream_methods.get(&rule_key).copied();
            let candidates = rules.entry(rule_key.clone()).or_default();

            for document in documents {
                for response in &document.responses {
                    if response.is_stream() && response_stream == Some(false) {
                        bail!(
                            "rule file {} declares stream_items but {} is not server-streaming",
                            file.display(),
                            rule_key
                        );
                    }
                    if response.is_stream() && response.delay_ms > 0 {
                        info!(
                            "{}: delay_ms defers the first frame; stream_delay_ms paces items after it",
                            file.display()
                        );
                    }

                    candidates.push(Candidate {
                        rule_key: rule_key.clone(),
                        source_file: file
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default(),
                        load_index,
                        doc_match: document.match_when.clone(),
                        response: response.clone(),
                    });
                    load_index += 1;
                }
            }
        }

        let mut orphan_keys: Vec<String> = rules
            .keys()
            .filter(|key| !stream_methods.contains_key(*key))
            .cloned()
            .collect();
        orphan_keys.sort();

        Ok(Self {
            rules,
            orphan_keys,
            files_loaded: files.len(),
        })
    }

    pub fn candidates(&self, rule_key: &str) -> &[Candidate] {
        self.rules
            .get(rule_key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn rule_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.rules.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn orphan_keys(&self) -> &[String] {
        &self.orphan_keys
    }

    pub fn files_loaded(&self) -> usize {
        self.files_loaded
    }

    pub fn total_candidates(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }
}

/// Rule files are named `<package>.<service>.<method>.(yaml|yml|json)`;
/// the key is the lower-cased stem.
fn rule_key_for(file: &Path) -> Option<String> {
    let stem = file.file_stem()?.to_string_lossy();
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_lowercase())
}

fn collect_rule_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    if dir.is_dir() {
        let walker = walkdir::WalkDir::new(dir).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            !e.file_name().to_string_lossy().starts_with('.')
        });

        for entry in walker.flatten() {
            if entry.file_type().is_file() {
                let matches = entry
                    .path()
                    .extension()
                    .map(|ext| {
                        let ext = ext.to_string_lossy().to_lowercase();
                        RULE_EXTENSIONS.contains(&ext.as_str())
                    })
                    .unwrap_or(false);
                if matches {
                    files.push(entry.path().to_path_buf());
                }
            }
        }
    }

    // Load order is the matcher's final tiebreak, so it must be stable
    files.sort();
    files
}

/// A rule file holds one document or an array of documents.
fn parse_rule_file(file: &Path) -> Result<Vec<RuleDocument>> {
    let content = std::fs::read_to_string(file)?;

    let is_json = file
        .extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let value: serde_json::Value = if is_json {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Into::into))
            .collect(),
        other => Ok(vec![serde_json::from_value(other)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::loader;

    fn greeter_registry() -> Registry {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greeter.proto"),
            r#"
syntax = "proto3";
package helloworld;
message HelloRequest { string name = 1; }
message HelloReply { string message = 1; }
service Greeter {
  rpc SayHello(HelloRequest) returns (HelloReply);
  rpc SayHelloStream(HelloRequest) returns (stream HelloReply);
}
"#,
        )
        .unwrap();
        Registry::from_loaded(loader::load(dir.path(), &[]).unwrap())
    }

    #[test]
    fn test_load_merges_files_and_documents() {
        let registry = greeter_registry();
        let rules_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            rules_dir.path().join("helloworld.Greeter.SayHello.yaml"),
            r#"
responses:
  - body: { message: "first" }
"#,
        )
        .unwrap();
        std::fs::write(
            rules_dir.path().join("helloworld.greeter.sayhello.json"),
            r#"[{"responses": [{"body": {"message": "second"}}]}]"#,
        )
        .unwrap();

        let store = RuleStore::load(rules_dir.path(), &registry).unwrap();
        let candidates = store.candidates("helloworld.greeter.sayhello");
        assert_eq!(candidates.len(), 2);
        // json sorts before yaml, so it carries the lower load index
        assert_eq!(candidates[0].source_file, "helloworld.greeter.sayhello.json");
        assert!(candidates[0].load_index < candidates[1].load_index);
    }

    #[test]
    fn test_stream_items_on_unary_method_is_an_error() {
        let registry = greeter_registry();
        let rules_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            rules_dir.path().join("helloworld.Greeter.SayHello.yaml"),
            r#"
responses:
  - stream_items:
      - { message: "a" }
"#,
        )
        .unwrap();

        let err = RuleStore::load(rules_dir.path(), &registry).unwrap_err();
        assert!(err.to_string().contains("not server-streaming"));
    }

    #[test]
    fn test_orphan_keys_are_flagged() {
        let registry = greeter_registry();
        let rules_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            rules_dir.path().join("other.Service.Method.yaml"),
            "responses:\n  - body: {}\n",
        )
        .unwrap();

        let store = RuleStore::load(rules_dir.path(), &registry).unwrap();
        assert_eq!(store.orphan_keys(), ["other.service.method"]);
    }

    #[test]
    fn test_broken_file_fails_whole_load() {
        let registry = greeter_registry();
        let rules_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            rules_dir.path().join("helloworld.Greeter.SayHello.yaml"),
            "responses:\n  - body: { message: \"ok\" }\n",
        )
        .unwrap();
        std::fs::write(
            rules_dir.path().join("helloworld.Greeter.SayHelloStream.yaml"),
            "responses: [",
        )
        .unwrap();

        assert!(RuleStore::load(rules_dir.path(), &registry).is_err());
    }
}
