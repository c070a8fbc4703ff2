// Rule file data model

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// One rule document: an optional document-wide `match` gate plus an
/// ordered list of response options.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDocument {
    #[serde(rename = "match", default)]
    pub match_when: Option<When>,
    #[serde(default)]
    pub responses: Vec<ResponseRule>,
}

/// Predicate over `{metadata, request}`. Absent predicate matches anything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct When {
    /// Header name → expected value. Keys are compared case-insensitively.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Field path (dotted, with optional `[idx]` segments) → expected value.
    #[serde(default)]
    pub request: serde_json::Map<String, Value>,
}

impl When {
    /// Number of leaf comparisons this predicate performs.
    pub fn leaf_count(&self) -> usize {
        self.metadata.len()
            + self
                .request
                .values()
                .map(count_leaves)
                .sum::<usize>()
    }
}

fn count_leaves(value: &Value) -> usize {
    match value {
        Value::Object(map) if !map.is_empty() => map.values().map(count_leaves).sum(),
        Value::Array(items) if !items.is_empty() => items.iter().map(count_leaves).sum(),
        _ => 1,
    }
}

/// One response option under a rule key.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseRule {
    #[serde(default)]
    pub when: Option<When>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub trailers: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub stream_items: Vec<Value>,
    #[serde(default = "default_stream_delay_ms")]
    pub stream_delay_ms: u64,
    #[serde(default)]
    pub stream_loop: bool,
    #[serde(default)]
    pub stream_random_order: bool,
}

pub fn default_stream_delay_ms() -> u64 {
    100
}

impl ResponseRule {
    pub fn is_stream(&self) -> bool {
        !self.stream_items.is_empty()
    }
}

/// A response option flattened into the store's candidate list.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub rule_key: String,
    pub source_file: String,
    /// Global position across all loaded files; the deterministic tiebreak.
    pub load_index: usize,
    pub doc_match: Option<When>,
    pub response: ResponseRule,
}

impl Candidate {
    /// Specificity counts every leaf of the document gate and the
    /// response-level predicate together.
    pub fn specificity(&self) -> usize {
        let doc = self.doc_match.as_ref().map(When::leaf_count).unwrap_or(0);
        let own = self
            .response
            .when
            .as_ref()
            .map(When::leaf_count)
            .unwrap_or(0);
        doc + own
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_defaults() {
        let yaml = r#"
responses:
  - body: { message: "hi" }
"#;
        let doc: RuleDocument = serde_yaml::from_str(yaml).unwrap();
        let response = &doc.responses[0];
        assert_eq!(response.delay_ms, 0);
        assert_eq!(response.priority, 0);
        assert_eq!(response.stream_delay_ms, 100);
        assert!(!response.stream_loop);
        assert!(!response.stream_random_order);
        assert!(!response.is_stream());
    }

    #[test]
    fn test_leaf_count_nested() {
        let when: When = serde_json::from_value(serde_json::json!({
            "metadata": {"x-tenant": "acme"},
            "request": {
                "user.name": "bob",
                "filters": {"kind": "a", "limit": 5}
            }
        }))
        .unwrap();
        // one metadata leaf, one path leaf, two nested object leaves
        assert_eq!(when.leaf_count(), 4);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
responses:
  - body: {}
    stream_items_typo: []
"#;
        assert!(serde_yaml::from_str::<RuleDocument>(yaml).is_err());
    }
}
