// Candidate selection: eligibility, specificity, priority tiebreak

pub mod equality;
pub mod paths;

use crate::rules::{Candidate, When};
use serde_json::Value;
use std::collections::HashMap;

/// Pick the winning candidate for a call, or `None` when nothing matches.
///
/// Ranking: priority desc, then specificity (number of compared leaves)
/// desc, then load order asc — so equal candidates resolve to the one
/// loaded first, deterministically.
pub fn select<'a>(
    candidates: &'a [Candidate],
    metadata: &HashMap<String, String>,
    request: &Value,
) -> Option<&'a Candidate> {
    candidates
        .iter()
        .filter(|candidate| is_eligible(candidate, metadata, request))
        .max_by(|a, b| {
            a.response
                .priority
                .cmp(&b.response.priority)
                .then_with(|| a.specificity().cmp(&b.specificity()))
                // lower load index wins, so compare reversed
                .then_with(|| b.load_index.cmp(&a.load_index))
        })
}

fn is_eligible(
    candidate: &Candidate,
    metadata: &HashMap<String, String>,
    request: &Value,
) -> bool {
    if let Some(when) = &candidate.doc_match {
        if !when_matches(when, metadata, request) {
            return false;
        }
    }
    match &candidate.response.when {
        Some(when) => when_matches(when, metadata, request),
        None => true,
    }
}

fn when_matches(when: &When, metadata: &HashMap<String, String>, request: &Value) -> bool {
    for (key, expected) in &when.metadata {
        let Some(actual) = metadata.get(&key.to_lowercase()) else {
            return false;
        };
        if actual != &metadata_value_string(expected) {
            return false;
        }
    }

    for (path, expected) in &when.request {
        match paths::walk(request, path) {
            // null in the rule means "absent or null"
            Some(actual) => {
                if expected.is_null() {
                    if !actual.is_null() {
                        return false;
                    }
                } else if !equality::deep_equal(actual, expected) {
                    return false;
                }
            }
            None => {
                if !expected.is_null() {
                    return false;
                }
            }
        }
    }

    true
}

/// Header values in rules may be written as strings, numbers or booleans;
/// they compare against the incoming header text.
fn metadata_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
