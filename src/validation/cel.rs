// CEL evaluation capability
//
// The engine treats CEL as an optional capability: implementations without
// a CEL library report `Unsupported`, which is distinct from a violation
// and never fails the call.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CelOutcome {
    Valid,
    Violation { message: String },
    Unsupported,
}

pub trait CelEvaluator: Send + Sync {
    /// Evaluate `expression` against the message rendered as JSON.
    fn evaluate(&self, expression: &str, message: &Value) -> CelOutcome;
}

/// Built-in evaluator: no CEL engine is linked, so every expression is
/// reported as unsupported.
pub struct UnsupportedCelEvaluator;

impl CelEvaluator for UnsupportedCelEvaluator {
    fn evaluate(&self, _expression: &str, _message: &Value) -> CelOutcome {
        CelOutcome::Unsupported
    }
}
