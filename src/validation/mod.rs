// Validation engine: constraint extraction and enforcement
//
// Two dialects (pgv and protovalidate) lower into one neutral IR; the
// engine evaluates the IR against decoded requests. No dialect name leaks
// past the extractors.

pub mod cel;
pub mod checks;
pub mod engine;
pub mod ir;
mod options;
pub mod pgv;
pub mod protovalidate;

pub use cel::{CelEvaluator, CelOutcome, UnsupportedCelEvaluator};
pub use engine::{ValidationReport, Validator};
pub use ir::{ConstraintKind, FieldConstraint, MessageConstraint, ValidationIr};
