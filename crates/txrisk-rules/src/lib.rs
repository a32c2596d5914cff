//! Deterministic rule-condition evaluation over transactions and features.
//!
//! Rules are data (`txrisk_schemas::Rule`), not code: the engine walks a
//! closed `RuleCondition` tree and never interprets arbitrary expressions.

mod engine;
mod types;

pub use engine::{baseline_rules, evaluate_condition, evaluate_rules};
pub use types::{resolve_field, RuleContext};
