//! Embedded JSON Schemas for model replies (Draft 2020-12).

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;

pub const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
pub const REVIEW_SCHEMA: &str = include_str!("../../schemas/review.schema.json");

static PLAN_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(PLAN_SCHEMA));
static REVIEW_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| compile(REVIEW_SCHEMA));

fn compile(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema is valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("embedded schema compiles")
}

/// Validate a plan reply. Returns every violation message.
pub fn validate_plan(instance: &Value) -> Result<(), Vec<String>> {
    collect(&PLAN_VALIDATOR, instance)
}

/// Validate a review reply. Returns every violation message.
pub fn validate_review(instance: &Value) -> Result<(), Vec<String>> {
    collect(&REVIEW_VALIDATOR, instance)
}

fn collect(validator: &Validator, instance: &Value) -> Result<(), Vec<String>> {
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_requires_tasks_array() {
        assert!(validate_plan(&json!({"tasks": [{"agent": "coder", "task": "x"}]})).is_ok());
        assert!(validate_plan(&json!({"steps": []})).is_err());
        assert!(validate_plan(&json!({"tasks": [{"task": "no agent"}]})).is_err());
    }

    #[test]
    fn review_requires_score_and_feedback() {
        assert!(validate_review(&json!({"score": 0.5, "feedback": "ok"})).is_ok());
        let errors = validate_review(&json!({"score": "high"})).unwrap_err();
        assert!(!errors.is_empty());
    }
}
