//! Plan parsing, normalization, and feedback-driven revision.
//!
//! The orchestrator's reply is expected to carry
//! `{"tasks": [{"agent": "...", "task": "..."}]}`, fenced or bare. Parsing is
//! strict about the shape (schema-checked) but lenient about agent aliases.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::fenced::extract_json_block;
use crate::core::schema::validate_plan;
use crate::core::types::{Plan, PlanStep, StepKind};

/// Failure to obtain a usable plan for the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("planning reasoning failed: {0}")]
    Reasoning(String),
    #[error("plan reply contained no JSON object")]
    MissingJson,
    #[error("plan reply is not valid JSON: {0}")]
    Json(String),
    #[error("plan reply violates schema: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("unknown agent '{0}' in plan")]
    UnknownAgent(String),
}

#[derive(Debug, Deserialize)]
struct WirePlan {
    tasks: Vec<WireTask>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    agent: String,
    #[serde(default)]
    task: String,
}

/// Parse and normalize an orchestrator reply.
///
/// Steps with an empty task inherit the goal. `critic` and `orchestrator`
/// entries are dropped since those stages always run.
pub fn parse_plan(reply: &str, goal: &str) -> Result<Plan, PlanningError> {
    let raw = extract_json_block(reply).ok_or(PlanningError::MissingJson)?;
    let value: Value =
        serde_json::from_str(raw).map_err(|err| PlanningError::Json(err.to_string()))?;
    validate_plan(&value).map_err(PlanningError::Schema)?;
    let wire: WirePlan =
        serde_json::from_value(value).map_err(|err| PlanningError::Json(err.to_string()))?;

    let mut steps = Vec::with_capacity(wire.tasks.len());
    for task in wire.tasks {
        let Some(kind) = step_kind(&task.agent)? else {
            continue;
        };
        let description = task.task.trim();
        let description = if description.is_empty() {
            goal.trim()
        } else {
            description
        };
        steps.push(PlanStep::new(kind, description));
    }
    Ok(normalize(Plan::new(steps)))
}

fn step_kind(agent: &str) -> Result<Option<StepKind>, PlanningError> {
    let kind = match agent.trim().to_ascii_lowercase().as_str() {
        "researcher" | "research" | "search" => StepKind::Research,
        "coder" | "code" | "coding" => StepKind::Code,
        "skip_code" | "skip-code" | "none" | "no_code" => StepKind::SkipCode,
        "critic" | "orchestrator" => return Ok(None),
        _ => return Err(PlanningError::UnknownAgent(agent.to_string())),
    };
    Ok(Some(kind))
}

/// Enforce plan invariants: a `SkipCode` step removes every `Code` step and at
/// most one `SkipCode` survives.
pub fn normalize(plan: Plan) -> Plan {
    if !plan.contains(StepKind::SkipCode) {
        return plan;
    }
    let mut seen_skip = false;
    let steps = plan
        .steps
        .into_iter()
        .filter(|step| match step.kind {
            StepKind::Code => false,
            StepKind::SkipCode => !std::mem::replace(&mut seen_skip, true),
            StepKind::Research => true,
        })
        .collect();
    Plan::new(steps)
}

static MISSING_INFO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(missing|lacks?|lacking|insufficient|incomplete|more (detail|information|research|context)|not enough|unsupported|no (sources?|evidence|citations?))\b",
    )
    .expect("valid missing-info regex")
});

static BROKEN_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(syntax error|does not (compile|run|parse)|doesn't (compile|run|parse)|invalid code|broken code|bug|code (is )?(wrong|incorrect|missing))\b",
    )
    .expect("valid broken-code regex")
});

/// True when critic feedback asks for more information.
pub fn signals_missing_information(feedback: &str) -> bool {
    MISSING_INFO_RE.is_match(feedback)
}

/// True when critic feedback complains about the code.
pub fn signals_broken_code(feedback: &str) -> bool {
    BROKEN_CODE_RE.is_match(feedback)
}

/// Adjust a freshly parsed retry plan so it addresses the latest feedback.
pub fn revise_for_feedback(plan: Plan, feedback: &str, goal: &str) -> Plan {
    let mut steps = plan.steps;
    if signals_missing_information(feedback) && !steps.iter().any(|s| s.kind == StepKind::Research)
    {
        steps.insert(
            0,
            PlanStep::new(StepKind::Research, format!("{goal} (address: {feedback})")),
        );
    }
    if signals_broken_code(feedback)
        && !steps
            .iter()
            .any(|s| matches!(s.kind, StepKind::Code | StepKind::SkipCode))
    {
        steps.push(PlanStep::new(
            StepKind::Code,
            format!("{goal} (fix: {feedback})"),
        ));
    }
    Plan::new(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOAL: &str = "Explain binary search";

    fn kinds(plan: &Plan) -> Vec<StepKind> {
        plan.steps.iter().map(|step| step.kind).collect()
    }

    #[test]
    fn parses_fenced_plan_with_aliases() {
        let reply = "Here you go\n```json\n{\"tasks\": [\
            {\"agent\": \"research\", \"task\": \"find sources\"},\
            {\"agent\": \"Coder\", \"task\": \"\"}]}\n```";
        let plan = parse_plan(reply, GOAL).expect("plan");
        assert_eq!(kinds(&plan), vec![StepKind::Research, StepKind::Code]);
        assert_eq!(plan.steps[0].task, "find sources");
        assert_eq!(plan.steps[1].task, GOAL);
    }

    #[test]
    fn empty_task_list_is_empty_plan() {
        let plan = parse_plan("{\"tasks\": []}", GOAL).expect("plan");
        assert!(plan.is_empty());
    }

    #[test]
    fn critic_entries_are_dropped() {
        let reply = r#"{"tasks": [{"agent": "researcher", "task": "a"}, {"agent": "critic"}]}"#;
        let plan = parse_plan(reply, GOAL).expect("plan");
        assert_eq!(kinds(&plan), vec![StepKind::Research]);
    }

    #[test]
    fn rejects_unknown_agent_and_bad_shape() {
        let err = parse_plan(r#"{"tasks": [{"agent": "poet"}]}"#, GOAL).unwrap_err();
        assert_eq!(err, PlanningError::UnknownAgent("poet".to_string()));

        let err = parse_plan(r#"{"steps": []}"#, GOAL).unwrap_err();
        assert!(matches!(err, PlanningError::Schema(_)));

        let err = parse_plan("I cannot plan this.", GOAL).unwrap_err();
        assert_eq!(err, PlanningError::MissingJson);
    }

    #[test]
    fn skip_code_removes_code_steps() {
        let reply = r#"{"tasks": [
            {"agent": "coder", "task": "a"},
            {"agent": "researcher", "task": "b"},
            {"agent": "skip_code", "task": "c"},
            {"agent": "none", "task": "d"}
        ]}"#;
        let plan = parse_plan(reply, GOAL).expect("plan");
        assert_eq!(kinds(&plan), vec![StepKind::Research, StepKind::SkipCode]);
    }

    #[test]
    fn revision_adds_research_for_missing_information() {
        let plan = Plan::new(vec![PlanStep::new(StepKind::Code, "write it")]);
        let revised = revise_for_feedback(plan, "Missing sources for the claims.", GOAL);
        assert_eq!(kinds(&revised), vec![StepKind::Research, StepKind::Code]);
    }

    #[test]
    fn revision_adds_code_for_broken_code_unless_skipped() {
        let plan = Plan::new(vec![PlanStep::new(StepKind::Research, "look")]);
        let revised = revise_for_feedback(plan, "The code has a syntax error.", GOAL);
        assert_eq!(kinds(&revised), vec![StepKind::Research, StepKind::Code]);

        let skipped = Plan::new(vec![PlanStep::new(StepKind::SkipCode, "none")]);
        let revised = revise_for_feedback(skipped, "syntax error", GOAL);
        assert_eq!(kinds(&revised), vec![StepKind::SkipCode]);
    }

    #[test]
    fn revision_leaves_plan_alone_for_neutral_feedback() {
        let plan = Plan::new(vec![PlanStep::new(StepKind::Research, "look")]);
        let revised = revise_for_feedback(plan.clone(), "Tone could be friendlier.", GOAL);
        assert_eq!(revised, plan);
    }
}
