//! Researcher stage: search, then summarize the results into a note.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;
use tracing::{debug, warn};

use crate::core::state::RunState;
use crate::core::types::Role;
use crate::io::prompt::PromptInputs;
use crate::io::reasoning::ReasoningError;
use crate::result::abbreviate;
use crate::tools::{CALCULATE, ToolError, WEB_SEARCH};

use super::{StageContext, StageOutcome};

/// Hard cap on tool calls per researcher invocation.
pub const MAX_SEARCH_CALLS: u32 = 3;

static MATH_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(calculate|compute|evaluate|solve|how much|what is)\b")
        .expect("valid math intent regex")
});

static EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(*-?\d[\d.]*\)*(?:\s*[-+*/%^]\s*\(*-?\d[\d.]*\)*)+")
        .expect("valid expression regex")
});

/// Arithmetic expression the task asks to evaluate, if any.
pub fn arithmetic_expression(task: &str) -> Option<&str> {
    if !MATH_INTENT_RE.is_match(task) {
        return None;
    }
    EXPRESSION_RE.find(task).map(|m| m.as_str().trim())
}

pub(super) async fn run(ctx: &StageContext<'_>, state: &mut RunState, task: &str) -> StageOutcome {
    let cap = MAX_SEARCH_CALLS.min(ctx.config.research.max_search_calls) as usize;
    let mut queries = vec![task.to_string()];
    if let Some(feedback) = state.latest_feedback() {
        queries.push(format!("{} {}", state.goal, abbreviate(feedback, 200)));
    }

    let mut calls = 0usize;
    let mut results: Vec<String> = Vec::new();
    let mut notes_added = 0usize;
    let mut degraded = false;

    if let Some(expression) = arithmetic_expression(task)
        && calls < cap
    {
        calls += 1;
        match ctx
            .tool(state, CALCULATE, &json!({ "expression": expression }))
            .await
        {
            Ok(value) => results.push(format!("Calculation: {expression} = {}", value["result"])),
            Err(ToolError::Cancelled(_)) => return StageOutcome::Cancelled,
            Err(err) => {
                warn!(err = %err, "calculation failed");
                state.append_note(format!("calculation unavailable: {err}"));
                notes_added += 1;
                degraded = true;
            }
        }
    }

    for query in &queries {
        if calls >= cap {
            break;
        }
        calls += 1;
        match ctx.tool(state, WEB_SEARCH, &json!({ "query": query })).await {
            Ok(value) => {
                let text = value["text"].as_str().unwrap_or("No results found");
                results.push(format!("Results for \"{query}\":\n{text}"));
            }
            Err(ToolError::Cancelled(_)) => return StageOutcome::Cancelled,
            Err(err) => {
                warn!(err = %err, "search failed");
                state.append_note(format!("search unavailable: {err}"));
                notes_added += 1;
                degraded = true;
            }
        }
    }
    debug!(calls, results = results.len(), "tool phase finished");

    let results_text = if results.is_empty() {
        "(search unavailable, answer from general knowledge and say so)".to_string()
    } else {
        results.join("\n\n")
    };
    let inputs = PromptInputs {
        goal: state.goal.clone(),
        task: task.to_string(),
        attempt: state.attempt,
        feedback: state.latest_feedback().map(str::to_string),
        notes: state.research_notes.clone(),
        results: results_text,
        ..PromptInputs::default()
    };

    match ctx.reason(state, Role::Researcher, &inputs).await {
        Ok(summary) => {
            state.append_note(summary.trim());
            notes_added += 1;
        }
        Err(ReasoningError::Cancelled) => return StageOutcome::Cancelled,
        Err(err) => {
            warn!(err = %err, "research summary failed");
            state.append_note(format!("research summary unavailable: {err}"));
            notes_added += 1;
            for raw in results {
                state.append_note(raw);
                notes_added += 1;
            }
            degraded = true;
        }
    }

    StageOutcome::Researched {
        notes_added,
        degraded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_arithmetic_with_intent() {
        assert_eq!(
            arithmetic_expression("Calculate (12 + 8) * 3 for the report"),
            Some("(12 + 8) * 3")
        );
        assert_eq!(arithmetic_expression("What is 2^10?"), Some("2^10"));
    }

    #[test]
    fn ignores_numbers_without_intent() {
        assert_eq!(arithmetic_expression("Summarize events of 2020-2024"), None);
        assert_eq!(arithmetic_expression("Calculate the benefits of tests"), None);
    }
}
