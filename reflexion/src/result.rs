//! Externally visible result of a run, assembled once from the final state.

use std::fmt::Write as _;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::state::RunState;
use crate::core::types::{CodeArtifact, Plan, RunStatus, ScoreRecord};

/// Feedback longer than this is abbreviated in [`RunResult::history`].
pub const HISTORY_FEEDBACK_CHARS: usize = 280;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub goal: String,
    pub status: RunStatus,
    /// Deliverable text: research and code of the accepted (or best) attempt.
    pub output: String,
    pub final_score: Option<f64>,
    pub best_score: Option<f64>,
    pub attempt: u32,
    pub history: Vec<ScoreRecord>,
    pub plan: Plan,
    pub research_notes: Vec<String>,
    pub code: Option<CodeArtifact>,
    pub budget_remaining: u32,
    pub steps_used: u32,
    pub stop_reason: String,
    pub duration_ms: u64,
}

impl RunResult {
    /// Collapse a finished run into its result.
    ///
    /// A successful run reports its current artifacts. A failed run reports the
    /// best-scoring attempt when one exists, so a late regression does not
    /// hide better earlier work.
    pub fn assemble(state: &RunState, duration: Duration) -> Self {
        let use_best = !state.status().is_success()
            && state
                .best
                .as_ref()
                .is_some_and(|best| Some(best.score) > state.latest_review().map(|r| r.score));
        let (notes, code) = match (&state.best, use_best) {
            (Some(best), true) => (best.research_notes.clone(), best.code_artifact.clone()),
            _ => (state.research_notes.clone(), state.code_artifact.clone()),
        };

        Self {
            run_id: state.run_id.clone(),
            goal: state.goal.clone(),
            status: state.status(),
            output: render_output(&notes, code.as_ref()),
            final_score: state.latest_review().map(|record| record.score),
            best_score: state.best_score(),
            attempt: state.attempt,
            history: state
                .score_history
                .iter()
                .map(|record| ScoreRecord {
                    attempt: record.attempt,
                    score: record.score,
                    feedback: abbreviate(&record.feedback, HISTORY_FEEDBACK_CHARS),
                })
                .collect(),
            plan: state.plan.clone(),
            research_notes: notes,
            code,
            budget_remaining: state.budget.remaining(),
            steps_used: state.budget.used(),
            stop_reason: state.stop_reason().unwrap_or("unfinished").to_string(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// One-line summary for logs and the CLI.
    pub fn summary_line(&self) -> String {
        let score = self
            .final_score
            .map_or_else(|| "-".to_string(), |score| format!("{score:.2}"));
        format!(
            "{} after {} attempt(s), score {}, {} step(s) used ({})",
            self.status,
            self.attempt + 1,
            score,
            self.steps_used,
            self.stop_reason
        )
    }
}

fn render_output(notes: &[String], code: Option<&CodeArtifact>) -> String {
    let mut out = String::new();
    if !notes.is_empty() {
        out.push_str("## Research\n\n");
        for note in notes {
            let _ = writeln!(out, "{}\n", note.trim());
        }
    }
    if let Some(code) = code {
        let _ = writeln!(out, "## Code\n\n```{}\n{}\n```", code.language, code.code.trim_end());
        if let Some(err) = &code.validation_error {
            let _ = writeln!(out, "\nValidation: {err}");
        }
    }
    out.trim_end().to_string()
}

/// Shorten `text` to at most `max_chars` characters, marking the cut.
pub fn abbreviate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    short.push('…');
    short
}
