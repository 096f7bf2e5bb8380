//! Check evaluation against a finished run.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use reflexion::core::types::Role;
use reflexion::result::RunResult;

use crate::case::{Check, CheckCategory};

/// Collected check outcomes for a run, persisted to `checks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub label: String,
    pub category: CheckCategory,
    pub passed: bool,
    /// What was observed, e.g. the actual status or score.
    pub detail: String,
}

/// Evaluate `checks` against `result`. `stages` lists the roles whose stage
/// ran, in order, as seen through run events.
#[instrument(skip_all, fields(check_count = checks.len()))]
pub fn run_checks(checks: &[Check], result: &RunResult, stages: &[Role]) -> Judgment {
    let outcomes = checks
        .iter()
        .map(|check| {
            let (passed, detail) = evaluate(check, result, stages);
            let label = check.label();
            debug!(check = %label, passed, detail = %detail, "check result");
            CheckOutcome {
                label,
                category: check.category(),
                passed,
                detail,
            }
        })
        .collect();
    Judgment { checks: outcomes }
}

fn evaluate(check: &Check, result: &RunResult, stages: &[Role]) -> (bool, String) {
    match check {
        Check::StatusIs { status } => (result.status == *status, result.status.to_string()),
        Check::MinScore { score } => match result.final_score {
            Some(actual) => (actual >= *score, format!("{actual:.2}")),
            None => (false, "no review".to_string()),
        },
        Check::StageRan { role } => {
            let runs = stages.iter().filter(|ran| *ran == role).count();
            (runs > 0, format!("{runs} run(s)"))
        }
        Check::HasPlan => (
            !result.plan.is_empty(),
            format!("plan: {}", result.plan.describe()),
        ),
        Check::HasResearch => (
            !result.research_notes.is_empty(),
            format!("{} note(s)", result.research_notes.len()),
        ),
        Check::HasCode => match &result.code {
            Some(code) => (!code.code.trim().is_empty(), format!("{} code", code.language)),
            None => (false, "no code".to_string()),
        },
        Check::CodeValid => match &result.code {
            Some(code) if code.valid => (true, "valid".to_string()),
            Some(code) => (
                false,
                code.validation_error
                    .clone()
                    .unwrap_or_else(|| "invalid".to_string()),
            ),
            None => (false, "no code".to_string()),
        },
    }
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
