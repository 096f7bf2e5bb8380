//! Case execution: run the pipeline in-process, judge it, persist results.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use reflexion::controller::RunController;
use reflexion::core::events::RunEvent;
use reflexion::core::types::Role;
use reflexion::request::{RunOverrides, RunRequest};

use crate::case::CaseFile;
use crate::judge::{Judgment, run_checks, write_judgment};
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, update_outcome};

#[derive(Debug)]
pub struct RunOutcome {
    pub eval_run_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
}

/// Unique per run; millisecond resolution keeps repeated runs apart.
pub fn new_eval_run_id() -> String {
    format!("eval-{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"))
}

/// Run one case end to end with `controller` and write its results under
/// `results_base/<case>/<eval_run_id>/`.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub async fn run_case(
    controller: &RunController,
    results_base: &Path,
    case_path: &Path,
    case: &CaseFile,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    info!("case run started");
    let request = RunRequest::new(case.case.goal.clone()).with_overrides(RunOverrides {
        max_retries: case.config.max_retries,
        quality_threshold: case.config.quality_threshold,
        max_steps: case.config.max_steps,
    });

    let eval_run_id = new_eval_run_id();
    let started_at = Utc::now();
    let mut stages: Vec<Role> = Vec::new();
    let mut record_stage = |event: &RunEvent| {
        if let RunEvent::StageStarted { role, .. } = event {
            stages.push(*role);
        }
    };
    let run = controller.run_with(&request, cancel, &mut record_stage).await;
    let finished_at = Utc::now();

    let (result, errors) = match run {
        Ok(result) => (Some(result), Vec::new()),
        Err(err) => {
            warn!(err = %err, "case request rejected");
            (None, vec![format!("invalid request: {err}")])
        }
    };

    let results_dir = capture_results(
        results_base,
        CaptureInput {
            case_id: &case.case.id,
            case_path,
            eval_run_id: &eval_run_id,
            reasoner: controller.reasoner().describe(),
            result: result.as_ref(),
            stages: &stages,
            started_at,
            finished_at,
            errors,
        },
    )
    .context("capture results")?;

    let judgment = match &result {
        Some(result) => run_checks(&case.checks, result, &stages),
        None => Judgment { checks: Vec::new() },
    };
    write_judgment(&results_dir.join("checks.json"), &judgment).context("write checks")?;

    let outcome = classify_outcome(result.as_ref(), &judgment);
    update_outcome(&results_dir, outcome).context("update outcome")?;
    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
    })
}
