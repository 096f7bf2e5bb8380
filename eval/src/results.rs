//! Result capture and persistence.
//!
//! Each eval run gets `results/<case>/<eval_run_id>/` holding `meta.json`,
//! `result.json` (the pipeline's result, when there is one) and `checks.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use reflexion::core::types::{Role, RunStatus};
use reflexion::result::RunResult;

use crate::outcome::Outcome;

#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub reasoner: String,
    pub result: Option<&'a RunResult>,
    pub stages: &'a [Role],
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Errors that kept the run from producing a result.
    pub errors: Vec<String>,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 of the case file.
    pub case_hash: String,
    pub reflexion_version: String,
    pub reasoner: String,
    pub run_id: Option<String>,
    pub status: Option<RunStatus>,
    pub final_score: Option<f64>,
    pub attempts: Option<u32>,
    pub stages: Vec<Role>,
    pub outcome: Option<Outcome>,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub errors: Vec<String>,
}

#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn capture_results(base_dir: &Path, input: CaptureInput<'_>) -> Result<PathBuf> {
    let results_dir = results_dir(base_dir, input.case_id, input.eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    let mut errors = input.errors;
    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err:#}"));
            String::new()
        }
    };

    if let Some(result) = input.result {
        write_json(&results_dir.join("result.json"), result).context("write result")?;
    }
    if !errors.is_empty() {
        warn!(errors = ?errors, "run captured with errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        reflexion_version: env!("CARGO_PKG_VERSION").to_string(),
        reasoner: input.reasoner,
        run_id: input.result.map(|result| result.run_id.clone()),
        status: input.result.map(|result| result.status),
        final_score: input.result.and_then(|result| result.final_score),
        attempts: input.result.map(|result| result.attempt + 1),
        stages: input.stages.to_vec(),
        outcome: None,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        errors,
    };
    write_json(&results_dir.join("meta.json"), &meta).context("write meta")?;
    debug!(results_dir = %results_dir.display(), "results captured");
    Ok(results_dir)
}

pub fn update_outcome(results_dir: &Path, outcome: Outcome) -> Result<()> {
    let meta_path = results_dir.join("meta.json");
    let mut meta: EvalMeta = serde_json::from_str(
        &fs::read_to_string(&meta_path).with_context(|| format!("read {}", meta_path.display()))?,
    )
    .context("parse meta")?;
    meta.outcome = Some(outcome);
    write_json(&meta_path, &meta)
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("serialize json")?;
    fs::write(path, format!("{contents}\n")).with_context(|| format!("write {}", path.display()))
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(contents)))
}
