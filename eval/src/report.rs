use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::case::CheckCategory;
use crate::judge::Judgment;
use crate::outcome::Outcome;
use crate::results::EvalMeta;

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub exhausted: usize,
    pub error: usize,
    pub avg_duration_secs: Option<f64>,
    pub avg_final_score: Option<f64>,
    /// `label -> (passed, total)`.
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
    /// `stage_ran` checks across runs.
    pub tool_recall: (usize, usize),
    /// Requirement checks across runs.
    pub instruction_following: (usize, usize),
}

impl ReportSummary {
    pub fn success_rate(&self) -> Option<f64> {
        ratio((self.success, self.runs))
    }
}

/// `passed / total`, or `None` when nothing was measured.
pub fn ratio((passed, total): (usize, usize)) -> Option<f64> {
    (total > 0).then(|| passed as f64 / total as f64)
}

pub fn load_run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let path = entry.context("read entry")?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Summarize every run under `case_results_dir`. Unreadable runs are skipped
/// with a warning.
pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();
    let mut total_duration = 0.0;
    let mut scores = Vec::new();

    for run_dir in load_run_dirs(case_results_dir)? {
        let meta: EvalMeta = match read_json(&run_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!("skip {}: meta.json invalid ({err:#})", run_dir.display()));
                continue;
            }
        };
        let judgment: Judgment = match read_json(&run_dir.join("checks.json")) {
            Ok(judgment) => judgment,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: checks.json invalid ({err:#})",
                    run_dir.display()
                ));
                continue;
            }
        };

        summary.runs += 1;
        match meta.outcome {
            Some(Outcome::Success) => summary.success += 1,
            Some(Outcome::Fail) => summary.fail += 1,
            Some(Outcome::Exhausted) => summary.exhausted += 1,
            Some(Outcome::Error) | None => summary.error += 1,
        }
        total_duration += meta.duration_secs;
        scores.extend(meta.final_score);

        for check in &judgment.checks {
            let passed = usize::from(check.passed);
            let entry = summary
                .check_pass_rates
                .entry(check.label.clone())
                .or_insert((0, 0));
            entry.0 += passed;
            entry.1 += 1;
            let bucket = match check.category {
                CheckCategory::ToolRecall => &mut summary.tool_recall,
                CheckCategory::Requirement => &mut summary.instruction_following,
            };
            bucket.0 += passed;
            bucket.1 += 1;
        }
    }

    if summary.runs > 0 {
        summary.avg_duration_secs = Some(total_duration / summary.runs as f64);
    }
    if !scores.is_empty() {
        summary.avg_final_score = Some(scores.iter().sum::<f64>() / scores.len() as f64);
    }
    Ok((summary, warnings))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
