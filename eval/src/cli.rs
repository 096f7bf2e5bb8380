//! CLI command implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reflexion::controller::RunController;
use reflexion::io::backends::build_reasoner;
use reflexion::io::config::{load_config, resolve_secret};
use reflexion::tools::default_registry;

use crate::case::{CaseFile, discover_cases};
use crate::config::apply_case_config;
use crate::report::{aggregate, ratio};
use crate::run::run_case;

fn cases_dir(repo_root: &Path) -> std::path::PathBuf {
    repo_root.join("eval").join("cases")
}

fn results_dir(repo_root: &Path) -> std::path::PathBuf {
    repo_root.join("eval").join("results")
}

pub fn list_cases(repo_root: &Path) -> Result<()> {
    for case in discover_cases(&cases_dir(repo_root))? {
        println!("{}\t{}", case.case.id, case.case.goal);
    }
    Ok(())
}

/// Run a case `runs` times against the collaborators described by
/// `config_path` with the case overrides applied.
pub async fn run_case_by_id(
    repo_root: &Path,
    config_path: &Path,
    case_id: &str,
    runs: u32,
) -> Result<()> {
    let case_path = cases_dir(repo_root).join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    let config = apply_case_config(load_config(config_path)?, &case.config)?;
    debug!(case_id, runs, "case loaded");

    let reasoner = build_reasoner(&config, resolve_secret(&config.reasoning.api_key_env))?;
    let tools = default_registry(&config, resolve_secret(&config.search.api_key_env));
    let controller = RunController::new(Arc::new(config), reasoner, Arc::new(tools));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling case run");
                cancel.cancel();
            }
        }
    });

    info!(case_id, runs, "starting runs");
    for run_num in 1..=runs {
        if cancel.is_cancelled() {
            break;
        }
        debug!(case_id, run_num, runs, "starting run");
        let outcome = run_case(&controller, &results_dir(repo_root), &case_path, &case, &cancel)
            .await
            .context("run case")?;
        println!(
            "run: case={} eval_run_id={} outcome={:?} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.results_dir.display()
        );
    }
    Ok(())
}

pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let (summary, warnings) = aggregate(&results_dir(repo_root).join(case_id))?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} exhausted={} error={}",
        summary.success, summary.fail, summary.exhausted, summary.error
    );
    if let Some(rate) = summary.success_rate() {
        println!("report: success_rate={:.1}%", rate * 100.0);
    }
    if let Some(rate) = ratio(summary.tool_recall) {
        println!("report: tool_recall={:.1}%", rate * 100.0);
    }
    if let Some(rate) = ratio(summary.instruction_following) {
        println!("report: instruction_following={:.1}%", rate * 100.0);
    }
    if let Some(score) = summary.avg_final_score {
        println!("report: avg_final_score={score:.2}");
    }
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={avg:.2}");
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {label} {passed}/{total}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let case_results = results_dir(repo_root).join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }
    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}
