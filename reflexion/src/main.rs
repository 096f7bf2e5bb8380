//! `reflexion` command-line interface.
//!
//! `run` drives one goal through the pipeline and prints the deliverable;
//! `tool` invokes a single registered tool; `config` shows or writes the
//! configuration file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use reflexion::controller::RunController;
use reflexion::core::events::RunEvent;
use reflexion::exit_codes;
use reflexion::io::backends::build_reasoner;
use reflexion::io::config::{
    DEFAULT_CONFIG_FILE, ReflexionConfig, load_config, resolve_secret, write_config,
};
use reflexion::io::journal::RunJournal;
use reflexion::logging;
use reflexion::request::{RunOverrides, RunRequest};
use reflexion::result::abbreviate;
use reflexion::tools::default_registry;

#[derive(Parser)]
#[command(
    name = "reflexion",
    version,
    about = "Quality-gated multi-agent pipeline with reflexion retries"
)]
struct Cli {
    /// Configuration file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a goal through plan, research, code, and review.
    Run(RunArgs),
    /// Invoke one tool with JSON arguments and print its result.
    Tool {
        name: String,
        /// JSON arguments; a bare string is passed through as a JSON string.
        args: String,
    },
    /// Show or initialize the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct RunArgs {
    goal: String,
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long)]
    quality_threshold: Option<f64>,
    #[arg(long)]
    max_steps: Option<u32>,
    /// Write `<dir>/<run_id>/...` journal files.
    #[arg(long)]
    journal_dir: Option<PathBuf>,
    /// Print the full result as JSON instead of the deliverable text.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write the default configuration.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    logging::init("warn");
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(&cli.config, args).await,
        Command::Tool { name, args } => cmd_tool(&cli.config, &name, &args).await,
        Command::Config { action } => match action {
            ConfigAction::Show => cmd_config_show(&cli.config),
            ConfigAction::Init { force } => cmd_config_init(&cli.config, force),
        },
    }
}

async fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    let config = load_config(config_path)?;
    let request = RunRequest::new(args.goal).with_overrides(RunOverrides {
        max_retries: args.max_retries,
        quality_threshold: args.quality_threshold,
        max_steps: args.max_steps,
    });

    let reasoner = build_reasoner(&config, resolve_secret(&config.reasoning.api_key_env))?;
    let tools = default_registry(&config, resolve_secret(&config.search.api_key_env));
    let controller = RunController::new(Arc::new(config), reasoner, Arc::new(tools));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        }
    });

    let mut journal = args.journal_dir.map(RunJournal::new);
    let quiet = args.json;
    let mut on_event = |event: &RunEvent| {
        if !quiet && let Some(line) = progress_line(event) {
            eprintln!("{line}");
        }
        if let Some(journal) = journal.as_mut()
            && let Err(err) = journal.record(event)
        {
            warn!(err = %format!("{err:#}"), "journal write failed");
        }
    };

    let result = match controller.run_with(&request, &cancel, &mut on_event).await {
        Ok(result) => result,
        Err(err) => {
            eprintln!("invalid request: {err}");
            return Ok(exit_codes::INVALID);
        }
    };
    if let Some(journal) = journal.as_mut() {
        let path = journal.write_result(&result)?;
        eprintln!("journal: {}", path.display());
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("serialize result")?
        );
    } else {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
        eprintln!("{}", result.summary_line());
    }
    Ok(exit_codes::for_status(result.status))
}

/// Human progress line for an event; `None` for events not worth printing.
fn progress_line(event: &RunEvent) -> Option<String> {
    let line = match event {
        RunEvent::Started { run_id, .. } => format!("run {run_id} started"),
        RunEvent::StageStarted { .. } => return None,
        RunEvent::StageFinished {
            attempt,
            role,
            summary,
        } => format!("[attempt {attempt}] {role}: {summary}"),
        RunEvent::Planned { attempt, plan } => {
            format!("[attempt {attempt}] plan: {}", plan.describe())
        }
        RunEvent::Reviewed {
            attempt,
            score,
            feedback,
        } => format!(
            "[attempt {attempt}] score {score:.2}: {}",
            abbreviate(feedback, 120)
        ),
        RunEvent::Retrying { attempt, reason } => format!("retrying as attempt {attempt}: {reason}"),
        RunEvent::Finished { status, reason, .. } => format!("finished: {status} ({reason})"),
    };
    Some(line)
}

async fn cmd_tool(config_path: &Path, name: &str, raw_args: &str) -> Result<i32> {
    let config = load_config(config_path)?;
    let args: Value =
        serde_json::from_str(raw_args).unwrap_or_else(|_| Value::String(raw_args.to_string()));
    let registry = default_registry(&config, resolve_secret(&config.search.api_key_env));
    let value = registry.invoke(name, &args).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&value).context("serialize tool output")?
    );
    Ok(exit_codes::OK)
}

fn cmd_config_show(config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    print!(
        "{}",
        toml::to_string_pretty(&config).context("serialize configuration")?
    );
    Ok(exit_codes::OK)
}

fn cmd_config_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    write_config(config_path, &ReflexionConfig::default())?;
    eprintln!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflexion::core::types::{Role, RunStatus};

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "reflexion",
            "run",
            "Explain TCP",
            "--max-retries",
            "1",
            "--quality-threshold",
            "0.8",
            "--json",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.goal, "Explain TCP");
        assert_eq!(args.max_retries, Some(1));
        assert_eq!(args.quality_threshold, Some(0.8));
        assert_eq!(args.max_steps, None);
        assert!(args.json);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn parse_config_init_force() {
        let cli = Cli::parse_from(["reflexion", "--config", "x.toml", "config", "init", "--force"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Init { force: true }
            }
        ));
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn progress_lines_skip_stage_starts() {
        assert_eq!(
            progress_line(&RunEvent::StageStarted {
                attempt: 0,
                role: Role::Critic
            }),
            None
        );
        assert_eq!(
            progress_line(&RunEvent::Finished {
                status: RunStatus::Succeeded,
                attempt: 0,
                reason: "score 0.90 met threshold 0.60".into(),
            })
            .as_deref(),
            Some("finished: succeeded (score 0.90 met threshold 0.60)")
        );
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("reflexion.toml");
        assert_eq!(cmd_config_init(&path, false).expect("init"), exit_codes::OK);
        assert!(cmd_config_init(&path, false).is_err());
        assert_eq!(cmd_config_init(&path, true).expect("force"), exit_codes::OK);
    }
}
