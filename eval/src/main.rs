mod case;
mod cli;
mod config;
mod judge;
mod outcome;
mod report;
mod results;
mod run;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use reflexion::io::config::DEFAULT_CONFIG_FILE;
use reflexion::logging;

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for the reflexion pipeline")]
struct Cli {
    /// Reflexion configuration the cases run against.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Run {
        case_id: String,
        #[arg(long, default_value_t = 1)]
        runs: u32,
    },
    Report {
        case_id: String,
    },
    Clean {
        case_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("eval=info,reflexion=warn");
    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root),
        Command::Run { case_id, runs } => {
            cli::run_case_by_id(&repo_root, &cli.config, &case_id, runs).await
        }
        Command::Report { case_id } => cli::report_case(&repo_root, &case_id),
        Command::Clean { case_id } => cli::clean_case(&repo_root, &case_id),
    }
}
