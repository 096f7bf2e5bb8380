//! reflexion-server: HTTP job service around the reflexion pipeline.

mod error;
mod jobs;
mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use reflexion::controller::RunController;
use reflexion::io::backends::build_reasoner;
use reflexion::io::config::{
    DEFAULT_CONFIG_FILE, ReasoningBackend, load_config, resolve_secret,
};
use reflexion::logging;
use reflexion::tools::default_registry;

use crate::state::{AppState, HealthInfo};

#[derive(Parser)]
#[command(name = "reflexion-server")]
#[command(about = "HTTP job service for the reflexion pipeline")]
struct Args {
    /// Configuration file (defaults apply when missing)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to bind; overrides `server.bind`
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on; overrides `server.port`
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init("reflexion_server=info,reflexion=info");

    let args = Args::parse();
    let config = load_config(&args.config)?;

    let reasoning_key = resolve_secret(&config.reasoning.api_key_env);
    let search_key = resolve_secret(&config.search.api_key_env);
    let api_key = resolve_secret(&config.server.api_key_env);
    if api_key.is_none() {
        info!(env = %config.server.api_key_env, "no API key configured, requests are not authenticated");
    }
    let health = HealthInfo {
        reasoning_backend: format!("{:?}", config.reasoning.backend).to_lowercase(),
        reasoning_api_key: config.reasoning.backend == ReasoningBackend::Command
            || reasoning_key.is_some(),
        search_api_key: search_key.is_some(),
    };

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let port = args.port.unwrap_or(config.server.port);

    let reasoner = build_reasoner(&config, reasoning_key)?;
    let tools = default_registry(&config, search_key);
    let controller = RunController::new(Arc::new(config), reasoner, Arc::new(tools));
    info!(reasoner = %controller.reasoner().describe(), "collaborators ready");

    let state = AppState::new(controller, api_key, health);
    let app = routes::router(state.clone());

    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down, cancelling jobs");
            state.jobs.cancel_all().await;
        })
        .await?;

    Ok(())
}
