//! Reflexion configuration stored in `reflexion.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::NotesPolicy;
use crate::tools::code_validator::Lang;

/// Default config file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "reflexion.toml";

/// Upper bound for `max_retries`, both in config and per request.
pub const MAX_RETRIES_LIMIT: u32 = 5;

/// Reflexion configuration (TOML).
///
/// Loaded once per process and passed by reference. Missing fields default to
/// the values below; secrets are never stored here, only the names of the
/// environment variables that hold them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReflexionConfig {
    pub run: RunConfig,
    pub limits: LimitsConfig,
    pub research: ResearchConfig,
    pub coder: CoderConfig,
    pub reasoning: ReasoningConfig,
    pub search: SearchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Reflexion iterations allowed after the first review.
    pub max_retries: u32,
    /// Critic score at or above which a run succeeds.
    pub quality_threshold: f64,
    /// Stage executions allowed per run (orchestrator, researcher, coder, critic).
    pub max_steps: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            quality_threshold: 0.6,
            max_steps: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub reasoning_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Whole-run wall-clock deadline. `0` disables it.
    pub max_run_secs: u64,
    /// Prompts are trimmed (droppable sections first) beyond this size.
    pub prompt_budget_bytes: usize,
    /// Truncate command reasoner stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            reasoning_timeout_secs: 60,
            tool_timeout_secs: 15,
            max_run_secs: 15 * 60,
            prompt_budget_bytes: 40_000,
            output_limit_bytes: 100_000,
        }
    }
}

impl LimitsConfig {
    pub fn reasoning_timeout(&self) -> Duration {
        Duration::from_secs(self.reasoning_timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn max_run(&self) -> Option<Duration> {
        (self.max_run_secs > 0).then(|| Duration::from_secs(self.max_run_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResearchConfig {
    /// Search calls per researcher invocation (further capped at 3).
    pub max_search_calls: u32,
    pub notes_policy: NotesPolicy,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_search_calls: 2,
            notes_policy: NotesPolicy::Accumulate,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoderConfig {
    /// Language handed to the coder prompt and the `code_validator` tool.
    pub language: String,
}

impl Default for CoderConfig {
    fn default() -> Self {
        Self {
            language: "python".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningBackend {
    /// OpenAI-compatible `chat/completions` endpoint.
    #[default]
    Openai,
    /// Local command reading the prompt on stdin.
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningConfig {
    pub backend: ReasoningBackend,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub api_key_env: String,
    /// Command for the `command` backend (e.g. `["ollama","run","llama3"]`).
    pub command: Vec<String>,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            backend: ReasoningBackend::Openai,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.0,
            api_key_env: "GROQ_API_KEY".to_string(),
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key_env: String,
    pub max_results: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.tavily.com/search".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            max_results: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Env var holding the `X-API-Key` value. Unset or empty disables auth.
    pub api_key_env: String,
    /// Finished jobs kept for `GET /jobs`; the oldest are evicted first.
    pub max_finished_jobs: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            api_key_env: "REFLEXION_API_KEY".to_string(),
            max_finished_jobs: 100,
        }
    }
}

impl ReflexionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.run.max_retries > MAX_RETRIES_LIMIT {
            return Err(anyhow!(
                "run.max_retries must be <= {}",
                MAX_RETRIES_LIMIT
            ));
        }
        if !(0.0..=1.0).contains(&self.run.quality_threshold) {
            return Err(anyhow!("run.quality_threshold must be within [0, 1]"));
        }
        if self.run.max_steps == 0 {
            return Err(anyhow!("run.max_steps must be > 0"));
        }
        if self.limits.reasoning_timeout_secs == 0 {
            return Err(anyhow!("limits.reasoning_timeout_secs must be > 0"));
        }
        if self.limits.tool_timeout_secs == 0 {
            return Err(anyhow!("limits.tool_timeout_secs must be > 0"));
        }
        if self.limits.prompt_budget_bytes == 0 {
            return Err(anyhow!("limits.prompt_budget_bytes must be > 0"));
        }
        if self.limits.output_limit_bytes == 0 {
            return Err(anyhow!("limits.output_limit_bytes must be > 0"));
        }
        if Lang::from_name(&self.coder.language).is_none() {
            return Err(anyhow!(
                "coder.language must be python or rust, got '{}'",
                self.coder.language
            ));
        }
        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            return Err(anyhow!("reasoning.temperature must be within [0, 2]"));
        }
        match self.reasoning.backend {
            ReasoningBackend::Openai => {
                if self.reasoning.base_url.trim().is_empty() {
                    return Err(anyhow!("reasoning.base_url must be non-empty"));
                }
                if self.reasoning.model.trim().is_empty() {
                    return Err(anyhow!("reasoning.model must be non-empty"));
                }
            }
            ReasoningBackend::Command => {
                if self.reasoning.command.is_empty() || self.reasoning.command[0].trim().is_empty()
                {
                    return Err(anyhow!(
                        "reasoning.command must be a non-empty array for the command backend"
                    ));
                }
            }
        }
        if self.search.max_results == 0 {
            return Err(anyhow!("search.max_results must be > 0"));
        }
        if self.server.max_finished_jobs == 0 {
            return Err(anyhow!("server.max_finished_jobs must be > 0"));
        }
        Ok(())
    }
}

/// Read a secret named by `env_name`. Empty values count as unset.
pub fn resolve_secret(env_name: &str) -> Option<String> {
    if env_name.trim().is_empty() {
        return None;
    }
    std::env::var(env_name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ReflexionConfig::default()`.
pub fn load_config(path: &Path) -> Result<ReflexionConfig> {
    if !path.exists() {
        let cfg = ReflexionConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ReflexionConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ReflexionConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
