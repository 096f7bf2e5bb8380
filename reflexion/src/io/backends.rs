//! Reasoning backends: an OpenAI-compatible HTTP API and a local command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::io::config::{ReasoningBackend, ReflexionConfig};
use crate::io::process::run_command_with_timeout;
use crate::io::reasoning::{ReasoningError, ReasoningPort, ReasoningRequest};

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any `POST {base_url}/chat/completions` endpoint (Groq, OpenAI,
/// vLLM, Ollama's OpenAI shim).
#[derive(Debug, Clone)]
pub struct OpenAiCompatReasoner {
    http: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    api_key: Option<String>,
}

impl OpenAiCompatReasoner {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ReasoningPort for OpenAiCompatReasoner {
    #[instrument(skip_all, fields(role = %request.role, model = %self.model))]
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ReasoningError::Unavailable("no API key configured".into()));
        };
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ReasoningError::Unavailable(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|_| "(no body)".into());
            warn!(status = status.as_u16(), "reasoning API returned an error");
            return Err(ReasoningError::Unavailable(format!(
                "API error (status {}): {}",
                status.as_u16(),
                text.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| ReasoningError::Unavailable(format!("invalid response: {err}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ReasoningError::Unavailable("empty completion".into()))?;
        debug!(bytes = content.len(), "completion received");
        Ok(content)
    }

    fn describe(&self) -> String {
        format!("openai-compatible {} ({})", self.base_url, self.model)
    }
}

/// Backend that runs a local command, writes the prompt to stdin, and reads
/// the reply from stdout.
///
/// The command's own timeout mirrors the configured reasoning timeout; the
/// caller's race in [`crate::io::reasoning::complete_within`] still applies
/// and drops (kills) the child on cancellation.
#[derive(Debug, Clone)]
pub struct CommandReasoner {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandReasoner {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    fn stdin_payload(request: &ReasoningRequest) -> Vec<u8> {
        format!("{}\n\n{}\n", request.system.trim(), request.prompt.trim()).into_bytes()
    }
}

#[async_trait]
impl ReasoningPort for CommandReasoner {
    #[instrument(skip_all, fields(role = %request.role))]
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ReasoningError::Unavailable("empty reasoning command".into()))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("REFLEXION_ROLE", request.role.as_str());

        let output = run_command_with_timeout(
            cmd,
            Some(Self::stdin_payload(request)),
            self.timeout,
            self.output_limit_bytes,
        )
        .await
        .map_err(|err| ReasoningError::Unavailable(format!("{err:#}")))?;

        if output.timed_out {
            return Err(ReasoningError::Timeout(self.timeout));
        }
        if !output.success() {
            let stderr = output.stderr_lossy();
            return Err(ReasoningError::Unavailable(format!(
                "command exited with status {:?}: {}",
                output.status.and_then(|s| s.code()),
                stderr.trim().chars().take(300).collect::<String>()
            )));
        }
        let reply = output.stdout_lossy().trim().to_string();
        if reply.is_empty() {
            return Err(ReasoningError::Unavailable("command produced no output".into()));
        }
        Ok(reply)
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.command.join(" "))
    }
}

/// Build the configured reasoning backend.
///
/// `api_key` is resolved from the environment by the caller at start-up.
pub fn build_reasoner(
    config: &ReflexionConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn ReasoningPort>> {
    let reasoning = &config.reasoning;
    let port: Arc<dyn ReasoningPort> = match reasoning.backend {
        ReasoningBackend::Openai => {
            if api_key.is_none() {
                warn!(
                    env = %reasoning.api_key_env,
                    "reasoning API key not set; reasoning calls will fail"
                );
            }
            Arc::new(OpenAiCompatReasoner::new(
                &reasoning.base_url,
                &reasoning.model,
                reasoning.temperature,
                api_key,
            ))
        }
        ReasoningBackend::Command => {
            if reasoning.command.is_empty() {
                return Err(anyhow!("reasoning.command is empty"));
            }
            Arc::new(CommandReasoner::new(
                reasoning.command.clone(),
                config.limits.reasoning_timeout(),
                config.limits.output_limit_bytes,
            ))
        }
    };
    info!(backend = %port.describe(), "reasoning backend ready");
    Ok(port)
}
