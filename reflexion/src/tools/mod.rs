//! Tool registry: name → callable capability.
//!
//! The registry is built once at start-up and shared read-only (`Arc`) by
//! every run. Invocation never mutates it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::io::config::ReflexionConfig;

pub mod calculator;
pub mod code_validator;
pub mod search;

pub const WEB_SEARCH: &str = "web_search";
pub const CALCULATE: &str = "calculate";
pub const CODE_VALIDATOR: &str = "code_validator";

/// Failure of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("tool '{0}' is not registered")]
    NotFound(String),
    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
    #[error("tool '{tool}' timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
    #[error("tool '{0}' cancelled")]
    Cancelled(String),
}

/// A capability callable by name with JSON arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run the tool. Errors become [`ToolError::Execution`].
    async fn call(&self, args: &Value) -> Result<Value>;
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            default_timeout,
        }
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn describe(&self) -> Vec<(&str, &str)> {
        self.tools
            .values()
            .map(|tool| (tool.name(), tool.description()))
            .collect()
    }

    /// Invoke with the registry's default timeout and no cancellation.
    pub async fn invoke(&self, name: &str, args: &Value) -> Result<Value, ToolError> {
        self.invoke_within(name, args, self.default_timeout, &CancellationToken::new())
            .await
    }

    /// Invoke under `timeout`, racing `cancel`.
    #[instrument(skip(self, args, cancel), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn invoke_within(
        &self,
        name: &str,
        args: &Value,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled(name.to_string()));
        }
        if timeout.is_zero() {
            return Err(ToolError::Timeout {
                tool: name.to_string(),
                after: timeout,
            });
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ToolError::Cancelled(name.to_string())),
            outcome = tokio::time::timeout(timeout, tool.call(args)) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(ToolError::Execution {
                    tool: name.to_string(),
                    message: format!("{err:#}"),
                }),
                Err(_) => Err(ToolError::Timeout {
                    tool: name.to_string(),
                    after: timeout,
                }),
            },
        };
        match &result {
            Ok(_) => debug!(tool = name, "tool call completed"),
            Err(ToolError::Cancelled(_)) => debug!(tool = name, "tool call cancelled"),
            Err(err) => warn!(err = %err, "tool call failed"),
        }
        result
    }
}

/// Registry with the three shipped tools.
///
/// `search_api_key` is resolved from the environment by the caller.
pub fn default_registry(config: &ReflexionConfig, search_api_key: Option<String>) -> ToolRegistry {
    ToolRegistry::new(config.limits.tool_timeout())
        .with(Arc::new(search::WebSearchTool::new(
            &config.search,
            search_api_key,
        )))
        .with(Arc::new(calculator::CalculatorTool))
        .with(Arc::new(code_validator::CodeValidatorTool))
}
