//! The reasoning port: "ask a language model for text".
//!
//! [`ReasoningPort`] decouples the stages from the model backend. Production
//! backends live in [`crate::io::backends`]; tests use the scripted reasoner
//! from `test_support`, which returns predetermined replies per role.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::types::Role;

/// Failure of one reasoning call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningError {
    #[error("reasoning unavailable: {0}")]
    Unavailable(String),
    #[error("reasoning timed out after {0:?}")]
    Timeout(Duration),
    #[error("reasoning cancelled")]
    Cancelled,
}

/// One reasoning call: the calling role, a system prompt, and the user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningRequest {
    pub role: Role,
    pub system: String,
    pub prompt: String,
}

/// Stateless text completion. Shared across concurrent runs.
#[async_trait]
pub trait ReasoningPort: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError>;

    /// Short backend description for logs and health checks.
    fn describe(&self) -> String {
        "reasoner".to_string()
    }
}

/// Await one reasoning call under `timeout`, racing `cancel`.
///
/// On cancellation the in-flight future is dropped.
#[instrument(skip_all, fields(role = %request.role, timeout_ms = timeout.as_millis() as u64))]
pub async fn complete_within(
    port: &dyn ReasoningPort,
    request: &ReasoningRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, ReasoningError> {
    if cancel.is_cancelled() {
        return Err(ReasoningError::Cancelled);
    }
    if timeout.is_zero() {
        return Err(ReasoningError::Timeout(timeout));
    }
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReasoningError::Cancelled),
        outcome = tokio::time::timeout(timeout, port.complete(request)) => match outcome {
            Ok(result) => result,
            Err(_) => Err(ReasoningError::Timeout(timeout)),
        },
    };
    match &result {
        Ok(text) => debug!(bytes = text.len(), "reasoning call completed"),
        Err(ReasoningError::Cancelled) => debug!("reasoning call cancelled"),
        Err(err) => warn!(err = %err, "reasoning call failed"),
    }
    result
}
