//! Run requests and their resolution against the configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::NotesPolicy;
use crate::io::config::{MAX_RETRIES_LIMIT, ReflexionConfig};

/// Rejected request. Nothing runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    #[error("goal must not be empty")]
    EmptyGoal,
    #[error("max_retries {0} exceeds the limit of {limit}", limit = MAX_RETRIES_LIMIT)]
    TooManyRetries(u32),
    #[error("quality_threshold {0} must be within [0, 1]")]
    ThresholdOutOfRange(f64),
    #[error("max_steps must be greater than 0")]
    ZeroSteps,
}

/// Per-request overrides of the `[run]` configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
}

/// Immutable input of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub goal: String,
    #[serde(default)]
    pub overrides: RunOverrides,
}

impl RunRequest {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            overrides: RunOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Effective settings for one run after applying overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub goal: String,
    pub max_retries: u32,
    pub quality_threshold: f64,
    pub max_steps: u32,
    pub notes_policy: NotesPolicy,
}

impl RunOverrides {
    /// Check override ranges without a goal. Shared by the CLI and the server.
    pub fn validate(&self) -> Result<(), RequestError> {
        if let Some(retries) = self.max_retries
            && retries > MAX_RETRIES_LIMIT
        {
            return Err(RequestError::TooManyRetries(retries));
        }
        if let Some(threshold) = self.quality_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            return Err(RequestError::ThresholdOutOfRange(threshold));
        }
        if self.max_steps == Some(0) {
            return Err(RequestError::ZeroSteps);
        }
        Ok(())
    }
}

/// Resolve a request against the configuration.
pub fn resolve(request: &RunRequest, config: &ReflexionConfig) -> Result<RunSettings, RequestError> {
    let goal = request.goal.trim();
    if goal.is_empty() {
        return Err(RequestError::EmptyGoal);
    }
    request.overrides.validate()?;
    let overrides = request.overrides;
    Ok(RunSettings {
        goal: goal.to_string(),
        max_retries: overrides.max_retries.unwrap_or(config.run.max_retries),
        quality_threshold: overrides
            .quality_threshold
            .unwrap_or(config.run.quality_threshold),
        max_steps: overrides.max_steps.unwrap_or(config.run.max_steps),
        notes_policy: config.research.notes_policy,
    })
}
