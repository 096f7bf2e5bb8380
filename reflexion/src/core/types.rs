//! Shared deterministic types for the reflexion core.
//!
//! These types define stable contracts between the controller, the stages, and
//! the result object. They do not depend on I/O and serialize in a stable shape.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Agent role behind a stage. Every reasoning call is tagged with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Orchestrator,
    Researcher,
    Coder,
    Critic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Orchestrator => "orchestrator",
            Role::Researcher => "researcher",
            Role::Coder => "coder",
            Role::Critic => "critic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a plan step produced by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Research,
    Code,
    /// Explicit marker that the goal needs no code. Runs nothing.
    SkipCode,
}

impl StepKind {
    /// Role that executes this step, if any.
    pub fn role(&self) -> Option<Role> {
        match self {
            StepKind::Research => Some(Role::Researcher),
            StepKind::Code => Some(Role::Coder),
            StepKind::SkipCode => None,
        }
    }
}

/// One step of a plan: what to run and the task description handed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub kind: StepKind,
    pub task: String,
}

impl PlanStep {
    pub fn new(kind: StepKind, task: impl Into<String>) -> Self {
        Self {
            kind,
            task: task.into(),
        }
    }
}

/// Ordered list of steps selected for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn contains(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|step| step.kind == kind)
    }

    /// Compact `research,code` rendering for logs.
    pub fn describe(&self) -> String {
        if self.steps.is_empty() {
            return "(empty)".to_string();
        }
        self.steps
            .iter()
            .map(|step| match step.kind {
                StepKind::Research => "research",
                StepKind::Code => "code",
                StepKind::SkipCode => "skip_code",
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Lifecycle status of a run. Leaves `Running` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    FailedBudgetExhausted,
    FailedMaxRetries,
    FailedFatalError,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::FailedBudgetExhausted => "failed_budget_exhausted",
            RunStatus::FailedMaxRetries => "failed_max_retries",
            RunStatus::FailedFatalError => "failed_fatal_error",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Critic verdict for one attempt. Score and feedback always travel together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub score: f64,
    pub feedback: String,
}

/// Entry of the append-only score history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub attempt: u32,
    pub score: f64,
    pub feedback: String,
}

/// Generated code plus the validator's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub language: String,
    pub code: String,
    pub valid: bool,
    pub validation_error: Option<String>,
    /// Number of generations the coder needed (1-based).
    pub local_attempts: u32,
}

/// What happens to research notes and code when the loop retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotesPolicy {
    /// Keep notes from earlier attempts as context for the next one. Code is
    /// kept only while the next plan still has a code step.
    #[default]
    Accumulate,
    /// Start each retry with empty notes and no code artifact.
    Reset,
}
