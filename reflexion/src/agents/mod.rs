//! The four agent stages and their shared call context.
//!
//! Stages form a closed set ([`Stage`]) with one entry point,
//! [`Stage::execute`]. A stage reads the run state, performs reasoning and
//! tool calls through [`StageContext`], and writes its own slice of the state
//! back. Collaborator failures never escape a stage: they are folded into the
//! state as degraded content, except cancellation, which ends the stage.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span};

use crate::core::plan::PlanningError;
use crate::core::state::RunState;
use crate::core::types::{PlanStep, Role, StepKind};
use crate::io::config::ReflexionConfig;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::io::reasoning::{ReasoningError, ReasoningPort, ReasoningRequest, complete_within};
use crate::tools::{ToolError, ToolRegistry};

pub mod coder;
pub mod critic;
pub mod orchestrator;
pub mod researcher;

/// Borrowed collaborators for one stage execution.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub reasoner: &'a dyn ReasoningPort,
    pub tools: &'a ToolRegistry,
    pub config: &'a ReflexionConfig,
    pub prompts: &'a PromptBuilder,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    /// Render the prompt for `role` and await one reasoning call, bounded by
    /// the reasoning timeout and the run deadline.
    pub async fn reason(
        &self,
        state: &RunState,
        role: Role,
        inputs: &PromptInputs,
    ) -> Result<String, ReasoningError> {
        let pack = self
            .prompts
            .build(role, inputs)
            .map_err(|err| ReasoningError::Unavailable(format!("render prompt: {err:#}")))?;
        let request = ReasoningRequest {
            role,
            system: pack.system().to_string(),
            prompt: pack.into_content(),
        };
        let timeout = state
            .budget
            .call_timeout(self.config.limits.reasoning_timeout());
        complete_within(self.reasoner, &request, timeout, self.cancel).await
    }

    /// Invoke a registered tool, bounded by the tool timeout and the run
    /// deadline.
    pub async fn tool(&self, state: &RunState, name: &str, args: &Value) -> Result<Value, ToolError> {
        let timeout = state.budget.call_timeout(self.config.limits.tool_timeout());
        self.tools.invoke_within(name, args, timeout, self.cancel).await
    }
}

/// One executable stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Orchestrator,
    Researcher { task: String },
    Coder { task: String },
    Critic,
}

/// What a stage did. Failures that a stage recovers from are reported here,
/// not as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Planned { steps: usize },
    Researched { notes_added: usize, degraded: bool },
    Coded { valid: bool, local_attempts: u32 },
    Reviewed { score: f64 },
    PlanningFailed(PlanningError),
    /// The run deadline expired while the stage waited on a collaborator.
    DeadlinePassed,
    Cancelled,
}

impl StageOutcome {
    pub fn summary(&self) -> String {
        match self {
            StageOutcome::Planned { steps } => format!("planned {steps} step(s)"),
            StageOutcome::Researched {
                notes_added,
                degraded,
            } => {
                let suffix = if *degraded { " (degraded)" } else { "" };
                format!("added {notes_added} note(s){suffix}")
            }
            StageOutcome::Coded {
                valid,
                local_attempts,
            } => format!("code valid={valid} after {local_attempts} generation(s)"),
            StageOutcome::Reviewed { score } => format!("score {score:.2}"),
            StageOutcome::PlanningFailed(err) => format!("planning failed: {err}"),
            StageOutcome::DeadlinePassed => "run deadline passed".to_string(),
            StageOutcome::Cancelled => "cancelled".to_string(),
        }
    }
}

impl Stage {
    pub fn role(&self) -> Role {
        match self {
            Stage::Orchestrator => Role::Orchestrator,
            Stage::Researcher { .. } => Role::Researcher,
            Stage::Coder { .. } => Role::Coder,
            Stage::Critic => Role::Critic,
        }
    }

    /// Stage for a plan step. `SkipCode` runs nothing.
    pub fn for_step(step: &PlanStep) -> Option<Stage> {
        match step.kind {
            StepKind::Research => Some(Stage::Researcher {
                task: step.task.clone(),
            }),
            StepKind::Code => Some(Stage::Coder {
                task: step.task.clone(),
            }),
            StepKind::SkipCode => None,
        }
    }

    pub async fn execute(&self, ctx: &StageContext<'_>, state: &mut RunState) -> StageOutcome {
        let span = info_span!("stage", role = %self.role(), attempt = state.attempt);
        async {
            match self {
                Stage::Orchestrator => orchestrator::run(ctx, state).await,
                Stage::Researcher { task } => researcher::run(ctx, state, task).await,
                Stage::Coder { task } => coder::run(ctx, state, task).await,
                Stage::Critic => critic::run(ctx, state).await,
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_code_step_has_no_stage() {
        assert_eq!(
            Stage::for_step(&PlanStep::new(StepKind::SkipCode, "none")),
            None
        );
        assert_eq!(
            Stage::for_step(&PlanStep::new(StepKind::Code, "write")),
            Some(Stage::Coder {
                task: "write".into()
            })
        );
    }

    #[test]
    fn outcome_summaries_are_readable() {
        assert_eq!(
            StageOutcome::Researched {
                notes_added: 2,
                degraded: true
            }
            .summary(),
            "added 2 note(s) (degraded)"
        );
        assert_eq!(StageOutcome::Reviewed { score: 0.5 }.summary(), "score 0.50");
    }
}
