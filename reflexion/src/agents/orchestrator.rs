//! Orchestrator stage: produce (or revise) the plan for the current attempt.

use tracing::{debug, warn};

use crate::core::plan::{PlanningError, parse_plan, revise_for_feedback};
use crate::core::state::RunState;
use crate::core::types::Role;
use crate::io::prompt::PromptInputs;
use crate::io::reasoning::ReasoningError;

use super::{StageContext, StageOutcome};

pub(super) async fn run(ctx: &StageContext<'_>, state: &mut RunState) -> StageOutcome {
    let feedback = state.latest_feedback().map(str::to_string);
    let inputs = PromptInputs {
        goal: state.goal.clone(),
        attempt: state.attempt,
        feedback: feedback.clone(),
        history: state.score_history.clone(),
        notes: state.research_notes.clone(),
        language: ctx.config.coder.language.clone(),
        ..PromptInputs::default()
    };

    let reply = match ctx.reason(state, Role::Orchestrator, &inputs).await {
        Ok(reply) => reply,
        Err(ReasoningError::Cancelled) => return StageOutcome::Cancelled,
        Err(err) if state.budget.deadline_passed() => {
            warn!(err = %err, "planning call outlived the run deadline");
            return StageOutcome::DeadlinePassed;
        }
        Err(err) => {
            warn!(err = %err, "planning call failed");
            return StageOutcome::PlanningFailed(PlanningError::Reasoning(err.to_string()));
        }
    };

    let plan = match parse_plan(&reply, &state.goal) {
        Ok(plan) => plan,
        Err(err) => {
            warn!(err = %err, "plan reply rejected");
            return StageOutcome::PlanningFailed(err);
        }
    };
    let plan = match feedback.as_deref() {
        Some(feedback) => revise_for_feedback(plan, feedback, &state.goal),
        None => plan,
    };
    debug!(plan = %plan.describe(), "plan accepted");
    state.adopt_plan(plan);
    StageOutcome::Planned {
        steps: state.plan.len(),
    }
}
