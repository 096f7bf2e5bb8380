//! Critic stage: score the attempt. Records exactly one review unless the
//! run deadline cut the call short.

use tracing::warn;

use crate::core::review::{parse_review, unavailable_review};
use crate::core::state::RunState;
use crate::core::types::Role;
use crate::io::prompt::PromptInputs;
use crate::io::reasoning::ReasoningError;

use super::{StageContext, StageOutcome};

pub(super) async fn run(ctx: &StageContext<'_>, state: &mut RunState) -> StageOutcome {
    let inputs = PromptInputs {
        goal: state.goal.clone(),
        attempt: state.attempt,
        history: state.score_history.clone(),
        notes: state.research_notes.clone(),
        code: state.code_artifact.clone(),
        language: ctx.config.coder.language.clone(),
        ..PromptInputs::default()
    };

    let review = match ctx.reason(state, Role::Critic, &inputs).await {
        Ok(reply) => parse_review(&reply).unwrap_or_else(|reason| {
            warn!(reason = %reason, "review reply unusable");
            unavailable_review(&reason)
        }),
        Err(ReasoningError::Cancelled) => return StageOutcome::Cancelled,
        Err(err) if state.budget.deadline_passed() => {
            warn!(err = %err, "review call outlived the run deadline");
            return StageOutcome::DeadlinePassed;
        }
        Err(err) => {
            warn!(err = %err, "review call failed");
            unavailable_review(&err.to_string())
        }
    };
    let score = review.score;
    state.record_review(review);
    StageOutcome::Reviewed { score }
}
