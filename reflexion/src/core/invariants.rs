//! Run-level invariants checked after a run finishes.

use crate::core::state::RunState;
use crate::core::types::RunStatus;

/// Check run invariants that the type system does not enforce:
/// - `attempt <= max_retries`
/// - one review per completed attempt (`len == attempt + 1` after a decision)
/// - review attempts are sequential from zero
/// - scores in `[0, 1]` with non-empty feedback
pub fn check_run_invariants(state: &RunState, max_retries: u32) -> Vec<String> {
    let mut errors = Vec::new();
    let history = &state.score_history;

    if state.attempt > max_retries {
        errors.push(format!(
            "attempt {} exceeds max_retries {}",
            state.attempt, max_retries
        ));
    }

    let len = history.len() as u32;
    match state.status() {
        RunStatus::Succeeded | RunStatus::FailedMaxRetries => {
            if len != state.attempt + 1 {
                errors.push(format!(
                    "score history has {} entries, expected {} for attempt {}",
                    len,
                    state.attempt + 1,
                    state.attempt
                ));
            }
        }
        _ => {
            // A run can stop between a retry and the next review.
            if len != 0 && len != state.attempt && len != state.attempt + 1 {
                errors.push(format!(
                    "score history has {} entries at attempt {}",
                    len, state.attempt
                ));
            }
        }
    }

    for (index, record) in history.iter().enumerate() {
        if record.attempt != index as u32 {
            errors.push(format!(
                "review {} is tagged with attempt {}",
                index, record.attempt
            ));
        }
        if !(0.0..=1.0).contains(&record.score) {
            errors.push(format!("review {}: score {} out of range", index, record.score));
        }
        if record.feedback.trim().is_empty() {
            errors.push(format!("review {}: feedback is empty", index));
        }
    }

    errors
}
