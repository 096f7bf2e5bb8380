use serde::{Deserialize, Serialize};

use reflexion::core::types::RunStatus;
use reflexion::result::RunResult;

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every check passed.
    Success,
    /// The run finished but at least one check failed.
    Fail,
    /// The run ran out of steps or time and a check failed.
    Exhausted,
    /// The run did not produce a result.
    Error,
}

pub fn classify_outcome(result: Option<&RunResult>, judgment: &Judgment) -> Outcome {
    let Some(result) = result else {
        return Outcome::Error;
    };
    if judgment.all_passed() {
        return Outcome::Success;
    }
    match result.status {
        RunStatus::FailedBudgetExhausted => Outcome::Exhausted,
        RunStatus::Running => Outcome::Error,
        _ => Outcome::Fail,
    }
}
