//! Stable exit codes for the `reflexion` CLI.

use crate::core::types::RunStatus;

/// Run succeeded, or a non-run command completed.
pub const OK: i32 = 0;
/// Invalid input, configuration, or arguments. Nothing ran.
pub const INVALID: i32 = 1;
/// Every attempt scored below the threshold.
pub const MAX_RETRIES: i32 = 2;
/// Step budget or run deadline exhausted.
pub const BUDGET: i32 = 3;
/// Planning failed and could not be restarted.
pub const FATAL: i32 = 4;
/// Run cancelled (Ctrl-C).
pub const CANCELLED: i32 = 5;

/// Exit code for a finished run.
pub fn for_status(status: RunStatus) -> i32 {
    match status {
        RunStatus::Succeeded => OK,
        RunStatus::FailedMaxRetries => MAX_RETRIES,
        RunStatus::FailedBudgetExhausted => BUDGET,
        RunStatus::FailedFatalError => FATAL,
        RunStatus::Cancelled => CANCELLED,
        RunStatus::Running => FATAL,
    }
}
