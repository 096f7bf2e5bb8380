//! Step and wall-clock budget for one run.

use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

/// Why a stage could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BudgetExhausted {
    #[error("step budget exhausted ({used}/{limit} steps used)")]
    Steps { used: u32, limit: u32 },
    #[error("run deadline passed")]
    Deadline,
}

/// Remaining step counter plus an optional deadline.
///
/// The counter is decremented before a stage executes and never goes below
/// zero: [`Budget::try_consume`] refuses once nothing is left.
#[derive(Debug, Clone)]
pub struct Budget {
    limit: u32,
    remaining: u32,
    deadline: Option<Instant>,
}

/// Serializable view of a budget at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetSnapshot {
    pub limit: u32,
    pub remaining: u32,
}

impl Budget {
    pub fn new(limit: u32, deadline: Option<Instant>) -> Self {
        Self {
            limit,
            remaining: limit,
            deadline,
        }
    }

    /// Charge one unit for the next stage.
    pub fn try_consume(&mut self) -> Result<(), BudgetExhausted> {
        if self.deadline_passed() {
            return Err(BudgetExhausted::Deadline);
        }
        if self.remaining == 0 {
            return Err(BudgetExhausted::Steps {
                used: self.used(),
                limit: self.limit,
            });
        }
        self.remaining -= 1;
        Ok(())
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn used(&self) -> u32 {
        self.limit - self.remaining
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the run deadline, if any, is behind us.
    pub fn deadline_passed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| remaining_time(deadline).is_none())
    }

    /// Timeout for one collaborator call: `cap`, shortened to the time left.
    pub fn call_timeout(&self, cap: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => remaining_time(deadline).map_or(Duration::ZERO, |left| left.min(cap)),
            None => cap,
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            limit: self.limit,
            remaining: self.remaining,
        }
    }
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining_time(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_stops_at_zero() {
        let mut budget = Budget::new(2, None);
        assert!(budget.try_consume().is_ok());
        assert!(budget.try_consume().is_ok());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(
            budget.try_consume(),
            Err(BudgetExhausted::Steps { used: 2, limit: 2 })
        );
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn passed_deadline_counts_as_exhaustion() {
        let past = Instant::now()
            .checked_sub(Duration::from_secs(1))
            .expect("instant in the past");
        let mut budget = Budget::new(5, Some(past));
        assert!(budget.deadline_passed());
        assert_eq!(budget.try_consume(), Err(BudgetExhausted::Deadline));
        assert_eq!(budget.remaining(), 5);
    }

    #[test]
    fn call_timeout_is_capped_by_deadline() {
        let budget = Budget::new(1, Some(Instant::now() + Duration::from_secs(2)));
        let timeout = budget.call_timeout(Duration::from_secs(60));
        assert!(timeout <= Duration::from_secs(2));

        assert!(!budget.deadline_passed());

        let open = Budget::new(1, None);
        assert!(!open.deadline_passed());
        assert_eq!(open.call_timeout(Duration::from_secs(60)), Duration::from_secs(60));
    }
}
