//! Score gate: accept, retry, or give up after a review.

/// Outcome of comparing one review against the quality threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Retry,
    GiveUp,
}

/// Decide what follows a review. The threshold is inclusive.
pub fn decide(score: f64, threshold: f64, attempt: u32, max_retries: u32) -> Decision {
    if score >= threshold {
        Decision::Accept
    } else if attempt < max_retries {
        Decision::Retry
    } else {
        Decision::GiveUp
    }
}
