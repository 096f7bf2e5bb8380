//! Critic reply parsing.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::core::fenced::extract_json_block;
use crate::core::schema::validate_review;
use crate::core::types::Review;

#[derive(Debug, Deserialize)]
struct WireReview {
    score: f64,
    feedback: String,
}

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bscore\b\s*[:=]?\s*([0-9]*\.?[0-9]+)").expect("valid score regex")
});

/// Parse a critic reply into a review with a score clamped into `[0, 1]`.
///
/// Accepts `{"score", "feedback"}` JSON (fenced or bare). When no valid JSON is
/// present, a `score: <n>` pattern is accepted with the whole reply as feedback.
pub fn parse_review(reply: &str) -> Result<Review, String> {
    let json_error = match parse_json_review(reply) {
        Ok(review) => return Ok(review),
        Err(err) => err,
    };
    if let Some(caps) = SCORE_RE.captures(reply)
        && let Some(score) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok())
    {
        return Ok(Review {
            score: clamp_score(score),
            feedback: non_empty_feedback(reply.trim()),
        });
    }
    Err(json_error)
}

fn parse_json_review(reply: &str) -> Result<Review, String> {
    let raw = extract_json_block(reply).ok_or_else(|| "no JSON object in reply".to_string())?;
    let value: Value = serde_json::from_str(raw).map_err(|err| format!("invalid JSON: {err}"))?;
    validate_review(&value).map_err(|errors| format!("schema: {}", errors.join("; ")))?;
    let wire: WireReview =
        serde_json::from_value(value).map_err(|err| format!("invalid review: {err}"))?;
    Ok(Review {
        score: clamp_score(wire.score),
        feedback: non_empty_feedback(wire.feedback.trim()),
    })
}

/// Clamp into `[0, 1]`; non-finite scores count as zero.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn non_empty_feedback(feedback: &str) -> String {
    if feedback.is_empty() {
        "no feedback given".to_string()
    } else {
        feedback.to_string()
    }
}

/// Review recorded when the critic could not produce one.
pub fn unavailable_review(reason: &str) -> Review {
    Review {
        score: 0.0,
        feedback: format!("review unavailable: {reason}"),
    }
}
