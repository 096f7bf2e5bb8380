//! The mutable aggregate threaded through one run.

use serde::Serialize;

use crate::core::budget::Budget;
use crate::core::types::{
    CodeArtifact, NotesPolicy, Plan, Review, RunStatus, ScoreRecord, StepKind,
};

/// Artifacts that earned the best score so far.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestSnapshot {
    pub attempt: u32,
    pub score: f64,
    pub research_notes: Vec<String>,
    pub code_artifact: Option<CodeArtifact>,
}

/// Run state owned by the controller for the duration of one run.
///
/// Stages receive `&mut RunState` and mutate only their own slice of it.
/// `status` is private so it can only move forward through [`RunState::finish`].
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: String,
    pub goal: String,
    pub plan: Plan,
    pub research_notes: Vec<String>,
    pub code_artifact: Option<CodeArtifact>,
    pub score_history: Vec<ScoreRecord>,
    pub attempt: u32,
    pub budget: Budget,
    pub best: Option<BestSnapshot>,
    pub planning_restarted: bool,
    status: RunStatus,
    stop_reason: Option<String>,
}

impl RunState {
    pub fn new(run_id: impl Into<String>, goal: impl Into<String>, budget: Budget) -> Self {
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            plan: Plan::default(),
            research_notes: Vec::new(),
            code_artifact: None,
            score_history: Vec::new(),
            attempt: 0,
            budget,
            best: None,
            planning_restarted: false,
            status: RunStatus::Running,
            stop_reason: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    /// Move to a terminal status.
    ///
    /// # Panics
    /// Panics if the run already finished or `status` is `Running`: both are
    /// controller bugs, not run outcomes.
    pub fn finish(&mut self, status: RunStatus, reason: impl Into<String>) {
        assert!(
            !self.status.is_terminal(),
            "run {} already finished as {}",
            self.run_id,
            self.status
        );
        assert!(status.is_terminal(), "cannot finish a run as running");
        self.status = status;
        self.stop_reason = Some(reason.into());
    }

    /// Install the plan for the current attempt. A plan without a code step
    /// drops any code carried over from an earlier attempt.
    pub fn adopt_plan(&mut self, plan: Plan) {
        if !plan.contains(StepKind::Code) {
            self.code_artifact = None;
        }
        self.plan = plan;
    }

    pub fn append_note(&mut self, note: impl Into<String>) {
        self.research_notes.push(note.into());
    }

    /// Append the critic's verdict for the current attempt and track the best.
    pub fn record_review(&mut self, review: Review) {
        let improves = self
            .best
            .as_ref()
            .is_none_or(|best| review.score > best.score);
        if improves {
            self.best = Some(BestSnapshot {
                attempt: self.attempt,
                score: review.score,
                research_notes: self.research_notes.clone(),
                code_artifact: self.code_artifact.clone(),
            });
        }
        self.score_history.push(ScoreRecord {
            attempt: self.attempt,
            score: review.score,
            feedback: review.feedback,
        });
    }

    /// Enter the next reflexion iteration.
    pub fn begin_retry(&mut self, policy: NotesPolicy) {
        self.attempt += 1;
        if policy == NotesPolicy::Reset {
            self.research_notes.clear();
            self.code_artifact = None;
        }
    }

    pub fn latest_review(&self) -> Option<&ScoreRecord> {
        self.score_history.last()
    }

    pub fn latest_feedback(&self) -> Option<&str> {
        self.latest_review().map(|record| record.feedback.as_str())
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|best| best.score)
    }
}
