//! The reflexion loop: plan, execute, review, then accept or retry.
//!
//! [`RunController`] owns nothing run-specific. Each call to
//! [`RunController::run_with`] builds a fresh [`RunState`], drives it through
//! the [`Phase`] machine, and collapses it into a [`RunResult`]. Every
//! terminal path returns a result; only request validation returns an error.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::agents::{Stage, StageContext, StageOutcome};
use crate::core::budget::Budget;
use crate::core::decision::{Decision, decide};
use crate::core::events::RunEvent;
use crate::core::invariants::check_run_invariants;
use crate::core::state::RunState;
use crate::core::types::RunStatus;
use crate::io::config::ReflexionConfig;
use crate::io::prompt::PromptBuilder;
use crate::io::reasoning::ReasoningPort;
use crate::request::{RequestError, RunRequest, RunSettings, resolve};
use crate::result::RunResult;
use crate::tools::ToolRegistry;

/// Where the loop is within the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planning,
    Executing(usize),
    Reviewing,
    Done,
}

/// Terminal status a stage boundary stopped the run with.
struct Stop {
    status: RunStatus,
    reason: String,
}

/// Event observer. Receives every [`RunEvent`] in emission order.
pub type EventSink<'a> = dyn FnMut(&RunEvent) + Send + 'a;

/// Shared, read-only collaborators for any number of runs.
#[derive(Clone)]
pub struct RunController {
    config: Arc<ReflexionConfig>,
    reasoner: Arc<dyn ReasoningPort>,
    tools: Arc<ToolRegistry>,
    prompts: PromptBuilder,
}

impl RunController {
    pub fn new(
        config: Arc<ReflexionConfig>,
        reasoner: Arc<dyn ReasoningPort>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let prompts = PromptBuilder::new(config.limits.prompt_budget_bytes);
        Self {
            config,
            reasoner,
            tools,
            prompts,
        }
    }

    pub fn config(&self) -> &ReflexionConfig {
        &self.config
    }

    pub fn reasoner(&self) -> &dyn ReasoningPort {
        self.reasoner.as_ref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run without observing events.
    pub async fn run(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<RunResult, RequestError> {
        self.run_with(request, cancel, &mut |_| {}).await
    }

    /// Run `request` to a terminal status, reporting progress to `on_event`.
    pub async fn run_with(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
        on_event: &mut EventSink<'_>,
    ) -> Result<RunResult, RequestError> {
        let settings = resolve(request, &self.config)?;
        let started = Instant::now();
        let deadline = self.config.limits.max_run().map(|limit| started + limit);
        let mut state = RunState::new(
            Uuid::new_v4().to_string(),
            settings.goal.clone(),
            Budget::new(settings.max_steps, deadline),
        );

        self.drive(&settings, &mut state, cancel, on_event).await;

        let violations = check_run_invariants(&state, settings.max_retries);
        for violation in &violations {
            error!(run_id = %state.run_id, violation = %violation, "run invariant violated");
        }
        let result = RunResult::assemble(&state, started.elapsed());
        info!(run_id = %result.run_id, summary = %result.summary_line(), "run finished");
        Ok(result)
    }

    #[instrument(skip_all, fields(run_id = %state.run_id))]
    async fn drive(
        &self,
        settings: &RunSettings,
        state: &mut RunState,
        cancel: &CancellationToken,
        on_event: &mut EventSink<'_>,
    ) {
        let ctx = StageContext {
            reasoner: self.reasoner.as_ref(),
            tools: &self.tools,
            config: &self.config,
            prompts: &self.prompts,
            cancel,
        };
        info!(
            goal = %state.goal,
            max_retries = settings.max_retries,
            threshold = settings.quality_threshold,
            max_steps = settings.max_steps,
            "run started"
        );
        on_event(&RunEvent::Started {
            run_id: state.run_id.clone(),
            goal: state.goal.clone(),
        });

        let mut phase = Phase::Planning;
        while phase != Phase::Done {
            debug!(?phase, attempt = state.attempt, "phase");
            phase = match phase {
                Phase::Planning => self.plan(&ctx, settings, state, on_event).await,
                Phase::Executing(index) => match state.plan.steps.get(index).map(Stage::for_step) {
                    None => Phase::Reviewing,
                    Some(None) => Phase::Executing(index + 1),
                    Some(Some(stage)) => match self.run_stage(&ctx, state, &stage, on_event).await {
                        Ok(_) => Phase::Executing(index + 1),
                        Err(stop) => finish(state, stop),
                    },
                },
                Phase::Reviewing => self.review(&ctx, settings, state, on_event).await,
                Phase::Done => Phase::Done,
            };
        }

        on_event(&RunEvent::Finished {
            status: state.status(),
            attempt: state.attempt,
            reason: state.stop_reason().unwrap_or_default().to_string(),
        });
    }

    async fn plan(
        &self,
        ctx: &StageContext<'_>,
        settings: &RunSettings,
        state: &mut RunState,
        on_event: &mut EventSink<'_>,
    ) -> Phase {
        let outcome = match self.run_stage(ctx, state, &Stage::Orchestrator, on_event).await {
            Ok(outcome) => outcome,
            Err(stop) => return finish(state, stop),
        };
        match outcome {
            StageOutcome::PlanningFailed(err) if state.budget.deadline_passed() => finish(
                state,
                Stop {
                    status: RunStatus::FailedBudgetExhausted,
                    reason: format!("run deadline passed during planning ({err})"),
                },
            ),
            StageOutcome::PlanningFailed(err) => {
                if !state.planning_restarted && state.attempt < settings.max_retries {
                    state.planning_restarted = true;
                    info!(err = %err, "restarting planning");
                    on_event(&RunEvent::Retrying {
                        attempt: state.attempt,
                        reason: format!("planning restart: {err}"),
                    });
                    Phase::Planning
                } else {
                    finish(
                        state,
                        Stop {
                            status: RunStatus::FailedFatalError,
                            reason: err.to_string(),
                        },
                    )
                }
            }
            _ => {
                info!(plan = %state.plan.describe(), "plan ready");
                on_event(&RunEvent::Planned {
                    attempt: state.attempt,
                    plan: state.plan.clone(),
                });
                Phase::Executing(0)
            }
        }
    }

    async fn review(
        &self,
        ctx: &StageContext<'_>,
        settings: &RunSettings,
        state: &mut RunState,
        on_event: &mut EventSink<'_>,
    ) -> Phase {
        if let Err(stop) = self.run_stage(ctx, state, &Stage::Critic, on_event).await {
            return finish(state, stop);
        }
        let Some(record) = state.latest_review().cloned() else {
            return finish(
                state,
                Stop {
                    status: RunStatus::FailedFatalError,
                    reason: "critic recorded no review".to_string(),
                },
            );
        };
        on_event(&RunEvent::Reviewed {
            attempt: record.attempt,
            score: record.score,
            feedback: record.feedback.clone(),
        });

        let threshold = settings.quality_threshold;
        match decide(record.score, threshold, state.attempt, settings.max_retries) {
            Decision::Accept => finish(
                state,
                Stop {
                    status: RunStatus::Succeeded,
                    reason: format!("score {:.2} met threshold {threshold:.2}", record.score),
                },
            ),
            Decision::Retry => {
                state.begin_retry(settings.notes_policy);
                let reason = format!("score {:.2} below threshold {threshold:.2}", record.score);
                info!(attempt = state.attempt, reason = %reason, "retrying");
                on_event(&RunEvent::Retrying {
                    attempt: state.attempt,
                    reason,
                });
                Phase::Planning
            }
            Decision::GiveUp => finish(
                state,
                Stop {
                    status: RunStatus::FailedMaxRetries,
                    reason: format!(
                        "score {:.2} below threshold {threshold:.2} after {} attempt(s)",
                        record.score,
                        state.attempt + 1
                    ),
                },
            ),
        }
    }

    /// Stage boundary: cancellation check, budget charge, then the stage.
    async fn run_stage(
        &self,
        ctx: &StageContext<'_>,
        state: &mut RunState,
        stage: &Stage,
        on_event: &mut EventSink<'_>,
    ) -> Result<StageOutcome, Stop> {
        if ctx.cancel.is_cancelled() {
            return Err(cancelled(stage));
        }
        if let Err(exhausted) = state.budget.try_consume() {
            let reason = format!("{exhausted} before {}", stage.role());
            return Err(Stop {
                status: RunStatus::FailedBudgetExhausted,
                reason,
            });
        }

        let role = stage.role();
        on_event(&RunEvent::StageStarted {
            attempt: state.attempt,
            role,
        });
        let outcome = stage.execute(ctx, state).await;
        info!(%role, remaining = state.budget.remaining(), outcome = %outcome.summary(), "stage finished");
        on_event(&RunEvent::StageFinished {
            attempt: state.attempt,
            role,
            summary: outcome.summary(),
        });
        match outcome {
            StageOutcome::Cancelled => Err(cancelled(stage)),
            StageOutcome::DeadlinePassed => Err(Stop {
                status: RunStatus::FailedBudgetExhausted,
                reason: format!("run deadline passed during {role}"),
            }),
            other => Ok(other),
        }
    }
}

fn cancelled(stage: &Stage) -> Stop {
    Stop {
        status: RunStatus::Cancelled,
        reason: format!("cancelled at {}", stage.role()),
    }
}

fn finish(state: &mut RunState, stop: Stop) -> Phase {
    info!(status = %stop.status, reason = %stop.reason, "run stopping");
    state.finish(stop.status, stop.reason);
    Phase::Done
}
