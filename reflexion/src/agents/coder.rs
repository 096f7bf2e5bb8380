//! Coder stage: generate code, syntax-check it, and regenerate locally on
//! validation failure.

use serde_json::json;
use tracing::{debug, warn};

use crate::core::fenced::extract_code_block;
use crate::core::state::RunState;
use crate::core::types::{CodeArtifact, Role};
use crate::io::prompt::PromptInputs;
use crate::io::reasoning::ReasoningError;
use crate::tools::{CODE_VALIDATOR, ToolError};

use super::{StageContext, StageOutcome};

/// Generations per coder invocation before the last artifact is kept as-is.
pub const MAX_LOCAL_ATTEMPTS: u32 = 3;

pub(super) async fn run(ctx: &StageContext<'_>, state: &mut RunState, task: &str) -> StageOutcome {
    let language = ctx.config.coder.language.clone();
    let mut artifact: Option<CodeArtifact> = None;
    let mut validation_error: Option<String> = None;
    let mut previous_code: Option<String> = None;
    let mut generation_failure: Option<String> = None;

    for local in 1..=MAX_LOCAL_ATTEMPTS {
        let inputs = PromptInputs {
            goal: state.goal.clone(),
            task: task.to_string(),
            attempt: state.attempt,
            feedback: state.latest_feedback().map(str::to_string),
            notes: state.research_notes.clone(),
            language: language.clone(),
            validation_error: validation_error.clone(),
            previous_code: previous_code.clone(),
            ..PromptInputs::default()
        };

        let reply = match ctx.reason(state, Role::Coder, &inputs).await {
            Ok(reply) => reply,
            Err(ReasoningError::Cancelled) => return StageOutcome::Cancelled,
            Err(err) => {
                // A failing backend ends local regeneration; any earlier
                // artifact is kept.
                warn!(err = %err, local, "code generation failed");
                generation_failure = Some(err.to_string());
                break;
            }
        };
        let code = extract_code_block(&reply, &language).to_string();

        let verdict = ctx
            .tool(
                state,
                CODE_VALIDATOR,
                &json!({ "language": language, "code": code }),
            )
            .await;
        match verdict {
            Ok(value) => {
                let valid = value["valid"].as_bool().unwrap_or(false);
                let message = value["message"]
                    .as_str()
                    .unwrap_or("syntax error")
                    .to_string();
                debug!(local, valid, "validated generated code");
                artifact = Some(CodeArtifact {
                    language: language.clone(),
                    code: code.clone(),
                    valid,
                    validation_error: (!valid).then(|| message.clone()),
                    local_attempts: local,
                });
                if valid {
                    break;
                }
                validation_error = Some(message);
                previous_code = Some(code);
            }
            Err(ToolError::Cancelled(_)) => return StageOutcome::Cancelled,
            Err(err) => {
                warn!(err = %err, "validator unavailable");
                artifact = Some(CodeArtifact {
                    language: language.clone(),
                    code,
                    valid: false,
                    validation_error: Some(format!("validation unavailable: {err}")),
                    local_attempts: local,
                });
                break;
            }
        }
    }

    match artifact {
        Some(artifact) => {
            let outcome = StageOutcome::Coded {
                valid: artifact.valid,
                local_attempts: artifact.local_attempts,
            };
            state.code_artifact = Some(artifact);
            outcome
        }
        None => {
            let reason = generation_failure.unwrap_or_else(|| "no code produced".to_string());
            state.code_artifact = None;
            state.append_note(format!("code generation unavailable: {reason}"));
            StageOutcome::Coded {
                valid: false,
                local_attempts: 0,
            }
        }
    }
}
