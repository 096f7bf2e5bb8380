//! Loop-level scenarios for the reflexion controller.
//!
//! Every test scripts the reasoner per role and the tools per call, then
//! drives `RunController::run_with` to a terminal status and inspects the
//! result, the recorded calls, and the emitted events.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use reflexion::controller::RunController;
use reflexion::core::events::RunEvent;
use reflexion::core::types::{NotesPolicy, Role, RunStatus};
use reflexion::io::config::ReflexionConfig;
use reflexion::io::journal::{JournalPaths, RunJournal};
use reflexion::io::reasoning::ReasoningError;
use reflexion::request::{RequestError, RunOverrides, RunRequest};
use reflexion::result::RunResult;
use reflexion::tools::code_validator::CodeValidatorTool;
use reflexion::tools::{CODE_VALIDATOR, Tool, WEB_SEARCH};
use reflexion::test_support::{
    ScriptedReasoner, ScriptedTool, controller, plan_json, registry, review_json, search_hit,
    test_config,
};

const EMPTY_PLAN: &[(&str, &str)] = &[];

fn request(goal: &str, max_retries: u32) -> RunRequest {
    RunRequest::new(goal).with_overrides(RunOverrides {
        max_retries: Some(max_retries),
        ..RunOverrides::default()
    })
}

async fn run_collecting(
    controller: &RunController,
    request: &RunRequest,
    cancel: &CancellationToken,
) -> (RunResult, Vec<RunEvent>) {
    let mut events = Vec::new();
    let result = controller
        .run_with(request, cancel, &mut |event| events.push(event.clone()))
        .await
        .expect("valid request");
    (result, events)
}

fn search_tool() -> Arc<ScriptedTool> {
    Arc::new(ScriptedTool::new(WEB_SEARCH).respond(search_hit(
        "query",
        "• TCP\n  Transmission Control Protocol\n  Source: https://example.com/tcp",
    )))
}

fn valid_validator() -> Arc<ScriptedTool> {
    Arc::new(
        ScriptedTool::new(CODE_VALIDATOR).respond(json!({"valid": true, "message": "syntax OK"})),
    )
}

/// Empty plan, one good review: succeeds on the first attempt.
#[tokio::test]
async fn empty_plan_high_score_succeeds_first_attempt() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.9, "complete answer")),
    );
    let controller = controller(test_config(), reasoner.clone(), registry(vec![]));

    let (result, events) =
        run_collecting(&controller, &request("What is 2+2?", 2), &CancellationToken::new()).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.attempt, 0);
    assert_eq!(result.history.len(), 1);
    assert_eq!(result.final_score, Some(0.9));
    assert_eq!(result.steps_used, 2);
    assert_eq!(reasoner.roles_called(), vec![Role::Orchestrator, Role::Critic]);
    assert_eq!(events.first().map(RunEvent::name), Some("started"));
    assert_eq!(events.last().map(RunEvent::name), Some("finished"));
}

#[tokio::test]
async fn score_equal_to_threshold_succeeds() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.6, "just enough")),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));

    let result = controller
        .run(&request("goal", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.history.len(), 1);
}

/// Every review below threshold: one review per attempt, then give up.
#[tokio::test]
async fn low_scores_exhaust_retries() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.3, "try a different angle"))
            .reply(Role::Critic, review_json(0.4, "try a different angle"))
            .reply(Role::Critic, review_json(0.5, "still short")),
    );
    let controller = controller(test_config(), reasoner.clone(), registry(vec![]));

    let (result, events) =
        run_collecting(&controller, &request("goal", 2), &CancellationToken::new()).await;

    assert_eq!(result.status, RunStatus::FailedMaxRetries);
    assert_eq!(result.attempt, 2);
    let scores: Vec<f64> = result.history.iter().map(|r| r.score).collect();
    assert_eq!(scores, vec![0.3, 0.4, 0.5]);
    let attempts: Vec<u32> = result.history.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![0, 1, 2]);
    assert_eq!(result.best_score, Some(0.5));
    let retries = events
        .iter()
        .filter(|event| matches!(event, RunEvent::Retrying { .. }))
        .count();
    assert_eq!(retries, 2);

    // The retry plan prompt carries the latest feedback.
    let orchestrator_prompts: Vec<String> = reasoner
        .calls()
        .into_iter()
        .filter(|call| call.role == Role::Orchestrator)
        .map(|call| call.prompt)
        .collect();
    assert_eq!(orchestrator_prompts.len(), 3);
    assert!(!orchestrator_prompts[0].contains("try a different angle"));
    assert!(orchestrator_prompts[1].contains("try a different angle"));
}

#[tokio::test]
async fn one_retry_yields_two_reviews() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.3, "weak"))
            .reply(Role::Critic, review_json(0.4, "weak")),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));

    let result = controller
        .run(&request("goal", 1), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedMaxRetries);
    assert_eq!(result.attempt, 1);
    assert_eq!(result.history.len(), 2);
}

/// Budget runs out after the researcher: partial notes survive, no code.
#[tokio::test]
async fn budget_exhausted_after_research_keeps_partial_notes() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(
                Role::Orchestrator,
                plan_json(&[("researcher", "find TCP basics"), ("coder", "write a client")]),
            )
            .reply(Role::Researcher, "TCP is a reliable byte stream."),
    );
    let search = search_tool();
    let controller = controller(
        test_config(),
        reasoner.clone(),
        registry(vec![search.clone(), valid_validator()]),
    );
    let request = RunRequest::new("Explain TCP and write a client").with_overrides(RunOverrides {
        max_steps: Some(2),
        ..RunOverrides::default()
    });

    let result = controller
        .run(&request, &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedBudgetExhausted);
    assert_eq!(result.code, None);
    assert_eq!(result.research_notes, vec!["TCP is a reliable byte stream."]);
    assert!(result.history.is_empty());
    assert_eq!(result.budget_remaining, 0);
    assert_eq!(search.call_count(), 1);
    assert!(!reasoner.roles_called().contains(&Role::Coder));
    assert!(result.stop_reason.contains("coder"));
}

/// A search that times out degrades to a note; the critic still runs.
#[tokio::test]
async fn search_timeout_degrades_and_review_still_runs() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("research", "latest TCP RFC")]))
            .reply(Role::Researcher, "From general knowledge: RFC 9293.")
            .reply(Role::Critic, review_json(0.8, "fine")),
    );
    let slow_search = Arc::new(
        ScriptedTool::new(WEB_SEARCH).delay(Duration::from_secs(5), search_hit("q", "late")),
    );
    let controller = controller(test_config(), reasoner.clone(), registry(vec![slow_search]));

    let result = controller
        .run(&request("Which RFC defines TCP?", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(
        result.research_notes[0].starts_with("search unavailable:"),
        "notes: {:?}",
        result.research_notes
    );
    assert!(result.research_notes[0].contains("timed out"));
    assert_eq!(result.research_notes[1], "From general knowledge: RFC 9293.");
    assert_eq!(result.history.len(), 1);
    let researcher_prompt = reasoner
        .calls()
        .into_iter()
        .find(|call| call.role == Role::Researcher)
        .expect("researcher called")
        .prompt;
    assert!(researcher_prompt.contains("search unavailable"));
}

#[tokio::test]
async fn unregistered_search_tool_is_a_degraded_note() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("researcher", "anything")]))
            .fail(Role::Researcher, ReasoningError::Unavailable("provider down".into()))
            .reply(Role::Critic, review_json(0.7, "ok")),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));

    let result = controller
        .run(&request("goal", 0), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert!(result.research_notes[0].contains("not registered"));
    assert!(result.research_notes[1].starts_with("research summary unavailable:"));
}

/// Cancellation observed at the boundary between coder and critic.
#[tokio::test]
async fn cancellation_between_coder_and_critic() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("coder", "print hello")]))
            .reply(Role::Coder, "```python\nprint('hello')\n```")
            .reply(Role::Critic, review_json(0.9, "never seen")),
    );
    let controller = controller(
        test_config(),
        reasoner.clone(),
        registry(vec![Arc::new(CodeValidatorTool)]),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let result = controller
        .run_with(&request("Print hello", 2), &cancel, &mut |event| {
            if let RunEvent::StageFinished {
                role: Role::Coder, ..
            } = event
            {
                trigger.cancel();
            }
        })
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.history.is_empty());
    let code = result.code.expect("code kept");
    assert!(code.valid);
    assert_eq!(code.code, "print('hello')");
    assert!(!reasoner.roles_called().contains(&Role::Critic));
}

#[tokio::test]
async fn cancellation_aborts_in_flight_review() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .hang(Role::Critic),
    );
    let mut config = test_config();
    config.limits.reasoning_timeout_secs = 30;
    let controller = controller(config, reasoner, registry(vec![]));
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    });

    let result = controller.run(&request("goal", 2), &cancel).await.expect("run");

    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.history.is_empty());
}

#[tokio::test]
async fn coder_regenerates_after_validation_failure() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("coder", "add two numbers")]))
            .reply(Role::Coder, "```python\ndef add(a, b:\n    return a + b\n```")
            .reply(Role::Coder, "```python\ndef add(a, b):\n    return a + b\n```")
            .reply(Role::Critic, review_json(0.85, "correct")),
    );
    let controller = controller(
        test_config(),
        reasoner.clone(),
        registry(vec![Arc::new(CodeValidatorTool)]),
    );

    let result = controller
        .run(&request("Add two numbers in Python", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    let code = result.code.expect("code");
    assert!(code.valid);
    assert_eq!(code.local_attempts, 2);
    let coder_prompts: Vec<String> = reasoner
        .calls()
        .into_iter()
        .filter(|call| call.role == Role::Coder)
        .map(|call| call.prompt)
        .collect();
    assert_eq!(coder_prompts.len(), 2);
    assert!(coder_prompts[1].contains("def add(a, b:"));
}

#[tokio::test]
async fn coder_gives_up_after_three_invalid_generations() {
    let broken = "```python\ndef broken(:\n    pass\n```";
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("coder", "write it")]))
            .reply(Role::Coder, broken)
            .reply(Role::Coder, broken)
            .reply(Role::Coder, broken)
            .reply(Role::Critic, review_json(0.2, "code has a syntax error")),
    );
    let controller = controller(
        test_config(),
        reasoner.clone(),
        registry(vec![Arc::new(CodeValidatorTool)]),
    );

    let result = controller
        .run(&request("goal", 0), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedMaxRetries);
    let code = result.code.expect("invalid code is kept");
    assert!(!code.valid);
    assert_eq!(code.local_attempts, 3);
    assert!(code.validation_error.is_some());
    let coder_calls = reasoner
        .roles_called()
        .into_iter()
        .filter(|role| *role == Role::Coder)
        .count();
    assert_eq!(coder_calls, 3);
}

#[tokio::test]
async fn coder_failure_clears_artifact_with_note() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("coder", "write it")]))
            .fail(Role::Coder, ReasoningError::Unavailable("quota".into()))
            .reply(Role::Critic, review_json(0.1, "no code")),
    );
    let controller = controller(test_config(), reasoner, registry(vec![valid_validator()]));

    let result = controller
        .run(&request("goal", 0), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.code, None);
    assert!(
        result
            .research_notes
            .iter()
            .any(|note| note.starts_with("code generation unavailable:") && note.contains("quota"))
    );
}

#[tokio::test]
async fn critic_failure_records_zero_and_retries() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .fail(Role::Critic, ReasoningError::Unavailable("502".into()))
            .reply(Role::Critic, "Score: 0.75 - good enough"),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));

    let result = controller
        .run(&request("goal", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.attempt, 1);
    assert_eq!(result.history[0].score, 0.0);
    assert!(result.history[0].feedback.starts_with("review unavailable:"));
    assert_eq!(result.history[1].score, 0.75);
}

#[tokio::test]
async fn unparsable_plan_restarts_planning_once() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, "I think we should research first.")
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.9, "good")),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));

    let (result, events) =
        run_collecting(&controller, &request("goal", 1), &CancellationToken::new()).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.attempt, 0);
    assert_eq!(result.steps_used, 3);
    assert!(events.iter().any(|event| matches!(
        event,
        RunEvent::Retrying { reason, .. } if reason.starts_with("planning restart")
    )));
}

#[tokio::test]
async fn planning_failure_without_retries_is_fatal() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, r#"{"tasks": [{"agent": "astronaut", "task": "x"}]}"#),
    );
    let controller = controller(test_config(), reasoner.clone(), registry(vec![]));

    let result = controller
        .run(&request("goal", 0), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedFatalError);
    assert!(result.stop_reason.contains("astronaut"));
    assert_eq!(reasoner.roles_called(), vec![Role::Orchestrator]);
}

#[tokio::test]
async fn second_planning_failure_is_fatal() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, "no json")
            .reply(Role::Orchestrator, "still no json"),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));

    let result = controller
        .run(&request("goal", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedFatalError);
    assert_eq!(result.steps_used, 2);
}

fn research_retry_reasoner() -> Arc<ScriptedReasoner> {
    Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("researcher", "history of TCP")]))
            .reply(Role::Orchestrator, plan_json(&[("researcher", "history of TCP")]))
            .reply(Role::Researcher, "note from attempt 0")
            .reply(Role::Researcher, "note from attempt 1")
            .reply(Role::Critic, review_json(0.3, "needs more sources"))
            .reply(Role::Critic, review_json(0.9, "thorough")),
    )
}

#[tokio::test]
async fn accumulate_policy_keeps_notes_across_attempts() {
    let search = search_tool();
    let controller = controller(
        test_config(),
        research_retry_reasoner(),
        registry(vec![search.clone()]),
    );

    let result = controller
        .run(&request("History of TCP", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(
        result.research_notes,
        vec!["note from attempt 0", "note from attempt 1"]
    );
    // Retry adds a feedback-focused query.
    assert_eq!(search.call_count(), 3);
    let second_query = search.received()[2]["query"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(second_query.contains("needs more sources"));
}

#[tokio::test]
async fn reset_policy_clears_notes_on_retry() {
    let mut config = test_config();
    config.research.notes_policy = NotesPolicy::Reset;
    let controller = controller(config, research_retry_reasoner(), registry(vec![search_tool()]));

    let result = controller
        .run(&request("History of TCP", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.research_notes, vec!["note from attempt 1"]);
}

#[tokio::test]
async fn failed_run_reports_best_attempt() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("researcher", "topic")]))
            .reply(Role::Orchestrator, plan_json(&[("researcher", "topic")]))
            .reply(Role::Researcher, "strong note")
            .reply(Role::Researcher, "weak note")
            .reply(Role::Critic, review_json(0.5, "close"))
            .reply(Role::Critic, review_json(0.2, "worse")),
    );
    let mut config = test_config();
    config.research.notes_policy = NotesPolicy::Reset;
    let controller = controller(config, reasoner, registry(vec![search_tool()]));

    let result = controller
        .run(&request("topic", 1), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedMaxRetries);
    assert_eq!(result.final_score, Some(0.2));
    assert_eq!(result.best_score, Some(0.5));
    assert_eq!(result.research_notes, vec!["strong note"]);
    assert!(result.output.contains("strong note"));
}

#[tokio::test]
async fn skip_code_plan_costs_no_budget() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(
                Role::Orchestrator,
                plan_json(&[("coder", "write"), ("skip_code", "no code needed")]),
            )
            .reply(Role::Critic, review_json(0.9, "good")),
    );
    let validator = valid_validator();
    let controller = controller(test_config(), reasoner, registry(vec![validator.clone()]));

    let result = controller
        .run(&request("Define TCP", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.steps_used, 2);
    assert_eq!(validator.call_count(), 0);
    assert_eq!(result.plan.describe(), "skip_code");
}

#[tokio::test]
async fn invalid_request_runs_nothing() {
    let reasoner = Arc::new(ScriptedReasoner::new());
    let controller = controller(ReflexionConfig::default(), reasoner.clone(), registry(vec![]));

    let err = controller
        .run(&RunRequest::new("   "), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err, RequestError::EmptyGoal);
    assert!(reasoner.calls().is_empty());
}

#[tokio::test]
async fn journal_records_attempts_and_result() {
    let dir = tempfile::tempdir().expect("tempdir");
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.1, "weak"))
            .reply(Role::Critic, review_json(0.95, "great")),
    );
    let controller = controller(test_config(), reasoner, registry(vec![]));
    let mut journal = RunJournal::new(dir.path());

    let result = controller
        .run_with(&request("goal", 2), &CancellationToken::new(), &mut |event| {
            journal.record(event).expect("journal event");
        })
        .await
        .expect("run");
    let result_path = journal.write_result(&result).expect("write result");

    let paths = JournalPaths::new(dir.path(), &result.run_id);
    assert_eq!(result_path, paths.result_path);
    assert!(paths.attempt_dir(0).join("plan.json").exists());
    assert!(paths.attempt_dir(0).join("review.json").exists());
    assert!(paths.attempt_dir(1).join("review.json").exists());
    let events = std::fs::read_to_string(&paths.events_path).expect("events");
    assert!(events.lines().count() >= 8);
    let saved: RunResult =
        serde_json::from_str(&std::fs::read_to_string(&result_path).expect("result"))
            .expect("parse result");
    assert_eq!(saved.status, RunStatus::Succeeded);
}

#[test]
fn registry_lookups_do_not_mutate() {
    let registry = registry(vec![valid_validator(), search_tool()]);
    let before = registry.names().join(",");
    assert!(registry.contains(WEB_SEARCH));
    assert!(registry.contains(WEB_SEARCH));
    assert!(!registry.contains("missing"));
    assert_eq!(registry.names().join(","), before);
    let tool: &dyn Tool = &CodeValidatorTool;
    assert_eq!(tool.name(), CODE_VALIDATOR);
}

fn deadline_config(max_run_secs: u64) -> ReflexionConfig {
    let mut config = test_config();
    config.limits.max_run_secs = max_run_secs;
    config.limits.reasoning_timeout_secs = 30;
    config
}

/// The deadline passes after research finished: the critic never starts and
/// the research notes survive.
#[tokio::test]
async fn deadline_between_stages_stops_before_review() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("researcher", "TCP basics")]))
            .reply(Role::Researcher, "TCP is a reliable byte stream.")
            .reply(Role::Critic, review_json(0.9, "never seen")),
    );
    let controller = controller(deadline_config(1), reasoner.clone(), registry(vec![search_tool()]));

    let result = controller
        .run_with(&request("Explain TCP", 2), &CancellationToken::new(), &mut |event| {
            if let RunEvent::StageFinished {
                role: Role::Researcher,
                ..
            } = event
            {
                std::thread::sleep(Duration::from_millis(1100));
            }
        })
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedBudgetExhausted);
    assert!(result.stop_reason.contains("deadline"), "{}", result.stop_reason);
    assert!(result.stop_reason.contains("critic"), "{}", result.stop_reason);
    assert_eq!(result.research_notes, vec!["TCP is a reliable byte stream."]);
    assert!(result.history.is_empty());
    assert!(!reasoner.roles_called().contains(&Role::Critic));
}

/// A review cut short by the deadline is not a score: no zero is recorded and
/// the run does not retry.
#[tokio::test]
async fn deadline_during_review_is_budget_exhaustion() {
    for max_retries in [0, 2] {
        let reasoner = Arc::new(
            ScriptedReasoner::new()
                .reply(Role::Orchestrator, plan_json(&[("researcher", "TCP basics")]))
                .reply(Role::Researcher, "TCP is a reliable byte stream.")
                .hang(Role::Critic),
        );
        let controller =
            controller(deadline_config(1), reasoner.clone(), registry(vec![search_tool()]));

        let (result, events) = run_collecting(
            &controller,
            &request("Explain TCP", max_retries),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.status, RunStatus::FailedBudgetExhausted, "max_retries={max_retries}");
        assert!(
            result.stop_reason.contains("during critic"),
            "{}",
            result.stop_reason
        );
        assert_eq!(result.attempt, 0);
        assert!(result.history.is_empty());
        assert_eq!(result.final_score, None);
        assert_eq!(result.research_notes, vec!["TCP is a reliable byte stream."]);
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, RunEvent::Reviewed { .. } | RunEvent::Retrying { .. }))
        );
        assert_eq!(reasoner.roles_called().iter().filter(|r| **r == Role::Orchestrator).count(), 1);
    }
}

/// Earlier reviews stay in the history when a later review hits the deadline.
#[tokio::test]
async fn deadline_during_second_review_keeps_first_review() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .reply(Role::Critic, review_json(0.3, "too short"))
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN))
            .hang(Role::Critic),
    );
    let controller = controller(deadline_config(1), reasoner, registry(vec![]));

    let result = controller
        .run(&request("Explain TCP", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedBudgetExhausted);
    assert_eq!(result.attempt, 1);
    assert_eq!(result.history.len(), 1);
    assert_eq!(result.history[0].score, 0.3);
}

/// A planning call cut short by the deadline does not restart planning.
#[tokio::test]
async fn deadline_during_planning_is_budget_exhaustion() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .hang(Role::Orchestrator)
            .reply(Role::Orchestrator, plan_json(EMPTY_PLAN)),
    );
    let controller = controller(deadline_config(1), reasoner.clone(), registry(vec![]));

    let result = controller
        .run(&request("Explain TCP", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::FailedBudgetExhausted);
    assert!(result.stop_reason.contains("deadline"), "{}", result.stop_reason);
    assert!(result.history.is_empty());
    assert_eq!(reasoner.roles_called(), vec![Role::Orchestrator]);
}

/// A retry plan without a code step does not hand the critic the earlier
/// attempt's code.
#[tokio::test]
async fn retry_without_code_step_drops_earlier_code() {
    let reasoner = Arc::new(
        ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[("coder", "print hello")]))
            .reply(Role::Coder, "```python\nprint('hello')\n```")
            .reply(Role::Critic, review_json(0.3, "the explanation should stand alone"))
            .reply(Role::Orchestrator, plan_json(&[("skip_code", "prose only")]))
            .reply(Role::Critic, review_json(0.9, "clear")),
    );
    let controller = controller(test_config(), reasoner.clone(), registry(vec![valid_validator()]));

    let result = controller
        .run(&request("Explain hello world", 2), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.attempt, 1);
    assert_eq!(result.code, None);
    let critic_prompts: Vec<String> = reasoner
        .calls()
        .into_iter()
        .filter(|call| call.role == Role::Critic)
        .map(|call| call.prompt)
        .collect();
    assert!(critic_prompts[0].contains("print('hello')"));
    assert!(!critic_prompts[1].contains("print('hello')"));
    assert!(critic_prompts[1].contains("no code was produced"));
}
