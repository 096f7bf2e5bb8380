//! Test-only collaborators: a scripted reasoner, scripted tools, and builders.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::controller::RunController;
use crate::core::types::Role;
use crate::io::config::ReflexionConfig;
use crate::io::reasoning::{ReasoningError, ReasoningPort, ReasoningRequest};
use crate::tools::{Tool, ToolRegistry};

/// One scripted reasoning response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(ReasoningError),
    /// Never completes; the caller's timeout or cancellation decides.
    Hang,
}

/// Reasoner that answers from per-role queues and records every request.
///
/// An exhausted queue answers `Unavailable`.
#[derive(Default)]
pub struct ScriptedReasoner {
    queues: Mutex<HashMap<Role, VecDeque<Scripted>>>,
    cancel_after: Mutex<HashMap<Role, CancellationToken>>,
    calls: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, role: Role, scripted: Scripted) -> Self {
        self.queues
            .lock()
            .expect("queues lock")
            .entry(role)
            .or_default()
            .push_back(scripted);
        self
    }

    pub fn reply(self, role: Role, text: impl Into<String>) -> Self {
        self.push(role, Scripted::Reply(text.into()))
    }

    pub fn fail(self, role: Role, err: ReasoningError) -> Self {
        self.push(role, Scripted::Fail(err))
    }

    pub fn hang(self, role: Role) -> Self {
        self.push(role, Scripted::Hang)
    }

    /// Cancel `token` as soon as `role` has been answered.
    pub fn cancel_after(self, role: Role, token: CancellationToken) -> Self {
        self.cancel_after
            .lock()
            .expect("cancel lock")
            .insert(role, token);
        self
    }

    pub fn calls(&self) -> Vec<ReasoningRequest> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn roles_called(&self) -> Vec<Role> {
        self.calls().iter().map(|call| call.role).collect()
    }
}

#[async_trait]
impl ReasoningPort for ScriptedReasoner {
    async fn complete(&self, request: &ReasoningRequest) -> Result<String, ReasoningError> {
        self.calls.lock().expect("calls lock").push(request.clone());
        let next = self
            .queues
            .lock()
            .expect("queues lock")
            .get_mut(&request.role)
            .and_then(VecDeque::pop_front);
        let result = match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(ReasoningError::Unavailable(format!(
                "no scripted reply for {}",
                request.role
            ))),
        };
        if let Some(token) = self.cancel_after.lock().expect("cancel lock").get(&request.role) {
            token.cancel();
        }
        result
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// One scripted tool response.
#[derive(Debug, Clone)]
pub enum ToolScript {
    Respond(Value),
    Fail(String),
    Delay(Duration, Value),
}

/// Tool that answers from a queue, repeating the last entry once drained.
pub struct ScriptedTool {
    name: String,
    script: Mutex<VecDeque<ToolScript>>,
    last: Mutex<Option<ToolScript>>,
    calls: AtomicUsize,
    args: Mutex<Vec<Value>>,
}

impl ScriptedTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            args: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, entry: ToolScript) -> Self {
        self.script.lock().expect("script lock").push_back(entry);
        self
    }

    pub fn respond(self, value: Value) -> Self {
        self.then(ToolScript::Respond(value))
    }

    pub fn fail(self, message: impl Into<String>) -> Self {
        self.then(ToolScript::Fail(message.into()))
    }

    pub fn delay(self, after: Duration, value: Value) -> Self {
        self.then(ToolScript::Delay(after, value))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Value> {
        self.args.lock().expect("args lock").clone()
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted tool"
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.args.lock().expect("args lock").push(args.clone());
        let entry = {
            let popped = self.script.lock().expect("script lock").pop_front();
            let mut last = self.last.lock().expect("last lock");
            if let Some(entry) = popped {
                *last = Some(entry);
            }
            last.clone()
        };
        match entry {
            Some(ToolScript::Respond(value)) => Ok(value),
            Some(ToolScript::Fail(message)) => Err(anyhow!(message)),
            Some(ToolScript::Delay(after, value)) => {
                tokio::time::sleep(after).await;
                Ok(value)
            }
            None => Err(anyhow!("no scripted response for {}", self.name)),
        }
    }
}

/// Orchestrator reply with the given `(agent, task)` steps.
pub fn plan_json(steps: &[(&str, &str)]) -> String {
    let tasks: Vec<Value> = steps
        .iter()
        .map(|(agent, task)| json!({ "agent": agent, "task": task }))
        .collect();
    format!("```json\n{}\n```", json!({ "tasks": tasks }))
}

/// Critic reply with the given score and feedback.
pub fn review_json(score: f64, feedback: &str) -> String {
    json!({ "score": score, "feedback": feedback }).to_string()
}

/// Search tool response in the shape of the shipped `web_search` tool.
pub fn search_hit(query: &str, text: &str) -> Value {
    json!({ "query": query, "count": 1, "text": text })
}

/// Defaults with short timeouts and no run deadline.
pub fn test_config() -> ReflexionConfig {
    let mut config = ReflexionConfig::default();
    config.limits.reasoning_timeout_secs = 2;
    config.limits.tool_timeout_secs = 1;
    config.limits.max_run_secs = 0;
    config
}

pub fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
    tools
        .into_iter()
        .fold(ToolRegistry::new(Duration::from_secs(1)), ToolRegistry::with)
}

pub fn controller(
    config: ReflexionConfig,
    reasoner: Arc<ScriptedReasoner>,
    tools: ToolRegistry,
) -> RunController {
    RunController::new(Arc::new(config), reasoner, Arc::new(tools))
}
