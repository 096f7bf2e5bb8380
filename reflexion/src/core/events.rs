//! Progress events emitted by the controller.

use serde::Serialize;

use crate::core::types::{Plan, Role, RunStatus};

/// Observable step of a run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: String,
        goal: String,
    },
    StageStarted {
        attempt: u32,
        role: Role,
    },
    StageFinished {
        attempt: u32,
        role: Role,
        summary: String,
    },
    Planned {
        attempt: u32,
        plan: Plan,
    },
    Reviewed {
        attempt: u32,
        score: f64,
        feedback: String,
    },
    /// The loop entered `attempt` after a low score or a planning failure.
    Retrying {
        attempt: u32,
        reason: String,
    },
    Finished {
        status: RunStatus,
        attempt: u32,
        reason: String,
    },
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Started { .. } => "started",
            RunEvent::StageStarted { .. } => "stage_started",
            RunEvent::StageFinished { .. } => "stage_finished",
            RunEvent::Planned { .. } => "planned",
            RunEvent::Reviewed { .. } => "reviewed",
            RunEvent::Retrying { .. } => "retrying",
            RunEvent::Finished { .. } => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = RunEvent::Reviewed {
            attempt: 1,
            score: 0.5,
            feedback: "more detail".into(),
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["event"], "reviewed");
        assert_eq!(json["attempt"], 1);
        assert_eq!(event.name(), "reviewed");
    }
}
