//! Shared application state for the job server.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use reflexion::controller::RunController;

use crate::jobs::{JobStatus, JobStore};

/// Job change broadcast to SSE clients.
#[derive(Debug, Clone, Serialize)]
pub struct JobChange {
    pub job_id: String,
    pub status: JobStatus,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// Collaborator configuration reported by `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub reasoning_backend: String,
    pub reasoning_api_key: bool,
    pub search_api_key: bool,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
    pub jobs: Arc<JobStore>,
    pub event_tx: Arc<broadcast::Sender<JobChange>>,
    /// Required `X-API-Key` value. `None` disables the check.
    pub api_key: Option<Arc<str>>,
    pub health: HealthInfo,
}

impl AppState {
    pub fn new(controller: RunController, api_key: Option<String>, health: HealthInfo) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let max_finished = controller.config().server.max_finished_jobs;
        Self {
            controller,
            jobs: Arc::new(JobStore::new(max_finished)),
            event_tx: Arc::new(event_tx),
            api_key: api_key.map(Arc::from),
            health,
        }
    }

    /// Broadcast a job change. Having no subscribers is fine.
    pub fn notify(&self, job_id: &str, status: JobStatus, detail: &str) {
        let _ = self.event_tx.send(JobChange {
            job_id: job_id.to_string(),
            status,
            detail: detail.to_string(),
            at: Utc::now(),
        });
    }
}
