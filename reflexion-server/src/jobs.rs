//! In-memory job table and the task that drives one job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reflexion::core::events::RunEvent;
use reflexion::core::types::RunStatus;
use reflexion::io::config::ServerConfig;
use reflexion::request::RunRequest;
use reflexion::result::RunResult;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    /// The run reached a terminal status other than cancelled. The run
    /// status itself is in `result.status`.
    Completed,
    Cancelled,
    /// The run never started (rejected request).
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub query: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
}

/// Row of `GET /jobs`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub query: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobSummary {
    fn from(job: &JobRecord) -> Self {
        Self {
            job_id: job.job_id.clone(),
            query: job.query.clone(),
            status: job.status,
            run_status: job.result.as_ref().map(|result| result.status),
            final_score: job.result.as_ref().and_then(|result| result.final_score),
            created_at: job.created_at,
        }
    }
}

struct JobEntry {
    record: JobRecord,
    cancel: CancellationToken,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed)
    }
}

/// Jobs keyed by id. Finished jobs beyond `max_finished` are evicted, oldest
/// first, whenever a new job is registered.
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
    max_finished: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(ServerConfig::default().max_finished_jobs)
    }
}

impl JobStore {
    pub fn new(max_finished: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_finished,
        }
    }

    /// Register a queued job and return its id and cancellation token.
    pub async fn insert(&self, query: &str) -> (String, CancellationToken) {
        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let cancel = CancellationToken::new();
        let record = JobRecord {
            job_id: job_id.clone(),
            query: query.to_string(),
            status: JobStatus::Queued,
            run_id: None,
            attempt: 0,
            progress: None,
            error: None,
            created_at: now,
            updated_at: now,
            result: None,
        };
        let mut jobs = self.jobs.write().await;
        self.evict_finished(&mut jobs);
        jobs.insert(
            job_id.clone(),
            JobEntry {
                record,
                cancel: cancel.clone(),
            },
        );
        (job_id, cancel)
    }

    fn evict_finished(&self, jobs: &mut HashMap<String, JobEntry>) {
        let mut finished: Vec<(DateTime<Utc>, String)> = jobs
            .values()
            .filter(|entry| entry.record.status.is_finished())
            .map(|entry| (entry.record.updated_at, entry.record.job_id.clone()))
            .collect();
        if finished.len() <= self.max_finished {
            return;
        }
        finished.sort();
        let excess = finished.len() - self.max_finished;
        for (_, job_id) in finished.into_iter().take(excess) {
            jobs.remove(&job_id);
            debug!(job_id = %job_id, "evicted finished job");
        }
    }

    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.record.clone())
    }

    /// Summaries, oldest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut summaries: Vec<JobSummary> = jobs
            .values()
            .map(|entry| JobSummary::from(&entry.record))
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        summaries
    }

    /// Apply `change` to a job. `None` if the job is gone.
    pub async fn update(
        &self,
        job_id: &str,
        change: impl FnOnce(&mut JobRecord),
    ) -> Option<JobRecord> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(job_id)?;
        change(&mut entry.record);
        entry.record.updated_at = Utc::now();
        Some(entry.record.clone())
    }

    /// Cancel and forget a job.
    pub async fn remove(&self, job_id: &str) -> Option<JobRecord> {
        let entry = self.jobs.write().await.remove(job_id)?;
        entry.cancel.cancel();
        Some(entry.record)
    }

    pub async fn cancel_all(&self) {
        for entry in self.jobs.read().await.values() {
            entry.cancel.cancel();
        }
    }
}

/// Progress line stored on the job for an event.
pub fn describe_event(event: &RunEvent) -> String {
    match event {
        RunEvent::Started { run_id, .. } => format!("run {run_id} started"),
        RunEvent::StageStarted { attempt, role } => format!("attempt {attempt}: {role} running"),
        RunEvent::StageFinished {
            attempt,
            role,
            summary,
        } => format!("attempt {attempt}: {role} {summary}"),
        RunEvent::Planned { attempt, plan } => {
            format!("attempt {attempt}: plan {}", plan.describe())
        }
        RunEvent::Reviewed { attempt, score, .. } => {
            format!("attempt {attempt}: score {score:.2}")
        }
        RunEvent::Retrying { attempt, reason } => format!("retrying as attempt {attempt}: {reason}"),
        RunEvent::Finished { status, .. } => format!("finished: {status}"),
    }
}

fn event_attempt(event: &RunEvent) -> Option<u32> {
    match event {
        RunEvent::Started { .. } => None,
        RunEvent::StageStarted { attempt, .. }
        | RunEvent::StageFinished { attempt, .. }
        | RunEvent::Planned { attempt, .. }
        | RunEvent::Reviewed { attempt, .. }
        | RunEvent::Retrying { attempt, .. }
        | RunEvent::Finished { attempt, .. } => Some(*attempt),
    }
}

/// Run a queued job on its own task.
pub fn spawn_job(state: AppState, job_id: String, request: RunRequest, cancel: CancellationToken) {
    tokio::spawn(async move {
        if state
            .jobs
            .update(&job_id, |job| job.status = JobStatus::Running)
            .await
            .is_none()
        {
            return;
        }
        state.notify(&job_id, JobStatus::Running, "running");

        let (tx, mut rx) = mpsc::unbounded_channel::<RunEvent>();
        let forward = tokio::spawn({
            let state = state.clone();
            let job_id = job_id.clone();
            async move {
                while let Some(event) = rx.recv().await {
                    let detail = describe_event(&event);
                    let progress = detail.clone();
                    state
                        .jobs
                        .update(&job_id, |job| {
                            if let RunEvent::Started { run_id, .. } = &event {
                                job.run_id = Some(run_id.clone());
                            }
                            if let Some(attempt) = event_attempt(&event) {
                                job.attempt = attempt;
                            }
                            job.progress = Some(progress);
                        })
                        .await;
                    state.notify(&job_id, JobStatus::Running, &detail);
                }
            }
        });

        let outcome = state
            .controller
            .run_with(&request, &cancel, &mut |event| {
                let _ = tx.send(event.clone());
            })
            .await;
        drop(tx);
        if let Err(err) = forward.await {
            warn!(job_id = %job_id, err = %err, "progress forwarder failed");
        }

        match outcome {
            Ok(result) => {
                let status = if result.status == RunStatus::Cancelled {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Completed
                };
                let summary = result.summary_line();
                info!(job_id = %job_id, summary = %summary, "job finished");
                state
                    .jobs
                    .update(&job_id, |job| {
                        job.status = status;
                        job.result = Some(result);
                    })
                    .await;
                state.notify(&job_id, status, &summary);
            }
            Err(err) => {
                warn!(job_id = %job_id, err = %err, "job rejected");
                let message = err.to_string();
                state
                    .jobs
                    .update(&job_id, |job| {
                        job.status = JobStatus::Failed;
                        job.error = Some(message.clone());
                    })
                    .await;
                state.notify(&job_id, JobStatus::Failed, &message);
            }
        }
    });
}
