//! HTTP routes of the job API.

use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{Json, Response};
use axum::Router;
use axum::routing::{delete, get, post};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, instrument};

use reflexion::request::{RunOverrides, RunRequest, resolve};

use crate::error::ApiError;
use crate::jobs::{self, JobRecord, JobStatus, JobSummary};
use crate::sse;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Full application router. `/` and `/health` are open; everything else
/// goes through the API key check.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/query", post(submit_query))
        .route("/status/{job_id}", get(job_status))
        .route("/jobs", get(list_jobs))
        .route("/job/{job_id}", delete(cancel_job))
        .route("/events", get(sse::events_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

/// Validate the `X-API-Key` header against the configured key.
pub fn check_api_key(expected: Option<&str>, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    match headers.get(API_KEY_HEADER).and_then(|value| value.to_str().ok()) {
        None => Err(ApiError::MissingApiKey),
        Some(given) if given == expected => Ok(()),
        Some(_) => Err(ApiError::InvalidApiKey),
    }
}

async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    check_api_key(state.api_key.as_deref(), request.headers())?;
    Ok(next.run(request).await)
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "service": "reflexion",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": ["/health", "/query", "/status/{job_id}", "/jobs", "/job/{job_id}", "/events"],
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let info = &state.health;
    let status = if info.reasoning_api_key {
        "healthy"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "reasoning_backend": info.reasoning_backend,
        "reasoning_api_key": if info.reasoning_api_key { "configured" } else { "missing" },
        "search_api_key": if info.search_api_key { "configured" } else { "missing" },
        "tools": state.controller.tools().names(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Body of `POST /query`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryBody {
    pub query: String,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub quality_threshold: Option<f64>,
    #[serde(default)]
    pub max_steps: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub job_id: String,
    pub status: JobStatus,
}

#[instrument(skip_all)]
pub async fn submit_query(
    State(state): State<AppState>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueuedJob>, ApiError> {
    let request = RunRequest::new(body.query).with_overrides(RunOverrides {
        max_retries: body.max_retries,
        quality_threshold: body.quality_threshold,
        max_steps: body.max_steps,
    });
    let settings = resolve(&request, state.controller.config())?;

    let (job_id, cancel) = state.jobs.insert(&settings.goal).await;
    info!(job_id = %job_id, goal = %settings.goal, "job queued");
    state.notify(&job_id, JobStatus::Queued, "queued");
    jobs::spawn_job(state.clone(), job_id.clone(), request, cancel);
    Ok(Json(QueuedJob {
        job_id,
        status: JobStatus::Queued,
    }))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let job = state.jobs.get(&job_id).await;
    job.map(Json).ok_or(ApiError::JobNotFound(job_id))
}

#[derive(Debug, Clone, Serialize)]
pub struct JobList {
    pub total: usize,
    pub jobs: Vec<JobSummary>,
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<JobList> {
    let jobs = state.jobs.list().await;
    Json(JobList {
        total: jobs.len(),
        jobs,
    })
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<QueuedJob>, ApiError> {
    let Some(job) = state.jobs.remove(&job_id).await else {
        return Err(ApiError::JobNotFound(job_id));
    };
    info!(job_id = %job.job_id, "job cancelled and removed");
    state.notify(&job.job_id, JobStatus::Cancelled, "cancelled by client");
    Ok(Json(QueuedJob {
        job_id: job.job_id,
        status: JobStatus::Cancelled,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::HeaderValue;
    use reflexion::core::types::{Role, RunStatus};
    use reflexion::request::RequestError;
    use reflexion::test_support::{
        ScriptedReasoner, controller, plan_json, registry, review_json, test_config,
    };

    use super::*;
    use crate::state::HealthInfo;

    fn app_state(reasoner: ScriptedReasoner, api_key: Option<&str>) -> AppState {
        let controller = controller(test_config(), Arc::new(reasoner), registry(vec![]));
        AppState::new(
            controller,
            api_key.map(str::to_string),
            HealthInfo {
                reasoning_backend: "scripted".into(),
                reasoning_api_key: true,
                search_api_key: false,
            },
        )
    }

    fn body(query: &str) -> QueryBody {
        QueryBody {
            query: query.to_string(),
            max_retries: None,
            quality_threshold: None,
            max_steps: None,
        }
    }

    #[test]
    fn api_key_check() {
        let mut headers = HeaderMap::new();
        assert!(check_api_key(None, &headers).is_ok());
        assert!(matches!(
            check_api_key(Some("secret"), &headers),
            Err(ApiError::MissingApiKey)
        ));
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("wrong"));
        assert!(matches!(
            check_api_key(Some("secret"), &headers),
            Err(ApiError::InvalidApiKey)
        ));
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(check_api_key(Some("secret"), &headers).is_ok());
    }

    #[tokio::test]
    async fn rejects_empty_query_and_bad_overrides() {
        let state = app_state(ScriptedReasoner::new(), None);

        let err = submit_query(State(state.clone()), Json(body("  ")))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(RequestError::EmptyGoal)));

        let mut too_many = body("goal");
        too_many.max_retries = Some(9);
        let err = submit_query(State(state.clone()), Json(too_many))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(list_jobs(State(state)).await.0.total, 0);
    }

    #[tokio::test]
    async fn queued_job_runs_to_completion() {
        let reasoner = ScriptedReasoner::new()
            .reply(Role::Orchestrator, plan_json(&[]))
            .reply(Role::Critic, review_json(0.9, "good"));
        let state = app_state(reasoner, None);

        let queued = submit_query(State(state.clone()), Json(body("What is TCP?")))
            .await
            .expect("queued")
            .0;
        assert_eq!(queued.status, JobStatus::Queued);

        let mut finished = None;
        for _ in 0..100 {
            let job = job_status(State(state.clone()), Path(queued.job_id.clone()))
                .await
                .expect("job exists")
                .0;
            if job.status == JobStatus::Completed {
                finished = Some(job);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let job = finished.expect("job completed");
        let result = job.result.expect("result stored");
        assert_eq!(result.status, RunStatus::Succeeded);
        assert_eq!(job.run_id.as_deref(), Some(result.run_id.as_str()));

        let listed = list_jobs(State(state)).await.0;
        assert_eq!(listed.total, 1);
        assert_eq!(listed.jobs[0].run_status, Some(RunStatus::Succeeded));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let state = app_state(ScriptedReasoner::new(), None);
        let err = job_status(State(state.clone()), Path("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
        assert!(cancel_job(State(state), Path("nope".into())).await.is_err());
    }

    #[tokio::test]
    async fn cancel_removes_running_job() {
        let reasoner = ScriptedReasoner::new().hang(Role::Orchestrator);
        let state = app_state(reasoner, None);
        let mut changes = state.event_tx.subscribe();

        let queued = submit_query(State(state.clone()), Json(body("slow goal")))
            .await
            .expect("queued")
            .0;
        let cancelled = cancel_job(State(state.clone()), Path(queued.job_id.clone()))
            .await
            .expect("cancelled")
            .0;
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(
            job_status(State(state.clone()), Path(queued.job_id.clone()))
                .await
                .is_err()
        );

        let first = changes.recv().await.expect("queued change");
        assert_eq!(first.job_id, queued.job_id);
        assert_eq!(first.status, JobStatus::Queued);
    }
}
