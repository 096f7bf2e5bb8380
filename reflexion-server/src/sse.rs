//! Server-Sent Events stream of job changes.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::{AppState, JobChange};

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only stream changes of this job.
    pub job_id: Option<String>,
}

impl EventFilter {
    fn matches(&self, change: &JobChange) -> bool {
        self.job_id.as_deref().is_none_or(|id| id == change.job_id)
    }
}

/// `GET /events[?job_id=..]`: one `job` event per change, after an initial
/// `connected`.
pub async fn events_handler(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change) if !filter.matches(&change) => {}
                Ok(change) => {
                    if let Ok(json) = serde_json::to_string(&change) {
                        yield Ok(Event::default().event("job").id(change.job_id.clone()).data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some job events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
