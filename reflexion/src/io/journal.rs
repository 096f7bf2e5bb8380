//! Per-run journal under `<dir>/<run_id>/`.
//!
//! Layout:
//! - `attempts/<n>/plan.json` for every plan, `attempts/<n>/review.json` for
//!   every review;
//! - `events.jsonl` with every event in order, each stamped with `at`;
//! - `result.json` once the run finished.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::core::events::RunEvent;
use crate::result::RunResult;

#[derive(Debug, Clone)]
pub struct JournalPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
    pub result_path: PathBuf,
}

impl JournalPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(run_id);
        Self {
            events_path: dir.join("events.jsonl"),
            result_path: dir.join("result.json"),
            dir,
        }
    }

    pub fn attempt_dir(&self, attempt: u32) -> PathBuf {
        self.dir.join("attempts").join(attempt.to_string())
    }
}

/// Writes events of one run as they arrive.
#[derive(Debug)]
pub struct RunJournal {
    root: PathBuf,
    paths: Option<JournalPaths>,
}

impl RunJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            paths: None,
        }
    }

    pub fn paths(&self) -> Option<&JournalPaths> {
        self.paths.as_ref()
    }

    /// Record one event. `Started` opens the run directory; earlier events are
    /// ignored.
    pub fn record(&mut self, event: &RunEvent) -> Result<()> {
        if let RunEvent::Started { run_id, .. } = event {
            let paths = JournalPaths::new(&self.root, run_id);
            fs::create_dir_all(&paths.dir)
                .with_context(|| format!("create journal dir {}", paths.dir.display()))?;
            self.paths = Some(paths);
        }
        let Some(paths) = &self.paths else {
            return Ok(());
        };

        append_event(&paths.events_path, event)?;
        match event {
            RunEvent::Planned { attempt, plan } => {
                let dir = paths.attempt_dir(*attempt);
                fs::create_dir_all(&dir)
                    .with_context(|| format!("create attempt dir {}", dir.display()))?;
                write_json(&dir.join("plan.json"), plan)?;
            }
            RunEvent::Reviewed {
                attempt,
                score,
                feedback,
            } => {
                let dir = paths.attempt_dir(*attempt);
                fs::create_dir_all(&dir)
                    .with_context(|| format!("create attempt dir {}", dir.display()))?;
                write_json(
                    &dir.join("review.json"),
                    &json!({ "score": score, "feedback": feedback }),
                )?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Write `result.json` for the run.
    pub fn write_result(&mut self, result: &RunResult) -> Result<PathBuf> {
        let paths = match &self.paths {
            Some(paths) => paths.clone(),
            None => {
                let paths = JournalPaths::new(&self.root, &result.run_id);
                fs::create_dir_all(&paths.dir)
                    .with_context(|| format!("create journal dir {}", paths.dir.display()))?;
                self.paths = Some(paths.clone());
                paths
            }
        };
        write_json(&paths.result_path, result)?;
        Ok(paths.result_path)
    }
}

/// Append `event` as one JSON line stamped with the wall-clock time.
fn append_event(path: &Path, event: &RunEvent) -> Result<()> {
    let mut value = serde_json::to_value(event).context("serialize event")?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert("at".to_string(), json!(Utc::now().to_rfc3339()));
    }
    let mut line = value.to_string();
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}
