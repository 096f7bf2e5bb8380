//! Case file parsing and validation.
//!
//! Cases are TOML files with a goal, run overrides, and checks over the
//! finished run. See `eval/cases/` for examples.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use reflexion::core::types::{NotesPolicy, Role, RunStatus};

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    #[serde(default)]
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Goal handed to the pipeline.
    pub goal: String,
}

/// Overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CaseConfig {
    pub max_retries: Option<u32>,
    pub quality_threshold: Option<f64>,
    pub max_steps: Option<u32>,
    pub notes_policy: Option<NotesPolicy>,
    /// Coder target language (`python` or `rust`).
    pub language: Option<String>,
}

/// Check evaluated against the finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Check {
    /// Terminal status equals the given one.
    StatusIs { status: RunStatus },
    /// Final critic score is at least `score`.
    MinScore { score: f64 },
    /// The stage for `role` executed at least once.
    StageRan { role: Role },
    HasPlan,
    HasResearch,
    HasCode,
    /// A code artifact exists and passed validation.
    CodeValid,
}

/// What a check measures, for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    /// Did the run use the stages the goal needs.
    ToolRecall,
    /// Did the deliverable satisfy the goal's requirements.
    Requirement,
}

impl CaseFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.goal.trim().is_empty() {
            bail!("case.goal must be non-empty");
        }
        if self.config.max_steps == Some(0) {
            bail!("config.max_steps must be > 0");
        }
        if let Some(threshold) = self.config.quality_threshold
            && !(0.0..=1.0).contains(&threshold)
        {
            bail!("config.quality_threshold must be within [0, 1]");
        }
        if self.checks.is_empty() {
            bail!("checks must be a non-empty array");
        }
        for (index, check) in self.checks.iter().enumerate() {
            check
                .validate()
                .with_context(|| format!("checks[{index}] invalid"))?;
        }
        Ok(())
    }
}

impl Check {
    fn validate(&self) -> Result<()> {
        if let Check::MinScore { score } = self
            && !(0.0..=1.0).contains(score)
        {
            bail!("min_score.score must be within [0, 1]");
        }
        Ok(())
    }

    pub fn category(&self) -> CheckCategory {
        match self {
            Check::StageRan { .. } => CheckCategory::ToolRecall,
            _ => CheckCategory::Requirement,
        }
    }

    /// Stable label used to group results across runs.
    pub fn label(&self) -> String {
        match self {
            Check::StatusIs { status } => format!("status_is({status})"),
            Check::MinScore { score } => format!("min_score({score:.2})"),
            Check::StageRan { role } => format!("stage_ran({role})"),
            Check::HasPlan => "has_plan".to_string(),
            Check::HasResearch => "has_research".to_string(),
            Check::HasCode => "has_code".to_string(),
            Check::CodeValid => "code_valid".to_string(),
        }
    }
}

/// Load every case in `dir`, sorted by id. Duplicate ids are an error.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let path = entry.context("read case entry")?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}
