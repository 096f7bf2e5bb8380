//! Applies case overrides to the base reflexion configuration.

use anyhow::Result;
use reflexion::io::config::ReflexionConfig;

use crate::case::CaseConfig;

pub fn apply_case_config(
    mut base: ReflexionConfig,
    overrides: &CaseConfig,
) -> Result<ReflexionConfig> {
    if let Some(max_retries) = overrides.max_retries {
        base.run.max_retries = max_retries;
    }
    if let Some(threshold) = overrides.quality_threshold {
        base.run.quality_threshold = threshold;
    }
    if let Some(max_steps) = overrides.max_steps {
        base.run.max_steps = max_steps;
    }
    if let Some(policy) = overrides.notes_policy {
        base.research.notes_policy = policy;
    }
    if let Some(language) = &overrides.language {
        base.coder.language = language.clone();
    }
    base.validate()?;
    Ok(base)
}
