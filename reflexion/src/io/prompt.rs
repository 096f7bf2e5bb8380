//! Prompt packs for the four stages, rendered with minijinja and trimmed to a
//! byte budget.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the budget, droppable sections go first (in
//! [`DROP_ORDER`]), then sections after the contract are shortened from the end.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::{CodeArtifact, Role, ScoreRecord};

const ORCHESTRATOR_TEMPLATE: &str = include_str!("prompts/orchestrator.md");
const RESEARCHER_TEMPLATE: &str = include_str!("prompts/researcher.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");

/// Droppable sections, least important first.
const DROP_ORDER: [&str; 3] = ["history", "notes", "feedback"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// System prompt attached to every reasoning call of `role`.
pub fn system_prompt(role: Role) -> &'static str {
    match role {
        Role::Orchestrator => "You are the planning agent of a multi-agent team. You answer with JSON only.",
        Role::Researcher => "You are a careful research assistant. You only state what the sources support.",
        Role::Coder => "You are a senior software engineer. You answer with one fenced code block.",
        Role::Critic => "You are a strict reviewer. You answer with JSON only.",
    }
}

/// Everything a template may refer to. Unused fields stay empty.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs {
    pub goal: String,
    pub task: String,
    pub attempt: u32,
    pub feedback: Option<String>,
    pub history: Vec<ScoreRecord>,
    pub notes: Vec<String>,
    pub language: String,
    pub results: String,
    pub code: Option<CodeArtifact>,
    pub validation_error: Option<String>,
    pub previous_code: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryEntry<'a> {
    attempt: u32,
    score: String,
    feedback: &'a str,
}

fn history_entries(history: &[ScoreRecord]) -> Vec<HistoryEntry<'_>> {
    history
        .iter()
        .map(|record| HistoryEntry {
            attempt: record.attempt,
            score: format!("{:.2}", record.score),
            feedback: record.feedback.trim(),
        })
        .collect()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("orchestrator", ORCHESTRATOR_TEMPLATE),
            ("researcher", RESEARCHER_TEMPLATE),
            ("coder", CODER_TEMPLATE),
            ("critic", CRITIC_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    fn render(&self, role: Role, input: &PromptInputs) -> Result<String> {
        let template = self.env.get_template(role.as_str())?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            task => input.task.trim(),
            attempt => input.attempt,
            feedback => non_blank(input.feedback.as_deref()),
            history => history_entries(&input.history),
            notes => input.notes.iter().map(|n| n.trim()).filter(|n| !n.is_empty()).collect::<Vec<_>>(),
            language => input.language.trim(),
            results => input.results.trim(),
            code => input.code.as_ref(),
            validation_error => non_blank(input.validation_error.as_deref()),
            previous_code => non_blank(input.previous_code.as_deref()),
        })?;
        Ok(rendered)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Section content without its marker.
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("valid section regex")
});

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let key = caps.get(1)?.as_str().to_string();
            let required = caps.get(2)?.as_str() == "required";
            Some((whole.start(), whole.end(), key, required))
        })
        .collect();

    let mut sections = Vec::with_capacity(markers.len());
    for (i, (_, body_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map_or(rendered.len(), |(next_start, ..)| *next_start);
        let content = rendered[*body_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over: shorten sections from the end, keeping the first (contract) whole.
    let mut excess = total_len(sections).saturating_sub(budget);
    for section in sections.iter_mut().skip(1).rev() {
        if excess == 0 {
            return;
        }
        let before_len = section.content.len();
        let allowed = before_len.saturating_sub(excess);
        if allowed > TRUNCATION_MARKER.len() {
            truncate_at_char_boundary(&mut section.content, allowed - TRUNCATION_MARKER.len());
            section.content.push_str(TRUNCATION_MARKER);
        } else {
            truncate_at_char_boundary(&mut section.content, allowed);
        }
        debug!(
            section = section.key,
            before_len,
            after_len = section.content.len(),
            "truncated section for budget"
        );
        excess = excess.saturating_sub(before_len.saturating_sub(section.content.len()));
    }
}

fn truncate_at_char_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds stage prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    /// Render the prompt for `role`.
    pub fn build(&self, role: Role, input: &PromptInputs) -> Result<PromptPack> {
        let rendered = ENGINE.render(role, input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            role,
            content: render_sections(&sections),
        })
    }
}

/// A rendered prompt ready for a reasoning call.
#[derive(Debug, Clone)]
pub struct PromptPack {
    role: Role,
    content: String,
}

impl PromptPack {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn system(&self) -> &'static str {
        system_prompt(self.role)
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn into_content(self) -> String {
        self.content
    }
}
