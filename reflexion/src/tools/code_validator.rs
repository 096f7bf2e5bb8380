//! `code_validator`: syntax check via tree-sitter.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tree_sitter::{Language, Node, Parser};

use super::{CODE_VALIDATOR, Tool};

/// Languages the validator can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Python,
    Rust,
}

impl Lang {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Some(Self::Python),
            "rust" | "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    fn grammar(self) -> Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

/// Validator verdict. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

/// Parse `code` and report the first syntax error, if any.
pub fn validate(lang: Lang, code: &str) -> Result<Validation> {
    if code.trim().is_empty() {
        return Ok(Validation {
            valid: false,
            message: "code is empty".to_string(),
            line: None,
            column: None,
        });
    }
    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar())
        .map_err(|err| anyhow!("load grammar: {err}"))?;
    let tree = parser
        .parse(code, None)
        .ok_or_else(|| anyhow!("parser returned no tree"))?;
    let root = tree.root_node();
    if !root.has_error() {
        return Ok(Validation {
            valid: true,
            message: "syntax OK".to_string(),
            line: None,
            column: None,
        });
    }

    let Some(node) = first_error(root) else {
        return Ok(Validation {
            valid: false,
            message: "syntax error".to_string(),
            line: None,
            column: None,
        });
    };
    let position = node.start_position();
    let line = position.row + 1;
    let column = position.column + 1;
    let message = if node.is_missing() {
        format!("line {line}, column {column}: missing `{}`", node.kind())
    } else {
        let snippet = code
            .lines()
            .nth(position.row)
            .map(str::trim)
            .unwrap_or_default();
        format!("line {line}, column {column}: syntax error near `{snippet}`")
    };
    Ok(Validation {
        valid: false,
        message,
        line: Some(line),
        column: Some(column),
    })
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|child| child.has_error())
        .find_map(first_error)
}

pub struct CodeValidatorTool;

#[async_trait]
impl Tool for CodeValidatorTool {
    fn name(&self) -> &str {
        CODE_VALIDATOR
    }

    fn description(&self) -> &str {
        "Check code syntax. Args: {\"language\": \"python\"|\"rust\", \"code\": \"...\"}"
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let language = args
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or("python");
        let lang =
            Lang::from_name(language).ok_or_else(|| anyhow!("unsupported language '{language}'"))?;
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing string argument 'code'"))?;
        let verdict = validate(lang, code)?;
        Ok(serde_json::to_value(verdict)?)
    }
}
