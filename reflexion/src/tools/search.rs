//! `web_search`: Tavily-compatible HTTP search.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::{Tool, WEB_SEARCH};
use crate::io::config::SearchConfig;

/// Results kept in the formatted text.
const FORMATTED_RESULTS: usize = 3;

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    max_results: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug)]
pub struct WebSearchTool {
    http: reqwest::Client,
    endpoint: String,
    max_results: u32,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            max_results: config.max_results,
            api_key,
        }
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("search API key not set"))?;
        let response = self
            .http
            .post(&self.endpoint)
            .json(&SearchRequest {
                api_key,
                query,
                search_depth: "basic",
                max_results: self.max_results,
            })
            .send()
            .await
            .context("search request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("search provider returned status {}", status.as_u16());
        }
        let parsed: SearchResponse = response.json().await.context("parse search response")?;
        debug!(hits = parsed.results.len(), "search completed");
        Ok(parsed.results)
    }
}

/// Render the top hits as title, content, and source blocks.
pub fn format_hits(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No results found".to_string();
    }
    hits.iter()
        .take(FORMATTED_RESULTS)
        .map(|hit| {
            format!(
                "• {}\n  {}\n  Source: {}",
                hit.title.as_deref().unwrap_or("No title"),
                hit.content.as_deref().unwrap_or("No content").trim(),
                hit.url.as_deref().unwrap_or("N/A")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH
    }

    fn description(&self) -> &str {
        "Search the web. Args: {\"query\": \"...\"}"
    }

    async fn call(&self, args: &Value) -> Result<Value> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .or_else(|| args.as_str())
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| anyhow!("missing string argument 'query'"))?;
        let hits = self.search(query).await?;
        Ok(json!({
            "query": query,
            "count": hits.len(),
            "text": format_hits(&hits),
        }))
    }
}
