//! web_search tool, a wrapper over an external search API.
//!
//! Backend is picked from the configured URL: Tavily, Brave, or any
//! SearXNG-compatible instance.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{Tool, ToolContext, ToolOutput};

pub const WEB_SEARCH_TOOL: &str = "web_search";

const TAVILY_BASE_URL: &str = "https://api.tavily.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Params {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Tavily,
    Brave,
    SearXng,
}

impl Backend {
    fn detect(base_url: &str) -> Self {
        if base_url.contains("tavily.com") {
            Backend::Tavily
        } else if base_url.contains("brave.com") {
            Backend::Brave
        } else {
            Backend::SearXng
        }
    }
}

/// One search hit. `url` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
}

fn parse_results(
    results: Option<&Vec<serde_json::Value>>,
    snippet_field: &str,
    max: usize,
) -> Vec<SearchResult> {
    results
        .map(|items| {
            items
                .iter()
                .filter_map(|r| {
                    Some(SearchResult {
                        url: r["url"].as_str()?.to_string(),
                        title: r["title"].as_str().unwrap_or("").to_string(),
                        content: r[snippet_field].as_str().unwrap_or("").to_string(),
                    })
                })
                .take(max)
                .collect()
        })
        .unwrap_or_default()
}

/// Parse Tavily `/search` results.
fn parse_tavily_results(body: &serde_json::Value, max: usize) -> Vec<SearchResult> {
    parse_results(body["results"].as_array(), "content", max)
}

/// Parse SearXNG JSON results.
fn parse_searxng_results(body: &serde_json::Value, max: usize) -> Vec<SearchResult> {
    parse_results(body["results"].as_array(), "content", max)
}

/// Parse Brave Search API results.
fn parse_brave_results(body: &serde_json::Value, max: usize) -> Vec<SearchResult> {
    parse_results(body["web"]["results"].as_array(), "description", max)
}

/// Search endpoint and key, from config first, then environment.
fn resolve_endpoint(context: &ToolContext) -> (Option<String>, Option<String>) {
    let search = context.config.search();

    let api_key = search
        .and_then(|s| s.resolve_api_key())
        .or_else(|| std::env::var("SEARCH_API_KEY").ok())
        .or_else(|| std::env::var("TAVILY_API_KEY").ok())
        .filter(|s| !s.is_empty());

    let api_url = search
        .and_then(|s| s.api_url.clone())
        .or_else(|| std::env::var("SEARCH_API_URL").ok())
        .filter(|s| !s.is_empty())
        .or_else(|| api_key.as_ref().map(|_| TAVILY_BASE_URL.to_string()))
        .map(|u| u.trim_end_matches('/').to_string());

    (api_url, api_key)
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns a JSON list of results with title, url, and content."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let p: Params = serde_json::from_value(params)?;
        let max = p
            .max_results
            .unwrap_or_else(|| context.config.search_max_results())
            .max(1);
        debug!(conversation = %context.conversation_id, query = %p.query, max, "web_search");

        let (api_url, api_key) = resolve_endpoint(context);
        let Some(base_url) = api_url else {
            return Ok(ToolOutput::error(
                "No search API configured. Set tools.search.api_url / api_key in config, or TAVILY_API_KEY / SEARCH_API_URL in the environment.",
            ));
        };

        let backend = Backend::detect(&base_url);
        let count = max.to_string();
        let request = match backend {
            Backend::Tavily => self.client.post(format!("{base_url}/search")).json(&json!({
                "api_key": api_key.unwrap_or_default(),
                "query": p.query,
                "max_results": max,
            })),
            Backend::Brave => self
                .client
                .get(format!("{base_url}/res/v1/web/search"))
                .header("X-Subscription-Token", api_key.unwrap_or_default())
                .query(&[("q", p.query.as_str()), ("count", count.as_str())]),
            Backend::SearXng => self.client.get(format!("{base_url}/search")).query(&[
                ("q", p.query.as_str()),
                ("format", "json"),
            ]),
        };

        let resp = match request.timeout(REQUEST_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutput::error(format!("Search API error: {e}"))),
        };

        if !resp.status().is_success() {
            return Ok(ToolOutput::error(format!(
                "Search API returned HTTP {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp.json().await?;
        let results = match backend {
            Backend::Tavily => parse_tavily_results(&body, max),
            Backend::Brave => parse_brave_results(&body, max),
            Backend::SearXng => parse_searxng_results(&body, max),
        };

        let data = serde_json::to_value(&results)?;
        Ok(ToolOutput {
            content: data.to_string(),
            is_error: false,
            data: Some(data),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use scout_core::config::{Config, SearchConfig, ToolsConfig};

    fn context_with(search: Option<SearchConfig>) -> ToolContext {
        ToolContext {
            conversation_id: "test".into(),
            config: Arc::new(Config {
                tools: Some(ToolsConfig {
                    search,
                    ..ToolsConfig::default()
                }),
                ..Config::default()
            }),
        }
    }

    #[test]
    fn test_parse_tavily_results() {
        let body = json!({
            "query": "weather in Tokyo",
            "results": [
                {"title": "Tokyo Weather", "url": "https://weather.example/tokyo", "content": "Sunny", "score": 0.9},
                {"title": "No url"},
                {"title": "Forecast", "url": "https://forecast.example", "content": "Rain later"}
            ]
        });
        let results = parse_tavily_results(&body, 4);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://weather.example/tokyo");
        assert_eq!(results[1].content, "Rain later");
    }

    #[test]
    fn test_parse_respects_max() {
        let body = json!({
            "results": (0..10).map(|i| json!({"title": "t", "url": format!("https://e/{i}")})).collect::<Vec<_>>()
        });
        assert_eq!(parse_searxng_results(&body, 4).len(), 4);
    }

    #[test]
    fn test_parse_brave_results() {
        let body = json!({
            "web": {
                "results": [
                    {"title": "Test", "url": "https://test.com", "description": "A test result"}
                ]
            }
        });
        let results = parse_brave_results(&body, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "A test result");
    }

    #[test]
    fn test_parse_empty_results() {
        assert!(parse_searxng_results(&json!({"results": []}), 5).is_empty());
        assert!(parse_brave_results(&json!({}), 5).is_empty());
    }

    #[test]
    fn test_backend_detection() {
        assert_eq!(Backend::detect("https://api.tavily.com"), Backend::Tavily);
        assert_eq!(Backend::detect("https://api.search.brave.com"), Backend::Brave);
        assert_eq!(Backend::detect("http://localhost:8888"), Backend::SearXng);
    }

    #[test]
    fn test_key_alone_selects_tavily() {
        let ctx = context_with(Some(SearchConfig {
            api_key: Some("tvly-123".into()),
            ..SearchConfig::default()
        }));
        let (url, key) = resolve_endpoint(&ctx);
        assert_eq!(url.as_deref(), Some(TAVILY_BASE_URL));
        assert_eq!(key.as_deref(), Some("tvly-123"));
    }

    #[test]
    fn test_configured_url_is_trimmed() {
        let ctx = context_with(Some(SearchConfig {
            api_url: Some("http://localhost:8888/".into()),
            ..SearchConfig::default()
        }));
        let (url, _) = resolve_endpoint(&ctx);
        assert_eq!(url.as_deref(), Some("http://localhost:8888"));
    }

    #[tokio::test]
    async fn test_missing_query_is_an_error() {
        let tool = WebSearchTool::new();
        let ctx = context_with(None);
        assert!(tool.execute(json!({"q": "x"}), &ctx).await.is_err());
    }
}
