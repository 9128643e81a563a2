use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::{CoreError, CoreResult};
use crate::quill_config::WebSearchConfig;

use super::{ParsedToolArgs, QueryPlan, Tool, ToolContext, ToolParameters, ToolPlan, WEB_SEARCH_TOOL};

const MAX_SEARCH_COUNT: usize = 10;
const ERROR_BODY_MAX_CHARS: usize = 300;
const SNIPPET_WIDTH: usize = 200;

#[derive(Debug, Deserialize)]
struct BraveSearchResponse {
    #[serde(default)]
    web: Option<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    #[serde(default)]
    results: Option<Vec<BraveSearchItem>>,
}

#[derive(Debug, Deserialize)]
struct BraveSearchItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    age: Option<String>,
}

struct WebSearchTool {
    config: WebSearchConfig,
    params: ToolParameters,
}

pub fn web_search_tool(ctx: ToolContext) -> Arc<dyn Tool> {
    let params = ToolParameters::object()
        .string("query", "Search query string.", true)
        .number("count", "Number of results to return (1-10).", false)
        .build();
    Arc::new(WebSearchTool {
        config: ctx.web,
        params,
    })
}

impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search the web using a Brave-compatible search API."
    }

    fn parameters(&self) -> &ToolParameters {
        &self.params
    }

    fn plan(&self, args: &ParsedToolArgs) -> CoreResult<ToolPlan> {
        let query = args.require_string("query")?.trim().to_string();
        let count = args
            .get_usize("count")?
            .unwrap_or(self.config.max_results)
            .clamp(1, MAX_SEARCH_COUNT);
        if !self.config.enabled {
            return Err(CoreError::Configuration(
                "web_search is disabled; set web.search.enabled = true in config.toml".into(),
            ));
        }
        let Some(key) = self.config.resolve_api_key() else {
            return Err(CoreError::Configuration(format!(
                "web_search needs an API key. Set {} or web.search.api_key in config.toml",
                self.config.api_key_env
            )));
        };
        let config = self.config.clone();
        Ok(ToolPlan::Query(QueryPlan {
            summary: format!("Searching the web for \"{query}\""),
            run: async move { run_brave_search(&config, &key, &query, count).await }.boxed(),
        }))
    }
}

async fn run_brave_search(
    cfg: &WebSearchConfig,
    key: &str,
    query: &str,
    count: usize,
) -> CoreResult<Value> {
    if super::debug_tools_enabled() {
        tracing::debug!(query, count, endpoint = %cfg.endpoint, "web_search invoked");
    }
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
        .build()
        .map_err(|e| CoreError::Configuration(format!("failed to build http client: {e}")))?;

    let params: Vec<(&str, String)> = vec![("q", query.to_string()), ("count", count.to_string())];
    let res = client
        .get(&cfg.endpoint)
        .header("Accept", "application/json")
        .header("X-Subscription-Token", key)
        .query(&params)
        .send()
        .await
        .map_err(|e| CoreError::io(&cfg.endpoint, format!("search request failed: {e}")))?;
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(CoreError::io(
            &cfg.endpoint,
            format!(
                "search request failed ({status}): {}",
                truncate_str(&body, ERROR_BODY_MAX_CHARS)
            ),
        ));
    }
    let results = parse_brave_results(&body)
        .map_err(|e| CoreError::io(&cfg.endpoint, format!("search response parse failed: {e}")))?;
    Ok(json!({
        "query": query,
        "provider": "brave",
        "count": results.len(),
        "results": results,
    }))
}

fn parse_brave_results(body: &str) -> Result<Vec<Value>, serde_json::Error> {
    let parsed: BraveSearchResponse = serde_json::from_str(body)?;
    Ok(parsed
        .web
        .and_then(|web| web.results)
        .unwrap_or_default()
        .into_iter()
        .map(|item| {
            let site = item.url.as_deref().and_then(resolve_site_name);
            json!({
                "title": item.title.unwrap_or_default(),
                "url": item.url.unwrap_or_default(),
                "snippet": item.description.as_deref().map(strip_markup).unwrap_or_default(),
                "published": item.age,
                "siteName": site,
            })
        })
        .collect())
}

/// Brave highlights matches with inline HTML; flatten it to text.
fn strip_markup(snippet: &str) -> String {
    if !snippet.contains('<') && !snippet.contains('&') {
        return snippet.to_string();
    }
    html2text::from_read(snippet.as_bytes(), SNIPPET_WIDTH)
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_str(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn resolve_site_name(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(|s| s.to_string()))
}
