//! Tavily web search
//!
//! - Bearer-authenticated POST to `/search`
//! - Per-call timeout covering every retry
//! - Exponential backoff on transient errors only
//! - Raw page content when the caller wants markdown, snippets otherwise

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{WebPage, WebSearch, WebSearchOptions};
use crate::error::SearchError;

const DEFAULT_BASE_URL: &str = "https://api.tavily.com";

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff (milliseconds)
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Tavily caps results per request at 20
const MAX_RESULTS_CAP: usize = 20;

/// Tavily-backed [`WebSearch`]
pub struct TavilySearch {
    api_key: String,
    client: Client,
    base_url: String,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }

    /// Point at a different API host (tests, proxies)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    async fn execute_with_retry(
        &self,
        request: &TavilyRequest,
        timeout: Duration,
    ) -> Result<TavilyResponse, SearchError> {
        let mut last_error = SearchError::Network("no attempts made".to_string());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying Tavily request");
                tokio::time::sleep(delay).await;
            }

            match self.execute_single_request(request, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }
                    warn!(attempt, error = %e, "Tavily request failed, will retry");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn execute_single_request(
        &self,
        request: &TavilyRequest,
        timeout: Duration,
    ) -> Result<TavilyResponse, SearchError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(SearchError::from_transport)?;

        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SearchError::ParseError(e.to_string()));
        }

        let error_text = response.text().await.unwrap_or_default();
        Err(SearchError::from_status(status.as_u16(), error_text))
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(
        &self,
        query: &str,
        options: &WebSearchOptions,
    ) -> Result<Vec<WebPage>, SearchError> {
        info!(query = %query, "Performing web search");

        let request = TavilyRequest {
            query: query.to_string(),
            max_results: options.max_results.clamp(1, MAX_RESULTS_CAP),
            search_depth: if options.want_markdown { "advanced" } else { "basic" },
            include_raw_content: options.want_markdown,
            include_domains: options.domains.include.clone(),
            exclude_domains: options.domains.exclude.clone(),
        };

        let response = tokio::time::timeout(
            options.timeout,
            self.execute_with_retry(&request, options.timeout),
        )
        .await
        .map_err(|_| SearchError::Timeout)??;

        let pages: Vec<WebPage> = response
            .results
            .into_iter()
            .filter(|r| options.domains.allows(&r.url))
            .map(|r| r.into_page(options.want_markdown))
            .filter(|page| !page.content.trim().is_empty())
            .take(options.max_results)
            .collect();

        if pages.is_empty() {
            warn!(query = %query, "No search results found");
        } else {
            info!(query = %query, count = pages.len(), "Search completed");
        }

        Ok(pages)
    }
}

/// Request body for the Tavily API
#[derive(Debug, Serialize)]
struct TavilyRequest {
    query: String,
    max_results: usize,
    search_depth: &'static str,
    include_raw_content: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    include_domains: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exclude_domains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    content: String,
    raw_content: Option<String>,
}

impl TavilyResult {
    fn into_page(self, prefer_raw: bool) -> WebPage {
        let content = match self.raw_content {
            Some(raw) if prefer_raw && !raw.trim().is_empty() => raw,
            _ => self.content,
        };
        WebPage { url: self.url, content }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::DomainFilter;

    #[test]
    fn test_request_serialization_skips_empty_domains() {
        let request = TavilyRequest {
            query: "rust".to_string(),
            max_results: 5,
            search_depth: "basic",
            include_raw_content: false,
            include_domains: vec![],
            exclude_domains: vec!["pinterest.com".to_string()],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("include_domains").is_none());
        assert_eq!(json["exclude_domains"][0], "pinterest.com");
        assert_eq!(json["search_depth"], "basic");
    }

    #[test]
    fn test_result_prefers_raw_content_when_asked() {
        let result = TavilyResult {
            url: "https://a.com".to_string(),
            content: "snippet".to_string(),
            raw_content: Some("# Full page".to_string()),
        };
        assert_eq!(result.into_page(true).content, "# Full page");

        let result = TavilyResult {
            url: "https://a.com".to_string(),
            content: "snippet".to_string(),
            raw_content: Some("   ".to_string()),
        };
        assert_eq!(result.into_page(true).content, "snippet");
    }

    #[test]
    fn test_builder_pattern() {
        let search = TavilySearch::new("key")
            .with_base_url("http://localhost:1234/")
            .with_max_retries(5)
            .with_retry_delay(Duration::from_millis(1));

        assert_eq!(search.base_url, "http://localhost:1234");
        assert_eq!(search.max_retries, 5);
        assert_eq!(search.retry_base_delay, Duration::from_millis(1));
    }

    #[test]
    fn test_options_domain_filter_default_is_open() {
        assert!(DomainFilter::default().is_empty());
    }
}
