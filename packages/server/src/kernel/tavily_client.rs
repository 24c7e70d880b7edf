use async_trait::async_trait;
use reqwest::StatusCode;
use scan_engine::{SearchError, SearchResult, Searcher};
use serde::{Deserialize, Serialize};

/// Tavily API client for web search
pub struct TavilyClient {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
}

/// Tavily search depth
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum SearchDepth {
    Basic,
}

/// Tavily API request
#[derive(Debug, Serialize)]
struct TavilyRequest {
    api_key: String,
    query: String,
    search_depth: SearchDepth,
    max_results: usize,
}

/// Tavily API response
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    results: Vec<TavilyResult>,
}

/// Individual search result from Tavily
#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    content: String,
    score: f64,
    #[serde(default)]
    published_date: Option<String>,
}

impl From<TavilyResult> for SearchResult {
    fn from(r: TavilyResult) -> Self {
        let mut result = SearchResult::new(r.url)
            .with_title(r.title)
            .with_snippet(r.content)
            .with_score(r.score);
        if let Some(date) = r.published_date {
            result = result.with_published_date(date);
        }
        result
    }
}

impl TavilyClient {
    /// Create a new Tavily client
    pub fn new(api_key: String) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        Ok(Self {
            api_key,
            client,
            base_url: "https://api.tavily.com".to_string(),
        })
    }
}

#[async_trait]
impl Searcher for TavilyClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let request = TavilyRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            search_depth: SearchDepth::Basic,
            max_results: limit,
        };

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SearchError::Timeout
                } else {
                    SearchError::Http(Box::new(e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(SearchError::RateLimited);
            }
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Http(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Tavily API error {}: {}", status, body),
            ))));
        }

        let tavily_response: TavilyResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Http(Box::new(e)))?;

        tracing::debug!(query, results = tavily_response.results.len(), "Tavily search complete");

        Ok(tavily_response
            .results
            .into_iter()
            .take(limit)
            .map(SearchResult::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_maps_snippet_and_score() {
        let raw: TavilyResult = serde_json::from_value(serde_json::json!({
            "title": "Acme Plumbing reviews",
            "url": "https://www.reddit.com/r/plumbing/acme",
            "content": "Acme fixed our water heater",
            "score": 0.82,
            "published_date": "2026-03-01"
        }))
        .unwrap();

        let result = SearchResult::from(raw);
        assert_eq!(result.url, "https://www.reddit.com/r/plumbing/acme");
        assert_eq!(result.snippet.as_deref(), Some("Acme fixed our water heater"));
        assert_eq!(result.score, Some(0.82));
        assert_eq!(result.published_date.as_deref(), Some("2026-03-01"));
    }

    #[test]
    fn request_serializes_basic_depth() {
        let request = TavilyRequest {
            api_key: "tvly-test".into(),
            query: "acme water heaters".into(),
            search_depth: SearchDepth::Basic,
            max_results: 8,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["search_depth"], "basic");
        assert_eq!(json["max_results"], 8);
    }
}
