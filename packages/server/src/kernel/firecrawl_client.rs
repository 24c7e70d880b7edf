//! Firecrawl-backed crawl collaborator.
//!
//! Starts an async crawl job, then polls its status and yields pages as they
//! appear so the crawl step can report progress before the job finishes.

use async_stream::stream;
use futures::stream::BoxStream;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use scan_engine::{CrawlError, CrawlRequest, CrawledPage, Crawler};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

/// Characters of markdown kept per page.
const EXCERPT_CHARS: usize = 4000;

lazy_static! {
    static ref MARKDOWN_LINK: Regex = Regex::new(r"\[[^\]]*\]\((https?://[^)\s]+)\)").unwrap();
}

#[derive(Clone)]
pub struct FirecrawlCrawler {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

#[derive(Serialize)]
struct StartCrawlRequest {
    url: String,
    limit: usize,
    #[serde(rename = "maxDepth")]
    max_depth: u32,
    #[serde(rename = "scrapeOptions")]
    scrape_options: ScrapeOptions,
}

#[derive(Serialize)]
struct ScrapeOptions {
    formats: Vec<&'static str>,
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
}

#[derive(Deserialize)]
struct CrawlStartResponse {
    success: bool,
    id: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct CrawlStatusResponse {
    status: String,
    #[serde(default)]
    data: Vec<CrawlPageData>,
    /// Set when a completed crawl's results span more than one page.
    next: Option<String>,
}

#[derive(Deserialize)]
struct CrawlPageData {
    markdown: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct PageMetadata {
    title: Option<String>,
    #[serde(rename = "sourceURL")]
    source_url: Option<String>,
}

impl FirecrawlCrawler {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CrawlError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: FIRECRAWL_API_URL.to_string(),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(240),
        })
    }

    /// Point at a different API host (self-hosted Firecrawl, test server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    async fn start(&self, url: &str, limit: usize) -> Result<String, CrawlError> {
        let body = StartCrawlRequest {
            url: url.to_string(),
            limit,
            max_depth: 3,
            scrape_options: ScrapeOptions {
                formats: vec!["markdown", "links"],
                only_main_content: true,
            },
        };

        let response = self
            .client
            .post(format!("{}/crawl", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, url))?;
        let started: CrawlStartResponse = check_status(response, url)
            .await?
            .json()
            .await
            .map_err(|e| CrawlError::InvalidResponse(e.to_string()))?;

        match (started.success, started.id) {
            (true, Some(id)) => Ok(id),
            (_, _) => Err(CrawlError::InvalidResponse(
                started
                    .error
                    .unwrap_or_else(|| "crawl was not started".to_string()),
            )),
        }
    }

    async fn status(&self, status_url: &str, url: &str) -> Result<CrawlStatusResponse, CrawlError> {
        let response = self
            .client
            .get(status_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| transport_error(e, url))?;
        check_status(response, url)
            .await?
            .json()
            .await
            .map_err(|e| CrawlError::InvalidResponse(e.to_string()))
    }
}

impl Crawler for FirecrawlCrawler {
    fn crawl(&self, request: &CrawlRequest) -> BoxStream<'static, Result<CrawledPage, CrawlError>> {
        let this = self.clone();
        let request = request.clone();

        Box::pin(stream! {
            let root = match site_root(&request.domain) {
                Ok(root) => root,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if let Err(e) = resolve(&root).await {
                yield Err(e);
                return;
            }

            let crawl_id = match this.start(root.as_str(), request.max_pages).await {
                Ok(id) => id,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            info!(crawl_id = %crawl_id, url = %root, max_pages = request.max_pages, "crawl started");

            let status_url = format!("{}/crawl/{}", this.base_url, crawl_id);
            let started = Instant::now();
            let mut consumed = 0usize;
            let mut next = loop {
                if started.elapsed() > this.poll_timeout {
                    warn!(crawl_id = %crawl_id, "crawl did not finish before poll timeout");
                    yield Err(CrawlError::Timeout { url: root.to_string() });
                    return;
                }
                tokio::time::sleep(this.poll_interval).await;

                let status = match this.status(&status_url, root.as_str()).await {
                    Ok(status) => status,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                let available = status.data.len();
                for data in status.data.into_iter().skip(consumed) {
                    consumed += 1;
                    if let Some(page) = to_page(data) {
                        yield Ok(page);
                    }
                    if consumed >= request.max_pages {
                        return;
                    }
                }
                debug!(crawl_id = %crawl_id, status = %status.status, pages = available, "crawl polled");

                match status.status.as_str() {
                    "completed" => break status.next,
                    "failed" | "cancelled" => {
                        yield Err(CrawlError::InvalidResponse(format!(
                            "crawl {} ended with status {}",
                            crawl_id, status.status
                        )));
                        return;
                    }
                    _ => {}
                }
            };

            // Remaining result pages of a completed crawl
            while let Some(page_url) = next.take() {
                let status = match this.status(&page_url, root.as_str()).await {
                    Ok(status) => status,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for data in status.data {
                    consumed += 1;
                    if let Some(page) = to_page(data) {
                        yield Ok(page);
                    }
                    if consumed >= request.max_pages {
                        return;
                    }
                }
                next = status.next;
            }
        })
    }
}

/// Absolute root URL for a bare domain or URL.
fn site_root(domain: &str) -> Result<Url, CrawlError> {
    let trimmed = domain.trim();
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };
    let url = Url::parse(&candidate).map_err(|_| CrawlError::DomainNotFound {
        domain: domain.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(CrawlError::DomainNotFound {
            domain: domain.to_string(),
        });
    }
    Ok(url)
}

/// Fail fast on names that do not resolve.
async fn resolve(root: &Url) -> Result<(), CrawlError> {
    let host = root.host_str().unwrap_or_default().to_string();
    let port = root.port_or_known_default().unwrap_or(443);
    let resolved = match tokio::net::lookup_host((host.as_str(), port)).await {
        Ok(mut addrs) => addrs.next().is_some(),
        Err(_) => false,
    };
    if resolved {
        Ok(())
    } else {
        Err(CrawlError::DomainNotFound { domain: host })
    }
}

async fn check_status(response: Response, url: &str) -> Result<Response, CrawlError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(CrawlError::RateLimited),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Err(CrawlError::Timeout {
            url: url.to_string(),
        }),
        _ => {
            let text = response.text().await.unwrap_or_default();
            Err(CrawlError::Http(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Firecrawl API error: {} - {}", status, text),
            ))))
        }
    }
}

fn transport_error(err: reqwest::Error, url: &str) -> CrawlError {
    if err.is_timeout() {
        CrawlError::Timeout {
            url: url.to_string(),
        }
    } else {
        CrawlError::Http(Box::new(err))
    }
}

fn to_page(data: CrawlPageData) -> Option<CrawledPage> {
    let metadata = data.metadata?;
    let url = metadata.source_url?;
    let markdown = data.markdown.unwrap_or_default();

    let mut links = data.links;
    for capture in MARKDOWN_LINK.captures_iter(&markdown) {
        let link = capture[1].to_string();
        if !links.contains(&link) {
            links.push(link);
        }
    }

    let mut page = CrawledPage::new(url, excerpt(&markdown))
        .with_headings(headings(&markdown))
        .with_links(links);
    if let Some(title) = metadata.title.filter(|t| !t.trim().is_empty()) {
        page = page.with_title(title);
    }
    Some(page)
}

fn headings(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|heading| !heading.is_empty())
        .collect()
}

fn excerpt(markdown: &str) -> String {
    markdown.chars().take(EXCERPT_CHARS).collect()
}
