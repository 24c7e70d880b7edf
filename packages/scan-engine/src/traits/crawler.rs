//! Crawl collaborator.

use futures::stream::BoxStream;

use crate::error::CrawlError;
use crate::types::page::CrawledPage;

/// What to crawl.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Bare domain or absolute URL of the site root.
    pub domain: String,
    pub max_pages: usize,
}

impl CrawlRequest {
    pub fn new(domain: impl Into<String>, max_pages: usize) -> Self {
        Self {
            domain: domain.into(),
            max_pages,
        }
    }
}

/// Fetches a site's pages.
///
/// Pages are streamed as they become available so callers can report
/// partial progress. An `Err` item ends the crawl.
pub trait Crawler: Send + Sync {
    fn crawl(&self, request: &CrawlRequest) -> BoxStream<'static, Result<CrawledPage, CrawlError>>;
}
