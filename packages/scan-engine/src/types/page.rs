//! Page and search-result shapes passed between collaborators and steps.

use serde::{Deserialize, Serialize};
use url::Url;

/// A single page returned by the crawl collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub title: Option<String>,
    #[serde(default)]
    pub headings: Vec<String>,
    /// Leading slice of the page's text content.
    pub content_excerpt: String,
    #[serde(default)]
    pub outbound_links: Vec<String>,
}

impl CrawledPage {
    pub fn new(url: impl Into<String>, content_excerpt: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            headings: Vec::new(),
            content_excerpt: content_excerpt.into(),
            outbound_links: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_headings(mut self, headings: Vec<String>) -> Self {
        self.headings = headings;
        self
    }

    pub fn with_links(mut self, links: Vec<String>) -> Self {
        self.outbound_links = links;
        self
    }

    /// Path of the page URL, `/` for the root or when unparseable.
    pub fn path(&self) -> String {
        Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string())
    }

    /// Number of non-empty path segments (`/` is 0, `/about/team` is 2).
    pub fn path_depth(&self) -> usize {
        self.path().split('/').filter(|s| !s.is_empty()).count()
    }

    pub fn is_homepage(&self) -> bool {
        self.path_depth() == 0
    }

    /// Title, headings and excerpt joined for prompting and matching.
    pub fn text(&self) -> String {
        let mut text = String::new();
        if let Some(title) = &self.title {
            text.push_str(title);
            text.push('\n');
        }
        for heading in &self.headings {
            text.push_str(heading);
            text.push('\n');
        }
        text.push_str(&self.content_excerpt);
        text
    }
}

/// A single result from the discovery (search) collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    /// Relevance score reported by the search service (0.0 to 1.0).
    pub score: Option<f64>,
    /// Publication date as reported, ISO-8601 when known.
    pub published_date: Option<String>,
}

impl SearchResult {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            snippet: None,
            score: None,
            published_date: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_published_date(mut self, date: impl Into<String>) -> Self {
        self.published_date = Some(date.into());
        self
    }
}
