//! Discovery (search) collaborator.

use async_trait::async_trait;

use crate::error::SearchError;
use crate::types::page::SearchResult;

#[async_trait]
pub trait Searcher: Send + Sync {
    /// Search the web, returning at most `limit` results.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError>;
}

/// Searcher that never finds anything. Used when no search key is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopSearcher;

#[async_trait]
impl Searcher for NoopSearcher {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        Ok(Vec::new())
    }
}
