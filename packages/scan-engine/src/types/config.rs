//! Engine configuration.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Tunables for the poller, lock manager and step executors.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum jobs selected per poll tick.
    pub poll_batch_limit: usize,

    /// Maximum jobs processed concurrently within one tick.
    pub fan_out: usize,

    /// Maximum wall-clock time one step may hold a lock.
    ///
    /// A lock older than this is stale and may be reclaimed.
    pub max_step_duration: Duration,

    /// Hard ceiling on a single executor invocation.
    ///
    /// Must be shorter than `max_step_duration` so a live worker gives up
    /// before its lock can be reclaimed.
    pub invocation_timeout: Duration,

    /// Maximum pages consumed from the crawl stream.
    pub crawl_max_pages: usize,

    /// Report crawl progress every N pages.
    pub crawl_progress_every: usize,

    /// Off-site items kept per cluster (lower bound when candidates allow).
    pub offsite_per_cluster_min: usize,

    /// Off-site items kept per cluster (upper bound).
    pub offsite_per_cluster_max: usize,

    /// Results requested per search query.
    pub search_results_per_query: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_batch_limit: 10,
            fan_out: 4,
            max_step_duration: Duration::from_secs(300),
            invocation_timeout: Duration::from_secs(280),
            crawl_max_pages: 100,
            crawl_progress_every: 10,
            offsite_per_cluster_min: 3,
            offsite_per_cluster_max: 5,
            search_results_per_query: 8,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fan_out(mut self, fan_out: usize) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_poll_batch_limit(mut self, limit: usize) -> Self {
        self.poll_batch_limit = limit;
        self
    }

    pub fn with_max_step_duration(mut self, duration: Duration) -> Self {
        self.max_step_duration = duration;
        self
    }

    pub fn with_invocation_timeout(mut self, timeout: Duration) -> Self {
        self.invocation_timeout = timeout;
        self
    }

    pub fn with_crawl_max_pages(mut self, pages: usize) -> Self {
        self.crawl_max_pages = pages;
        self
    }

    /// Check the relationships between settings.
    pub fn validate(&self) -> Result<()> {
        if self.fan_out == 0 {
            return Err(EngineError::Config("fan_out must be at least 1".into()));
        }
        if self.poll_batch_limit == 0 {
            return Err(EngineError::Config(
                "poll_batch_limit must be at least 1".into(),
            ));
        }
        if self.invocation_timeout >= self.max_step_duration {
            return Err(EngineError::Config(format!(
                "invocation_timeout ({:?}) must be shorter than max_step_duration ({:?})",
                self.invocation_timeout, self.max_step_duration
            )));
        }
        if self.offsite_per_cluster_min > self.offsite_per_cluster_max {
            return Err(EngineError::Config(
                "offsite_per_cluster_min exceeds offsite_per_cluster_max".into(),
            ));
        }
        if self.crawl_progress_every == 0 {
            return Err(EngineError::Config(
                "crawl_progress_every must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Locks acquired before the returned instant are stale at `now`.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let max = chrono::Duration::from_std(self.max_step_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        now - max
    }
}
