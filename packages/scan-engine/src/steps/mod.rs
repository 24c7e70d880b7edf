//! Step executors, one per pipeline stage.
//!
//! Executors never return `Err`. Every failure is folded into a
//! [`StepOutcome`] so the controller is the single place that decides
//! between retry and terminal failure.

pub mod analyze;
pub mod crawl;
pub mod discover;
pub mod finalize;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::engine::progress::ProgressReporter;
use crate::engine::retry::FailureKind;
use crate::traits::{
    ai::Analyzer, crawler::Crawler, notifier::Notifier, searcher::Searcher, store::JobStore,
};
use crate::types::{config::EngineConfig, job::Job, job::Step, output::StepOutput, scan::Scan};

pub use analyze::AnalyzeExecutor;
pub use crawl::CrawlExecutor;
pub use discover::DiscoverExecutor;
pub use finalize::FinalizeExecutor;

/// Result of one executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Success(StepOutput),
    Retryable { kind: FailureKind, message: String },
    Fatal(String),
}

impl StepOutcome {
    pub fn transient(message: impl Into<String>) -> Self {
        StepOutcome::Retryable {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        StepOutcome::Retryable {
            kind: FailureKind::Unknown,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StepOutcome::Fatal(message.into())
    }
}

/// Everything an executor may read for one invocation.
pub struct StepContext<'a> {
    pub job: &'a Job,
    pub scan: &'a Scan,
    pub progress: &'a ProgressReporter,
    pub config: &'a EngineConfig,
    /// Reference time for recency scoring and report stamps.
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn step(&self) -> Step;

    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome;
}

/// The external capabilities the executors call.
#[derive(Clone)]
pub struct Collaborators {
    pub crawler: Arc<dyn Crawler>,
    pub analyzer: Arc<dyn Analyzer>,
    pub searcher: Arc<dyn Searcher>,
    pub notifier: Arc<dyn Notifier>,
}

/// One executor per [`Step`] variant.
pub struct StepExecutors {
    crawl: Box<dyn StepExecutor>,
    analyze: Box<dyn StepExecutor>,
    discover: Box<dyn StepExecutor>,
    finalize: Box<dyn StepExecutor>,
}

impl StepExecutors {
    /// The standard executors wired to `collaborators`.
    pub fn new(store: Arc<dyn JobStore>, collaborators: &Collaborators) -> Self {
        Self {
            crawl: Box::new(CrawlExecutor::new(collaborators.crawler.clone())),
            analyze: Box::new(AnalyzeExecutor::new(collaborators.analyzer.clone())),
            discover: Box::new(DiscoverExecutor::new(collaborators.searcher.clone())),
            finalize: Box::new(FinalizeExecutor::new(store, collaborators.analyzer.clone())),
        }
    }

    /// Assemble from arbitrary executors.
    pub fn from_parts(
        crawl: Box<dyn StepExecutor>,
        analyze: Box<dyn StepExecutor>,
        discover: Box<dyn StepExecutor>,
        finalize: Box<dyn StepExecutor>,
    ) -> Self {
        Self {
            crawl,
            analyze,
            discover,
            finalize,
        }
    }

    pub fn for_step(&self, step: Step) -> &dyn StepExecutor {
        match step {
            Step::Crawl => self.crawl.as_ref(),
            Step::Analyze => self.analyze.as_ref(),
            Step::Discover => self.discover.as_ref(),
            Step::Finalize => self.finalize.as_ref(),
        }
    }
}
