//! Testing utilities including mock collaborators.
//!
//! These let applications and integration tests drive the engine end to end
//! without crawling, calling a model, searching or sending anything.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::engine::progress::ProgressReporter;
use crate::error::{AnalysisError, CrawlError, NotifyError, SearchError, StoreResult};
use crate::steps::{Collaborators, StepContext};
use crate::stores::MemoryStore;
use crate::traits::{
    ai::{AnalysisTask, Analyzer},
    crawler::{CrawlRequest, Crawler},
    notifier::Notifier,
    searcher::Searcher,
    store::JobStore,
};
use crate::types::{
    config::EngineConfig,
    job::{Job, Step},
    output::StepOutputs,
    page::{CrawledPage, SearchResult},
    scan::{NewScan, Scan},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type CrawlErrorFactory = Arc<dyn Fn() -> CrawlError + Send + Sync>;

// ============================================================================
// MockCrawler
// ============================================================================

/// Streams a fixed set of pages, optionally ending with an error.
#[derive(Clone, Default)]
pub struct MockCrawler {
    pages: Vec<CrawledPage>,
    error: Option<CrawlErrorFactory>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, pages: impl IntoIterator<Item = CrawledPage>) -> Self {
        self.pages.extend(pages);
        self
    }

    /// End the stream with this error after any configured pages.
    pub fn fail_with(mut self, error: impl Fn() -> CrawlError + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(error));
        self
    }

    /// Domains requested so far.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

impl Crawler for MockCrawler {
    fn crawl(&self, request: &CrawlRequest) -> BoxStream<'static, Result<CrawledPage, CrawlError>> {
        lock(&self.requests).push(request.domain.clone());

        let pages = stream::iter(self.pages.clone().into_iter().map(Ok));
        match &self.error {
            Some(factory) => pages.chain(stream::once(futures::future::ready(Err(factory())))).boxed(),
            None => pages.boxed(),
        }
    }
}

// ============================================================================
// MockAnalyzer
// ============================================================================

/// Returns a canned judgment per task, after draining any queued failures.
#[derive(Clone, Default)]
pub struct MockAnalyzer {
    responses: Arc<Mutex<HashMap<AnalysisTask, serde_json::Value>>>,
    failures: Arc<Mutex<VecDeque<AnalysisError>>>,
    calls: Arc<Mutex<Vec<(AnalysisTask, String)>>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses that score every hub page with `hub_scores`.
    pub fn standard(hub_scores: [u8; 4]) -> Self {
        Self::new()
            .with_response(AnalysisTask::Topics, topics_response())
            .with_response(AnalysisTask::HubScore, hub_score_response(hub_scores))
            .with_response(AnalysisTask::Authority, authority_response())
    }

    pub fn with_response(self, task: AnalysisTask, value: serde_json::Value) -> Self {
        lock(&self.responses).insert(task, value);
        self
    }

    /// Queue errors returned by the next calls, in order, before any response.
    pub fn with_failures(self, errors: impl IntoIterator<Item = AnalysisError>) -> Self {
        lock(&self.failures).extend(errors);
        self
    }

    /// Queue more failures on a shared handle.
    pub fn push_failure(&self, error: AnalysisError) {
        lock(&self.failures).push_back(error);
    }

    pub fn calls(&self) -> Vec<(AnalysisTask, String)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, task: AnalysisTask) -> usize {
        lock(&self.calls).iter().filter(|(t, _)| *t == task).count()
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(
        &self,
        task: AnalysisTask,
        content: &str,
    ) -> Result<serde_json::Value, AnalysisError> {
        lock(&self.calls).push((task, content.to_string()));

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        lock(&self.responses)
            .get(&task)
            .cloned()
            .ok_or_else(|| AnalysisError::MalformedResponse(format!("no mock response for {}", task.as_str())))
    }
}

// ============================================================================
// MockSearcher
// ============================================================================

#[derive(Clone, Default)]
pub struct MockSearcher {
    results: Arc<Mutex<Vec<SearchResult>>>,
    failures: Arc<Mutex<VecDeque<SearchError>>>,
    queries: Arc<Mutex<Vec<String>>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results returned for every query.
    pub fn with_results(self, results: impl IntoIterator<Item = SearchResult>) -> Self {
        lock(&self.results).extend(results);
        self
    }

    pub fn with_failures(self, errors: impl IntoIterator<Item = SearchError>) -> Self {
        lock(&self.failures).extend(errors);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl Searcher for MockSearcher {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        lock(&self.queries).push(query.to_string());
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        Ok(lock(&self.results).iter().take(limit).cloned().collect())
    }
}

// ============================================================================
// MockNotifier
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipient: String,
    pub template_id: String,
    pub data: serde_json::Value,
}

#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    reject: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every message (after recording it).
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        lock(&self.sent).clone()
    }

    pub fn sent_with_template(&self, template_id: &str) -> Vec<SentNotification> {
        lock(&self.sent)
            .iter()
            .filter(|n| n.template_id == template_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        lock(&self.sent).push(SentNotification {
            recipient: recipient.to_string(),
            template_id: template_id.to_string(),
            data: data.clone(),
        });
        if self.reject {
            return Err(NotifyError::Rejected("mock notifier rejects everything".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// A small plumbing business site that exercises every step.
pub fn sample_site() -> Vec<CrawledPage> {
    vec![
        CrawledPage::new(
            "https://acme-plumbing.test/",
            "Acme Plumbing provides emergency plumbing repair and water heater installation \
             across the metro area. Call us for leak detection and drain cleaning.",
        )
        .with_title("Acme Plumbing")
        .with_headings(vec!["Emergency plumbing repair".into(), "Water heaters".into()])
        .with_links(vec![
            "https://www.youtube.com/@acmeplumbing".into(),
            "https://www.facebook.com/acmeplumbing".into(),
            "https://acme-plumbing.test/services".into(),
        ]),
        CrawledPage::new(
            "https://acme-plumbing.test/services",
            "Our services: emergency plumbing repair, water heater installation, \
             drain cleaning and leak detection.",
        )
        .with_title("Services")
        .with_headings(vec!["Services".into()]),
        CrawledPage::new(
            "https://acme-plumbing.test/services/water-heaters",
            "Water heater installation and replacement. Tankless water heater experts. \
             We install gas and electric water heaters.",
        )
        .with_title("Water heater installation")
        .with_headings(vec!["Water heater installation".into()]),
        CrawledPage::new(
            "https://acme-plumbing.test/drain-cleaning",
            "Drain cleaning for kitchens, bathrooms and main sewer lines.",
        )
        .with_title("Drain cleaning")
        .with_links(vec!["https://www.yelp.com/biz/acme-plumbing".into()]),
        CrawledPage::new(
            "https://acme-plumbing.test/about",
            "Family owned since 1998. Licensed and insured master plumbers. \
             Winner of the 2023 Best of Metro award. Over 25 years of experience.",
        )
        .with_title("About us")
        .with_headings(vec!["Our team".into()]),
    ]
}

pub fn topics_response() -> serde_json::Value {
    json!({
        "topics": [
            { "name": "Water heater installation", "keywords": ["water heater", "tankless"] },
            { "name": "Drain cleaning", "keywords": ["drain", "sewer"] },
        ]
    })
}

pub fn hub_score_response(scores: [u8; 4]) -> serde_json::Value {
    let dim = |score: u8| {
        json!({
            "score": score,
            "issues": ["Thin content"],
            "recommendations": ["Add a detailed FAQ"],
        })
    };
    json!({
        "content_depth": dim(scores[0]),
        "structured_clarity": dim(scores[1]),
        "authority_signals": dim(scores[2]),
        "citation_readiness": dim(scores[3]),
    })
}

pub fn authority_response() -> serde_json::Value {
    json!({
        "signals": [
            { "kind": "credential", "text": "Licensed master plumbers" },
            { "kind": "tenure", "text": "Family owned since 1998" },
        ]
    })
}

pub fn sample_scan() -> NewScan {
    NewScan::new(Uuid::new_v4(), "acme-plumbing.test", "Acme Plumbing")
        .with_recipient("owner@acme-plumbing.test")
}

/// Mock collaborators with handles kept for assertions.
#[derive(Clone)]
pub struct MockCollaborators {
    pub crawler: MockCrawler,
    pub analyzer: MockAnalyzer,
    pub searcher: MockSearcher,
    pub notifier: MockNotifier,
}

impl Default for MockCollaborators {
    fn default() -> Self {
        Self {
            crawler: MockCrawler::new().with_pages(sample_site()),
            analyzer: MockAnalyzer::standard([20, 10, 15, 22]),
            searcher: MockSearcher::new().with_results(vec![
                SearchResult::new("https://www.reddit.com/r/plumbing/acme-water-heater")
                    .with_title("Acme Plumbing water heater install review")
                    .with_snippet("Acme Plumbing replaced our tankless water heater in a day.")
                    .with_score(0.8),
                SearchResult::new("https://news.example.test/drain-cleaning-tips")
                    .with_title("Drain cleaning tips from local pros")
                    .with_snippet("Acme Plumbing explains sewer line drain maintenance.")
                    .with_score(0.5),
            ]),
            notifier: MockNotifier::new(),
        }
    }
}

impl MockCollaborators {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            crawler: Arc::new(self.crawler.clone()),
            analyzer: Arc::new(self.analyzer.clone()),
            searcher: Arc::new(self.searcher.clone()),
            notifier: Arc::new(self.notifier.clone()),
        }
    }
}

/// A claimed job at a chosen step, ready to hand to an executor.
pub struct StepFixture {
    pub store: Arc<MemoryStore>,
    pub scan: Scan,
    pub job: Job,
    pub config: EngineConfig,
    pub progress: ProgressReporter,
}

impl StepFixture {
    pub async fn new(scan: NewScan, step: Step, outputs: StepOutputs) -> StoreResult<Self> {
        let store = Arc::new(MemoryStore::new());
        let scan = store.create_scan(scan).await?;
        let mut job = store.create_job(scan.id).await?;
        job.step = step;
        job.progress_percentage = step.start_percent();
        job.outputs = outputs;
        store.put_job(job.clone())?;

        let now = chrono::Utc::now();
        let config = EngineConfig::default();
        if let Some(claim) = store
            .try_claim(job.id, Uuid::new_v4(), now, config.stale_before(now))
            .await?
        {
            job = claim.job;
        }

        let progress = ProgressReporter::new(store.clone(), job.id, step);
        Ok(Self {
            store,
            scan,
            job,
            config,
            progress,
        })
    }

    pub fn ctx(&self) -> StepContext<'_> {
        StepContext {
            job: &self.job,
            scan: &self.scan,
            progress: &self.progress,
            config: &self.config,
            now: chrono::Utc::now(),
        }
    }

    pub async fn stored_job(&self) -> StoreResult<Option<Job>> {
        self.store.get_job(self.job.id).await
    }
}
