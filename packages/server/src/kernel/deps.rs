//! Server dependencies for the scan engine
//!
//! Builds the production collaborators from configuration and wires them,
//! with the record store, into the controller and poller.

use anyhow::{Context, Result};
use scan_engine::{
    Collaborators, EngineConfig, JobStore, NoopNotifier, NoopSearcher, PipelineController, Poller,
};
use std::sync::Arc;

use crate::config::Config;
use crate::kernel::{FirecrawlCrawler, OpenAiAnalyzer, TavilyClient, WebhookNotifier};

/// Collaborators for the configured environment.
///
/// Search and notification are optional; without their settings the no-op
/// variants are used and discovery relies on links and manual URLs only.
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let crawler = FirecrawlCrawler::new(config.firecrawl_api_key.clone())
        .context("Failed to create Firecrawl client")?;
    let analyzer = OpenAiAnalyzer::new(config.openai_api_key.clone(), config.openai_model.clone())
        .context("Failed to create OpenAI client")?;

    let searcher: Arc<dyn scan_engine::Searcher> = match &config.tavily_api_key {
        Some(key) => Arc::new(TavilyClient::new(key.clone()).context("Failed to create Tavily client")?),
        None => {
            tracing::warn!("TAVILY_API_KEY not set, off-site search disabled");
            Arc::new(NoopSearcher)
        }
    };

    let notifier: Arc<dyn scan_engine::Notifier> = match &config.notification_webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone()).context("Failed to create notification client")?,
        ),
        None => {
            tracing::warn!("NOTIFICATION_WEBHOOK_URL not set, notifications disabled");
            Arc::new(NoopNotifier)
        }
    };

    Ok(Collaborators {
        crawler: Arc::new(crawler),
        analyzer: Arc::new(analyzer),
        searcher,
        notifier,
    })
}

/// Engine wiring shared by the HTTP server, the scheduler and `poll-tick`.
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn JobStore>,
    pub controller: Arc<PipelineController>,
    pub poller: Arc<Poller>,
}

impl ServerDeps {
    pub fn new(store: Arc<dyn JobStore>, collaborators: &Collaborators, config: EngineConfig) -> Self {
        let controller = Arc::new(PipelineController::with_collaborators(
            store.clone(),
            collaborators,
            config,
        ));
        let poller = Arc::new(Poller::new(store.clone(), controller.clone()));
        Self {
            store,
            controller,
            poller,
        }
    }
}
