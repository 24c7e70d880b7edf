//! Kernel module - production collaborators and engine wiring.

pub mod deps;
pub mod firecrawl_client;
pub mod openai_analyzer;
pub mod scheduled_tasks;
pub mod tavily_client;
pub mod webhook_notifier;

pub use deps::{build_collaborators, ServerDeps};
pub use firecrawl_client::FirecrawlCrawler;
pub use openai_analyzer::OpenAiAnalyzer;
pub use scheduled_tasks::start_scheduler;
pub use tavily_client::TavilyClient;
pub use webhook_notifier::WebhookNotifier;
