//! Crawl step: fetch the site's pages through the crawl collaborator.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::{StepContext, StepExecutor, StepOutcome};
use crate::error::CrawlError;
use crate::traits::crawler::{CrawlRequest, Crawler};
use crate::types::{
    job::Step,
    output::{CrawlOutput, StepOutput},
};

pub struct CrawlExecutor {
    crawler: Arc<dyn Crawler>,
}

impl CrawlExecutor {
    pub fn new(crawler: Arc<dyn Crawler>) -> Self {
        Self { crawler }
    }
}

/// Turn an operator-entered domain into a site root URL.
///
/// Accepts `acme.com`, `www.acme.com` or a full `https://acme.com/...`.
pub fn site_root(domain: &str) -> Result<String, String> {
    let trimmed = domain.trim();
    if trimmed.is_empty() {
        return Err("domain is empty".to_string());
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let url = Url::parse(&candidate).map_err(|e| format!("invalid domain '{}': {}", trimmed, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    match url.host_str() {
        Some(host) if host.contains('.') || host == "localhost" => {
            Ok(url.origin().ascii_serialization())
        }
        _ => Err(format!("invalid domain '{}'", trimmed)),
    }
}

fn crawl_failure(error: CrawlError) -> StepOutcome {
    match error {
        CrawlError::Timeout { .. } | CrawlError::RateLimited => {
            StepOutcome::transient(error.to_string())
        }
        CrawlError::DomainNotFound { .. } => StepOutcome::fatal(error.to_string()),
        CrawlError::Http(_) | CrawlError::InvalidResponse(_) => {
            StepOutcome::unknown(error.to_string())
        }
    }
}

#[async_trait]
impl StepExecutor for CrawlExecutor {
    fn step(&self) -> Step {
        Step::Crawl
    }

    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome {
        let root = match site_root(&ctx.scan.domain) {
            Ok(root) => root,
            Err(message) => return StepOutcome::fatal(message),
        };

        let max_pages = ctx.config.crawl_max_pages.max(1);
        let every = ctx.config.crawl_progress_every.max(1);
        ctx.progress
            .report_fraction(&format!("Crawling {}", root), 0.0)
            .await;

        let mut stream = self.crawler.crawl(&CrawlRequest::new(root.clone(), max_pages));
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        let mut truncated = false;

        while let Some(item) = stream.next().await {
            match item {
                Ok(page) => {
                    if !seen.insert(page.url.clone()) {
                        continue;
                    }
                    pages.push(page);

                    let count = pages.len();
                    if count % every == 0 {
                        ctx.progress
                            .report_fraction(
                                &format!("Discovered {} pages", count),
                                count as f64 / max_pages as f64,
                            )
                            .await;
                    }
                    if count >= max_pages {
                        truncated = true;
                        break;
                    }
                }
                Err(e) => {
                    warn!(job_id = %ctx.job.id, domain = %root, error = %e, pages = pages.len(), "crawl failed");
                    return crawl_failure(e);
                }
            }
        }

        if pages.is_empty() {
            return StepOutcome::fatal(format!("no pages found at {}", root));
        }

        info!(job_id = %ctx.job.id, domain = %root, pages = pages.len(), truncated, "crawl finished");
        ctx.progress
            .report_fraction(&format!("Crawled {} pages", pages.len()), 1.0)
            .await;

        StepOutcome::Success(StepOutput::Crawl(CrawlOutput { pages, truncated }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::retry::FailureKind;
    use crate::testing::{sample_scan, sample_site, MockCrawler, StepFixture};
    use crate::types::{output::StepOutputs, page::CrawledPage, scan::NewScan};
    use uuid::Uuid;

    #[test]
    fn site_root_normalizes_domains() {
        assert_eq!(site_root("acme.com").unwrap(), "https://acme.com");
        assert_eq!(site_root(" https://www.acme.com/about ").unwrap(), "https://www.acme.com");
        assert!(site_root("").is_err());
        assert!(site_root("ftp://acme.com").is_err());
        assert!(site_root("not a domain").is_err());
    }

    #[tokio::test]
    async fn collects_pages_and_reports_progress() {
        let fixture = StepFixture::new(sample_scan(), Step::Crawl, StepOutputs::default())
            .await
            .unwrap();
        let crawler = MockCrawler::new().with_pages(sample_site());
        let executor = CrawlExecutor::new(Arc::new(crawler.clone()));

        let outcome = executor.run(&fixture.ctx()).await;

        let StepOutcome::Success(StepOutput::Crawl(output)) = outcome else {
            panic!("expected crawl success");
        };
        assert_eq!(output.pages.len(), 5);
        assert!(!output.truncated);
        assert_eq!(crawler.requests(), vec!["https://acme-plumbing.test".to_string()]);

        let job = fixture.stored_job().await.unwrap().unwrap();
        assert_eq!(job.substep_label, "Crawled 5 pages");
        assert!(job.progress_percentage < Step::Crawl.end_percent());
    }

    #[tokio::test]
    async fn stops_at_page_limit() {
        let mut fixture = StepFixture::new(sample_scan(), Step::Crawl, StepOutputs::default())
            .await
            .unwrap();
        fixture.config.crawl_max_pages = 2;
        let executor = CrawlExecutor::new(Arc::new(MockCrawler::new().with_pages(sample_site())));

        let StepOutcome::Success(StepOutput::Crawl(output)) = executor.run(&fixture.ctx()).await
        else {
            panic!("expected crawl success");
        };
        assert_eq!(output.pages.len(), 2);
        assert!(output.truncated);
    }

    #[tokio::test]
    async fn duplicate_urls_are_dropped() {
        let fixture = StepFixture::new(sample_scan(), Step::Crawl, StepOutputs::default())
            .await
            .unwrap();
        let page = CrawledPage::new("https://acme-plumbing.test/", "home");
        let executor = CrawlExecutor::new(Arc::new(
            MockCrawler::new().with_pages(vec![page.clone(), page]),
        ));

        let StepOutcome::Success(StepOutput::Crawl(output)) = executor.run(&fixture.ctx()).await
        else {
            panic!("expected crawl success");
        };
        assert_eq!(output.pages.len(), 1);
    }

    #[tokio::test]
    async fn maps_collaborator_errors() {
        let cases: Vec<(CrawlError, Option<FailureKind>)> = vec![
            (CrawlError::RateLimited, Some(FailureKind::Transient)),
            (
                CrawlError::Timeout {
                    url: "https://acme-plumbing.test".into(),
                },
                Some(FailureKind::Transient),
            ),
            (CrawlError::InvalidResponse("bad".into()), Some(FailureKind::Unknown)),
            (
                CrawlError::DomainNotFound {
                    domain: "acme-plumbing.test".into(),
                },
                None,
            ),
        ];

        for (error, expected) in cases {
            let outcome = crawl_failure(error);
            match (expected, outcome) {
                (Some(kind), StepOutcome::Retryable { kind: got, .. }) => assert_eq!(kind, got),
                (None, StepOutcome::Fatal(_)) => {}
                (expected, outcome) => panic!("expected {:?}, got {:?}", expected, outcome),
            }
        }
    }

    #[tokio::test]
    async fn unreachable_domain_is_fatal() {
        let fixture = StepFixture::new(sample_scan(), Step::Crawl, StepOutputs::default())
            .await
            .unwrap();
        let executor = CrawlExecutor::new(Arc::new(MockCrawler::new().fail_with(|| {
            CrawlError::DomainNotFound {
                domain: "acme-plumbing.test".into(),
            }
        })));

        assert!(matches!(executor.run(&fixture.ctx()).await, StepOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn invalid_domain_is_fatal_without_crawling() {
        let fixture = StepFixture::new(
            NewScan::new(Uuid::new_v4(), "no dots here", "Broken"),
            Step::Crawl,
            StepOutputs::default(),
        )
        .await
        .unwrap();
        let crawler = MockCrawler::new();
        let executor = CrawlExecutor::new(Arc::new(crawler.clone()));

        assert!(matches!(executor.run(&fixture.ctx()).await, StepOutcome::Fatal(_)));
        assert!(crawler.requests().is_empty());
    }

    #[tokio::test]
    async fn empty_site_is_fatal() {
        let fixture = StepFixture::new(sample_scan(), Step::Crawl, StepOutputs::default())
            .await
            .unwrap();
        let executor = CrawlExecutor::new(Arc::new(MockCrawler::new()));
        assert!(matches!(executor.run(&fixture.ctx()).await, StepOutcome::Fatal(_)));
    }
}
