//! Discover step: gather and score off-site content per cluster.
//!
//! Candidates come from the site's own outbound links to known platforms,
//! search queries pairing the business name with each topic, and URLs the
//! operator supplied. Scoring is local and deterministic.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::{StepContext, StepExecutor, StepOutcome};
use crate::error::SearchError;
use crate::text::{cosine_similarity, host_of, keyword_score, platform_for};
use crate::traits::searcher::Searcher;
use crate::types::{
    job::Step,
    output::{
        CandidateSource, ClusterOffsite, DiscoverOutput, OffsiteItem, OffsiteScores, StepOutput,
        Topic,
    },
    page::CrawledPage,
};

/// Authority for hosts not on the platform list.
const UNKNOWN_PLATFORM_AUTHORITY: u8 = 8;

pub struct DiscoverExecutor {
    searcher: Arc<dyn Searcher>,
}

impl DiscoverExecutor {
    pub fn new(searcher: Arc<dyn Searcher>) -> Self {
        Self { searcher }
    }
}

fn search_failure(topic: &str, error: SearchError) -> StepOutcome {
    let message = format!("search for '{}': {}", topic, error);
    match error {
        SearchError::RateLimited | SearchError::Timeout => StepOutcome::transient(message),
        SearchError::Http(_) => StepOutcome::unknown(message),
    }
}

/// An unscored off-site URL.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: CandidateSource,
    pub search_score: Option<f64>,
    pub published_date: Option<String>,
}

impl Candidate {
    fn bare(url: &str, source: CandidateSource) -> Self {
        Self {
            url: url.to_string(),
            title: None,
            snippet: None,
            source,
            search_score: None,
            published_date: None,
        }
    }

    fn text(&self) -> String {
        let path_words = url::Url::parse(&self.url)
            .map(|u| u.path().replace(['/', '-', '_'], " "))
            .unwrap_or_default();
        [
            self.title.as_deref().unwrap_or_default(),
            self.snippet.as_deref().unwrap_or_default(),
            path_words.as_str(),
        ]
        .join(" ")
    }
}

/// Outbound links from the site to known platforms, deduplicated.
pub fn platform_links(pages: &[CrawledPage], site_host: Option<&str>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    pages
        .iter()
        .flat_map(|p| p.outbound_links.iter())
        .filter(|link| platform_for(link).is_some())
        .filter(|link| host_of(link).as_deref() != site_host)
        .filter(|link| seen.insert(link.trim_end_matches('/').to_string()))
        .map(|link| Candidate::bare(link, CandidateSource::OutboundLink))
        .collect()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let prefix = raw.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

fn recency_score(published: Option<&str>, now: DateTime<Utc>) -> u8 {
    let Some(date) = published.and_then(parse_date) else {
        return 3;
    };
    let age_days = (now.date_naive() - date).num_days();
    match age_days {
        i64::MIN..=90 => 10,
        91..=365 => 7,
        366..=730 => 4,
        _ => 1,
    }
}

/// Score one candidate against a topic.
pub fn score_candidate(
    candidate: &Candidate,
    topic: &Topic,
    business_name: &str,
    now: DateTime<Utc>,
) -> OffsiteScores {
    let text = candidate.text();
    let mut keywords = topic.keywords.clone();
    keywords.push(topic.name.clone());
    let query = keywords.join(" ");

    let match_strength = keyword_score(&keywords, &text).max(cosine_similarity(&query, &text));
    let relevance = (25.0 * match_strength).round() as u8;

    let mentions_business = text.to_lowercase().contains(&business_name.to_lowercase());
    let snippet_len = candidate.snippet.as_deref().map_or(0, str::len);
    let mut salience = if mentions_business { 15 } else { 0 };
    salience += (snippet_len / 40).min(10) as u8;
    if candidate.source == CandidateSource::Manual {
        salience += 5;
    }

    let engagement = match candidate.source {
        CandidateSource::Search => (candidate.search_score.unwrap_or(0.0).clamp(0.0, 1.0) * 15.0).round() as u8,
        CandidateSource::OutboundLink => 8,
        CandidateSource::Manual => 10,
    };

    let authority = platform_for(&candidate.url).map_or(UNKNOWN_PLATFORM_AUTHORITY, |p| p.authority);

    OffsiteScores {
        relevance: relevance.min(25),
        salience: salience.min(25),
        engagement: engagement.min(15),
        recency: recency_score(candidate.published_date.as_deref(), now),
        authority: authority.min(25),
    }
}

/// Keep the best `min..=max` items: highest total first, ties by relevance.
///
/// Zero-relevance items are only used to reach `min`.
pub fn select_top(mut items: Vec<OffsiteItem>, min: usize, max: usize) -> Vec<OffsiteItem> {
    items.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then(b.scores.relevance.cmp(&a.scores.relevance))
            .then_with(|| a.url.cmp(&b.url))
    });

    let (mut kept, rest): (Vec<_>, Vec<_>) =
        items.into_iter().partition(|i| i.scores.relevance > 0);
    if kept.len() < min {
        let needed = min - kept.len();
        kept.extend(rest.into_iter().take(needed));
    }
    kept.truncate(max);
    kept
}

#[async_trait]
impl StepExecutor for DiscoverExecutor {
    fn step(&self) -> Step {
        Step::Discover
    }

    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome {
        let Some(analysis) = ctx.job.outputs.analyze() else {
            return StepOutcome::fatal("discover requires analyze output");
        };
        let pages = ctx
            .job
            .outputs
            .crawl()
            .map(|c| c.pages.as_slice())
            .unwrap_or_default();

        let site_host = pages
            .first()
            .and_then(|p| host_of(&p.url))
            .or_else(|| host_of(&format!("https://{}", ctx.scan.domain.trim())));
        let outbound = platform_links(pages, site_host.as_deref());
        let manual: Vec<Candidate> = ctx
            .scan
            .manual_urls
            .iter()
            .map(|u| Candidate::bare(u, CandidateSource::Manual))
            .collect();

        let total = analysis.clusters.len().max(1);
        let mut clusters = Vec::with_capacity(analysis.clusters.len());

        for (i, cluster) in analysis.clusters.iter().enumerate() {
            let topic = &cluster.topic;
            ctx.progress
                .report_fraction(
                    &format!("Searching off-site content for {}", topic.name),
                    i as f64 / total as f64,
                )
                .await;

            let query = format!("{} {}", ctx.scan.business_name, topic.name);
            let results = match self
                .searcher
                .search(&query, ctx.config.search_results_per_query)
                .await
            {
                Ok(results) => results,
                Err(e) => return search_failure(&topic.name, e),
            };

            let mut seen = HashSet::new();
            let candidates = outbound
                .iter()
                .cloned()
                .chain(results.into_iter().map(|r| Candidate {
                    url: r.url,
                    title: r.title,
                    snippet: r.snippet,
                    source: CandidateSource::Search,
                    search_score: r.score,
                    published_date: r.published_date,
                }))
                .chain(manual.iter().cloned())
                .filter(|c| c.source == CandidateSource::Manual || host_of(&c.url) != site_host)
                .filter(|c| seen.insert(c.url.trim_end_matches('/').to_string()));

            let items: Vec<OffsiteItem> = candidates
                .map(|c| {
                    let scores = score_candidate(&c, topic, &ctx.scan.business_name, ctx.now);
                    OffsiteItem {
                        platform: platform_for(&c.url).map(|p| p.name.to_string()),
                        url: c.url,
                        title: c.title,
                        snippet: c.snippet,
                        source: c.source,
                        total: scores.total(),
                        scores,
                    }
                })
                .collect();

            let considered = items.len();
            let kept = select_top(
                items,
                ctx.config.offsite_per_cluster_min,
                ctx.config.offsite_per_cluster_max,
            );
            debug!(job_id = %ctx.job.id, topic = %topic.name, considered, kept = kept.len(), "scored off-site candidates");

            clusters.push(ClusterOffsite {
                topic: topic.name.clone(),
                items: kept,
            });
        }

        info!(job_id = %ctx.job.id, clusters = clusters.len(), "discovery finished");
        ctx.progress
            .report_fraction("Off-site discovery complete", 1.0)
            .await;

        StepOutcome::Success(StepOutput::Discover(DiscoverOutput { clusters }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::retry::FailureKind;
    use crate::testing::{sample_scan, sample_site, MockSearcher, StepFixture};
    use crate::types::output::{
        AnalyzeOutput, CrawlOutput, HubScore, StepOutputs, TopicCluster,
    };
    use crate::types::page::SearchResult;
    use chrono::TimeZone;

    fn water_heaters() -> Topic {
        Topic {
            name: "Water heater installation".into(),
            keywords: vec!["water heater".into(), "tankless".into()],
        }
    }

    fn analyzed() -> StepOutputs {
        let mut outputs = StepOutputs::default();
        StepOutput::Crawl(CrawlOutput {
            pages: sample_site(),
            truncated: false,
        })
        .apply_to(&mut outputs);
        StepOutput::Analyze(AnalyzeOutput {
            topics: vec![water_heaters()],
            clusters: vec![TopicCluster {
                topic: water_heaters(),
                hub_url: "https://acme-plumbing.test/services/water-heaters".into(),
                hub_title: None,
                relevance: 0.9,
                member_urls: vec![],
                score: HubScore::from_dimensions(vec![]),
            }],
        })
        .apply_to(&mut outputs);
        outputs
    }

    fn item(url: &str, relevance: u8, total: u8) -> OffsiteItem {
        OffsiteItem {
            url: url.into(),
            title: None,
            snippet: None,
            platform: None,
            source: CandidateSource::Search,
            scores: OffsiteScores {
                relevance,
                ..Default::default()
            },
            total,
        }
    }

    #[test]
    fn platform_links_skip_own_site_and_unknown_hosts() {
        let links = platform_links(&sample_site(), Some("acme-plumbing.test"));
        let urls: Vec<&str> = links.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.youtube.com/@acmeplumbing",
                "https://www.facebook.com/acmeplumbing",
                "https://www.yelp.com/biz/acme-plumbing",
            ]
        );
    }

    #[test]
    fn recency_buckets() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(recency_score(Some("2024-05-01"), now), 10);
        assert_eq!(recency_score(Some("2023-12-01T10:00:00Z"), now), 7);
        assert_eq!(recency_score(Some("2022-12-01"), now), 4);
        assert_eq!(recency_score(Some("2015-01-01"), now), 1);
        assert_eq!(recency_score(None, now), 3);
        assert_eq!(recency_score(Some("yesterday"), now), 3);
    }

    #[test]
    fn scores_stay_within_dimension_bounds() {
        let candidate = Candidate {
            url: "https://www.youtube.com/watch?v=1".into(),
            title: Some("Acme Plumbing tankless water heater install".into()),
            snippet: Some("Acme Plumbing walks through a tankless water heater installation. ".repeat(10)),
            source: CandidateSource::Search,
            search_score: Some(2.0),
            published_date: None,
        };
        let scores = score_candidate(&candidate, &water_heaters(), "Acme Plumbing", Utc::now());
        assert_eq!(scores.relevance, 25);
        assert_eq!(scores.salience, 25);
        assert_eq!(scores.engagement, 15);
        assert_eq!(scores.authority, 25);
        assert!(scores.total() <= 100);
    }

    #[test]
    fn select_top_orders_and_bounds() {
        let items = vec![
            item("https://a.test/1", 10, 50),
            item("https://a.test/2", 20, 50),
            item("https://a.test/3", 0, 90),
            item("https://a.test/4", 5, 10),
            item("https://a.test/5", 5, 20),
            item("https://a.test/6", 5, 30),
            item("https://a.test/7", 5, 40),
        ];
        let kept = select_top(items, 3, 5);
        let urls: Vec<&str> = kept.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://a.test/2",
                "https://a.test/1",
                "https://a.test/7",
                "https://a.test/6",
                "https://a.test/5",
            ]
        );
    }

    #[test]
    fn zero_relevance_fills_up_to_minimum() {
        let items = vec![
            item("https://a.test/1", 10, 50),
            item("https://a.test/2", 0, 40),
            item("https://a.test/3", 0, 30),
            item("https://a.test/4", 0, 20),
        ];
        let kept = select_top(items, 3, 5);
        let urls: Vec<&str> = kept.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://a.test/2", "https://a.test/3"]);
    }

    #[tokio::test]
    async fn merges_all_candidate_sources() {
        let scan = sample_scan().with_manual_urls(vec!["https://blog.example.test/acme-review".into()]);
        let fixture = StepFixture::new(scan, Step::Discover, analyzed()).await.unwrap();
        let searcher = MockSearcher::new().with_results(vec![
            SearchResult::new("https://www.reddit.com/r/plumbing/tankless")
                .with_title("Acme Plumbing tankless water heater")
                .with_score(0.9),
            SearchResult::new("https://acme-plumbing.test/services/water-heaters"),
        ]);
        let executor = DiscoverExecutor::new(Arc::new(searcher.clone()));

        let StepOutcome::Success(StepOutput::Discover(output)) = executor.run(&fixture.ctx()).await
        else {
            panic!("expected discover success");
        };

        assert_eq!(searcher.queries(), vec!["Acme Plumbing Water heater installation"]);
        assert_eq!(output.clusters.len(), 1);
        let items = &output.clusters[0].items;
        assert!(items.len() >= 3 && items.len() <= 5);
        assert_eq!(items[0].url, "https://www.reddit.com/r/plumbing/tankless");
        assert!(items.iter().all(|i| !i.url.contains("acme-plumbing.test/")));
    }

    #[tokio::test]
    async fn search_rate_limit_is_transient() {
        let fixture = StepFixture::new(sample_scan(), Step::Discover, analyzed()).await.unwrap();
        let searcher = MockSearcher::new().with_failures(vec![SearchError::RateLimited]);
        let executor = DiscoverExecutor::new(Arc::new(searcher));

        assert!(matches!(
            executor.run(&fixture.ctx()).await,
            StepOutcome::Retryable {
                kind: FailureKind::Transient,
                ..
            }
        ));
    }
}
