//! Analyze step: derive topics, pick one hub page per topic, score each hub.
//!
//! The three phases run in order inside one invocation. A failure anywhere
//! fails the whole step; a retry starts again from topic derivation.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{StepContext, StepExecutor, StepOutcome};
use crate::error::AnalysisError;
use crate::prompts;
use crate::text::{cosine_similarity, keyword_score};
use crate::traits::ai::{AnalysisTask, Analyzer};
use crate::types::{
    job::Step,
    output::{AnalyzeOutput, Dimension, DimensionScore, HubScore, StepOutput, Topic, TopicCluster},
    page::CrawledPage,
};

const MAX_TOPICS: usize = 6;
const MAX_TOPIC_SOURCE_PAGES: usize = 6;
const KEYWORD_WEIGHT: f64 = 0.6;
const SIMILARITY_WEIGHT: f64 = 0.4;

const SERVICE_HINTS: &[&str] = &[
    "service", "services", "what-we-do", "solutions", "offerings", "products", "practice-areas",
];

pub struct AnalyzeExecutor {
    analyzer: Arc<dyn Analyzer>,
}

impl AnalyzeExecutor {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }
}

/// Map an analysis collaborator error onto a retryable outcome.
pub(crate) fn analysis_failure(context: &str, error: AnalysisError) -> StepOutcome {
    let message = format!("{}: {}", context, error);
    match error {
        AnalysisError::RateLimited | AnalysisError::Timeout => StepOutcome::transient(message),
        AnalysisError::MalformedResponse(_) | AnalysisError::Http(_) => {
            StepOutcome::unknown(message)
        }
    }
}

// ============================================================================
// Phase 1: topics
// ============================================================================

fn looks_like_services(page: &CrawledPage) -> bool {
    let path = page.path().to_lowercase();
    let title = page.title.as_deref().unwrap_or_default().to_lowercase();
    SERVICE_HINTS
        .iter()
        .any(|hint| path.contains(hint) || title.contains(hint))
}

/// Homepage and services-like pages, shallowest first.
pub fn topic_source_pages(pages: &[CrawledPage]) -> Vec<&CrawledPage> {
    let mut sources: Vec<&CrawledPage> = pages
        .iter()
        .filter(|p| p.is_homepage() || looks_like_services(p))
        .collect();

    if sources.is_empty() {
        sources = pages.iter().collect();
    }
    sources.sort_by_key(|p| (p.path_depth(), p.url.len()));
    sources.truncate(MAX_TOPIC_SOURCE_PAGES);
    sources
}

/// Accepts `{"topics": [...]}` or a bare array; items are objects or strings.
pub fn parse_topics(value: &serde_json::Value) -> Result<Vec<Topic>, String> {
    let items = value
        .get("topics")
        .unwrap_or(value)
        .as_array()
        .ok_or_else(|| "topics response is not a list".to_string())?;

    let mut seen = HashSet::new();
    let mut topics = Vec::new();
    for item in items {
        let topic = match item {
            serde_json::Value::String(name) => Topic {
                name: name.clone(),
                keywords: Vec::new(),
            },
            serde_json::Value::Object(_) => serde_json::from_value::<Topic>(item.clone())
                .map_err(|e| format!("malformed topic: {}", e))?,
            _ => return Err("topic entry is neither string nor object".to_string()),
        };

        let name = topic.name.trim();
        if name.is_empty() || !seen.insert(name.to_lowercase()) {
            continue;
        }
        topics.push(Topic {
            name: name.to_string(),
            keywords: topic.keywords,
        });
        if topics.len() == MAX_TOPICS {
            break;
        }
    }
    Ok(topics)
}

// ============================================================================
// Phase 2: hub selection
// ============================================================================

#[derive(Debug, Clone)]
pub struct HubMatch<'a> {
    pub hub: &'a CrawledPage,
    pub relevance: f64,
    pub members: Vec<&'a CrawledPage>,
}

/// Keyword match blended with content similarity, rounded for stable ties.
pub fn relevance(topic: &Topic, page: &CrawledPage) -> f64 {
    let text = page.text();
    let mut keywords = topic.keywords.clone();
    keywords.push(topic.name.clone());
    let query = keywords.join(" ");

    let score = KEYWORD_WEIGHT * keyword_score(&keywords, &text)
        + SIMILARITY_WEIGHT * cosine_similarity(&query, &text);
    (score * 10_000.0).round() / 10_000.0
}

/// Highest relevance wins; ties go to the shallowest, then shortest, URL.
pub fn select_hub<'a>(topic: &Topic, pages: &'a [CrawledPage]) -> Option<HubMatch<'a>> {
    let mut scored: Vec<(&CrawledPage, f64)> = pages
        .iter()
        .map(|p| (p, relevance(topic, p)))
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.path_depth().cmp(&b.path_depth()))
            .then_with(|| a.url.len().cmp(&b.url.len()))
    });

    let mut iter = scored.into_iter();
    let (hub, relevance) = iter.next()?;
    Some(HubMatch {
        hub,
        relevance,
        members: iter.map(|(p, _)| p).collect(),
    })
}

// ============================================================================
// Phase 3: scoring
// ============================================================================

fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Validate a four-dimension judgment. Every dimension must be present with
/// a score in 0..=25.
pub fn parse_hub_score(value: &serde_json::Value) -> Result<HubScore, String> {
    let mut dimensions = Vec::with_capacity(Dimension::ALL.len());

    for dimension in Dimension::ALL {
        let entry = value
            .get(dimension.key())
            .ok_or_else(|| format!("missing {}", dimension.key()))?;

        let (raw, issues, recommendations) = match entry {
            serde_json::Value::Number(n) => (n.as_f64(), Vec::new(), Vec::new()),
            serde_json::Value::Object(_) => (
                entry.get("score").and_then(|s| s.as_f64()),
                string_list(entry.get("issues")),
                string_list(entry.get("recommendations")),
            ),
            _ => (None, Vec::new(), Vec::new()),
        };

        let raw = raw.ok_or_else(|| format!("{} has no numeric score", dimension.key()))?;
        if !(0.0..=Dimension::MAX_SCORE as f64).contains(&raw) {
            return Err(format!("{} score {} out of range", dimension.key(), raw));
        }

        dimensions.push(DimensionScore {
            dimension,
            score: raw.round() as u8,
            issues,
            recommendations,
        });
    }

    Ok(HubScore::from_dimensions(dimensions))
}

#[async_trait]
impl StepExecutor for AnalyzeExecutor {
    fn step(&self) -> Step {
        Step::Analyze
    }

    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome {
        let Some(crawl) = ctx.job.outputs.crawl() else {
            return StepOutcome::fatal("analyze requires crawl output");
        };
        let pages = &crawl.pages;

        // Phase 1
        ctx.progress
            .report_fraction("Identifying priority topics", 0.0)
            .await;
        let sources = topic_source_pages(pages);
        let content = prompts::format_topics_content(&ctx.scan.business_name, &sources);
        let topics = match self.analyzer.analyze(AnalysisTask::Topics, &content).await {
            Ok(value) => match parse_topics(&value) {
                Ok(topics) => topics,
                Err(e) => return StepOutcome::unknown(format!("topic derivation: {}", e)),
            },
            Err(e) => return analysis_failure("topic derivation", e),
        };
        if topics.is_empty() {
            return StepOutcome::unknown("topic derivation returned no topics");
        }
        debug!(job_id = %ctx.job.id, topics = topics.len(), "derived topics");

        // Phase 2
        ctx.progress
            .report_fraction(&format!("Matching pages to {} topics", topics.len()), 0.2)
            .await;
        let mut matches = Vec::new();
        for topic in &topics {
            match select_hub(topic, pages) {
                Some(hub) => matches.push((topic, hub)),
                None => warn!(job_id = %ctx.job.id, topic = %topic.name, "no page matches topic, dropping"),
            }
        }
        if matches.is_empty() {
            return StepOutcome::unknown("no crawled page matches any derived topic");
        }

        // Phase 3
        let total = matches.len();
        let mut clusters = Vec::with_capacity(total);
        for (i, (topic, hub)) in matches.into_iter().enumerate() {
            ctx.progress
                .report_fraction(
                    &format!("Scoring hub page {}/{}: {}", i + 1, total, hub.hub.url),
                    0.3 + 0.7 * (i as f64 / total as f64),
                )
                .await;

            let content = prompts::format_hub_content(&topic.name, hub.hub);
            let score = match self.analyzer.analyze(AnalysisTask::HubScore, &content).await {
                Ok(value) => match parse_hub_score(&value) {
                    Ok(score) => score,
                    Err(e) => {
                        return StepOutcome::unknown(format!(
                            "malformed score for {}: {}",
                            hub.hub.url, e
                        ))
                    }
                },
                Err(e) => return analysis_failure(&format!("scoring {}", hub.hub.url), e),
            };

            clusters.push(TopicCluster {
                topic: topic.clone(),
                hub_url: hub.hub.url.clone(),
                hub_title: hub.hub.title.clone(),
                relevance: hub.relevance,
                member_urls: hub.members.iter().map(|p| p.url.clone()).collect(),
                score,
            });
        }

        info!(job_id = %ctx.job.id, clusters = clusters.len(), "analysis finished");
        ctx.progress
            .report_fraction(&format!("Scored {} hub pages", clusters.len()), 1.0)
            .await;

        StepOutcome::Success(StepOutput::Analyze(AnalyzeOutput { topics, clusters }))
    }
}
