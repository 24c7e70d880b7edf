//! Typed per-step output bag.
//!
//! Each step writes exactly one slot. Slots are wrapped in [`Versioned`] so a
//! stored bag carries its schema version alongside the data and a future
//! shape change can be read side by side with the old one.

use serde::{Deserialize, Serialize};

use super::page::CrawledPage;
use super::report::AuditReport;

/// Schema-versioned envelope for one step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "schema_version")]
pub enum Versioned<T> {
    #[serde(rename = "1")]
    V1(T),
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Versioned::V1(value)
    }

    pub fn get(&self) -> &T {
        match self {
            Versioned::V1(value) => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Versioned::V1(value) => value,
        }
    }
}

/// Accumulated outputs, one slot per step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl: Option<Versioned<CrawlOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyze: Option<Versioned<AnalyzeOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover: Option<Versioned<DiscoverOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<Versioned<FinalizeOutput>>,
}

impl StepOutputs {
    pub fn crawl(&self) -> Option<&CrawlOutput> {
        self.crawl.as_ref().map(Versioned::get)
    }

    pub fn analyze(&self) -> Option<&AnalyzeOutput> {
        self.analyze.as_ref().map(Versioned::get)
    }

    pub fn discover(&self) -> Option<&DiscoverOutput> {
        self.discover.as_ref().map(Versioned::get)
    }

    pub fn finalize(&self) -> Option<&FinalizeOutput> {
        self.finalize.as_ref().map(Versioned::get)
    }
}

/// Output of a single step, applied onto the bag by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    Crawl(CrawlOutput),
    Analyze(AnalyzeOutput),
    Discover(DiscoverOutput),
    Finalize(FinalizeOutput),
}

impl StepOutput {
    /// Write this output into its slot, replacing any prior attempt's value.
    pub fn apply_to(self, outputs: &mut StepOutputs) {
        match self {
            StepOutput::Crawl(o) => outputs.crawl = Some(Versioned::new(o)),
            StepOutput::Analyze(o) => outputs.analyze = Some(Versioned::new(o)),
            StepOutput::Discover(o) => outputs.discover = Some(Versioned::new(o)),
            StepOutput::Finalize(o) => outputs.finalize = Some(Versioned::new(o)),
        }
    }
}

// ============================================================================
// Crawl
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlOutput {
    pub pages: Vec<CrawledPage>,
    /// The page limit was hit before the crawl stream ended.
    #[serde(default)]
    pub truncated: bool,
}

// ============================================================================
// Analyze
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The four citation-worthiness dimensions, 0 to 25 each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    ContentDepth,
    StructuredClarity,
    AuthoritySignals,
    CitationReadiness,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::ContentDepth,
        Dimension::StructuredClarity,
        Dimension::AuthoritySignals,
        Dimension::CitationReadiness,
    ];

    pub const MAX_SCORE: u8 = 25;

    pub fn key(&self) -> &'static str {
        match self {
            Dimension::ContentDepth => "content_depth",
            Dimension::StructuredClarity => "structured_clarity",
            Dimension::AuthoritySignals => "authority_signals",
            Dimension::CitationReadiness => "citation_readiness",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::ContentDepth => "Content depth",
            Dimension::StructuredClarity => "Structured clarity",
            Dimension::AuthoritySignals => "Authority signals",
            Dimension::CitationReadiness => "Citation readiness",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub score: u8,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl DimensionScore {
    /// Points missing from the dimension's maximum.
    pub fn gap(&self) -> u8 {
        Dimension::MAX_SCORE.saturating_sub(self.score)
    }
}

/// Four dimension scores for one hub page, summed into a 0-100 total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubScore {
    pub dimensions: Vec<DimensionScore>,
    pub total: u8,
}

impl HubScore {
    pub fn from_dimensions(dimensions: Vec<DimensionScore>) -> Self {
        let total = dimensions
            .iter()
            .map(|d| d.score.min(Dimension::MAX_SCORE) as u16)
            .sum::<u16>()
            .min(100) as u8;
        Self { dimensions, total }
    }

    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionScore> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }
}

/// One topic with its selected hub page and that page's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCluster {
    pub topic: Topic,
    pub hub_url: String,
    pub hub_title: Option<String>,
    /// Combined keyword/similarity relevance that won hub selection.
    pub relevance: f64,
    /// Other crawled pages matched to the topic.
    #[serde(default)]
    pub member_urls: Vec<String>,
    pub score: HubScore,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeOutput {
    pub topics: Vec<Topic>,
    pub clusters: Vec<TopicCluster>,
}

// ============================================================================
// Discover
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    OutboundLink,
    Search,
    Manual,
}

impl CandidateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateSource::OutboundLink => "outbound_link",
            CandidateSource::Search => "search",
            CandidateSource::Manual => "manual",
        }
    }
}

/// Five-dimension off-site score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsiteScores {
    /// 0-25
    pub relevance: u8,
    /// 0-25
    pub salience: u8,
    /// 0-15
    pub engagement: u8,
    /// 0-10
    pub recency: u8,
    /// 0-25
    pub authority: u8,
}

impl OffsiteScores {
    pub fn total(&self) -> u8 {
        self.relevance
            .saturating_add(self.salience)
            .saturating_add(self.engagement)
            .saturating_add(self.recency)
            .saturating_add(self.authority)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsiteItem {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub platform: Option<String>,
    pub source: CandidateSource,
    pub scores: OffsiteScores,
    pub total: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOffsite {
    pub topic: String,
    pub items: Vec<OffsiteItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoverOutput {
    pub clusters: Vec<ClusterOffsite>,
}

// ============================================================================
// Finalize
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Credential,
    Award,
    Tenure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoritySignal {
    pub kind: SignalKind,
    pub text: String,
    pub source_url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeOutput {
    pub authority_signals: Vec<AuthoritySignal>,
    pub artifact_version: i32,
    pub recommendations: RecommendationCounts,
    /// Rendered markdown, written onto the scan when the job completes.
    pub artifact: String,
    pub report: AuditReport,
}
