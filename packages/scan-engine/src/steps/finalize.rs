//! Finalize step: authority signals, audit report, artifact and saved results.
//!
//! The scan itself is completed by the controller, in the same guarded write
//! that completes the job.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use super::analyze::analysis_failure;
use super::{StepContext, StepExecutor, StepOutcome};
use crate::prompts::format_authority_content;
use crate::traits::{
    ai::{AnalysisTask, Analyzer},
    store::JobStore,
};
use crate::types::{
    job::Step,
    output::{
        AuthoritySignal, ClusterOffsite, FinalizeOutput, SignalKind, StepOutput, TopicCluster,
    },
    page::CrawledPage,
    report::AuditReport,
    scan::{Scan, ScanResults},
};

const ABOUT_HINTS: &[&str] = &[
    "about",
    "team",
    "staff",
    "our-story",
    "leadership",
    "who-we-are",
    "company",
];

const MAX_ABOUT_PAGES: usize = 5;

lazy_static! {
    static ref CREDENTIAL: Regex = Regex::new(
        r"(?i)\b(licensed|certified|accredited|board[- ]certified|registered|bonded|insured|member of)\b[^.!?\n]{0,80}"
    )
    .unwrap();
    static ref AWARD: Regex = Regex::new(
        r"(?i)[^.!?\n]{0,60}\b(award|winner|best of|top[- ]rated|recognized)\b[^.!?\n]{0,60}"
    )
    .unwrap();
    static ref TENURE: Regex = Regex::new(
        r"(?i)\b((since|founded in|established in|established)\s+(19|20)\d{2}|\d{1,3}\+?\s+years\s+(of\s+experience|in\s+business|experience))"
    )
    .unwrap();
    static ref SENTENCE: Regex = Regex::new(r"[^.!?\n]+").unwrap();
}

pub struct FinalizeExecutor {
    store: Arc<dyn JobStore>,
    analyzer: Arc<dyn Analyzer>,
}

impl FinalizeExecutor {
    pub fn new(store: Arc<dyn JobStore>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self { store, analyzer }
    }
}

// ============================================================================
// Authority signals
// ============================================================================

fn looks_like_about(page: &CrawledPage) -> bool {
    let path = page.path().to_lowercase();
    let title = page.title.as_deref().unwrap_or_default().to_lowercase();
    ABOUT_HINTS
        .iter()
        .any(|hint| path.contains(hint) || title.contains(&hint.replace('-', " ")))
}

/// About/team-like pages, shallowest first.
pub fn about_pages(pages: &[CrawledPage]) -> Vec<&CrawledPage> {
    let mut about: Vec<&CrawledPage> = pages.iter().filter(|p| looks_like_about(p)).collect();
    about.sort_by_key(|p| (p.path_depth(), p.url.len()));
    about.truncate(MAX_ABOUT_PAGES);
    about
}

/// Pattern-matched signals, one per sentence and kind.
pub fn match_signals(page: &CrawledPage) -> Vec<AuthoritySignal> {
    let text = page.text();
    let mut signals = Vec::new();

    for sentence in SENTENCE.find_iter(&text).map(|m| m.as_str().trim()) {
        for (kind, pattern) in [
            (SignalKind::Credential, &*CREDENTIAL),
            (SignalKind::Award, &*AWARD),
            (SignalKind::Tenure, &*TENURE),
        ] {
            if pattern.is_match(sentence) {
                signals.push(AuthoritySignal {
                    kind,
                    text: sentence.to_string(),
                    source_url: page.url.clone(),
                });
            }
        }
    }
    signals
}

/// Signals from the analysis collaborator's `{"signals": [...]}` judgment.
pub fn parse_signals(value: &serde_json::Value, source_url: &str) -> Result<Vec<AuthoritySignal>, String> {
    let list = value
        .get("signals")
        .and_then(|v| v.as_array())
        .ok_or_else(|| "expected a 'signals' array".to_string())?;

    Ok(list
        .iter()
        .filter_map(|entry| {
            let kind = serde_json::from_value::<SignalKind>(entry.get("kind")?.clone()).ok()?;
            let text = entry.get("text")?.as_str()?.trim();
            (!text.is_empty()).then(|| AuthoritySignal {
                kind,
                text: text.to_string(),
                source_url: source_url.to_string(),
            })
        })
        .collect())
}

/// Merge signal lists, dropping case-insensitive duplicates of (kind, text).
pub fn merge_signals(
    lists: impl IntoIterator<Item = Vec<AuthoritySignal>>,
) -> Vec<AuthoritySignal> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|s| seen.insert((s.kind, s.text.to_lowercase())))
        .collect()
}

// ============================================================================
// Artifact
// ============================================================================

fn kind_label(kind: SignalKind) -> &'static str {
    match kind {
        SignalKind::Credential => "Credential",
        SignalKind::Award => "Award",
        SignalKind::Tenure => "Tenure",
    }
}

/// Render the summary artifact as markdown.
pub fn render_artifact(
    scan: &Scan,
    report: &AuditReport,
    clusters: &[TopicCluster],
    offsite: &[ClusterOffsite],
    signals: &[AuthoritySignal],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}", scan.business_name);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} - overall citation score {}/100 across {} topics.",
        scan.domain,
        report.overall_score,
        clusters.len()
    );

    let _ = writeln!(out, "\n## Topics\n");
    for cluster in clusters {
        let _ = writeln!(
            out,
            "- **{}**: [{}]({}) scored {}/100",
            cluster.topic.name,
            cluster.hub_title.as_deref().unwrap_or(&cluster.hub_url),
            cluster.hub_url,
            cluster.score.total
        );
    }

    let _ = writeln!(out, "\n## Off-site presence\n");
    for cluster in offsite {
        let _ = writeln!(out, "### {}\n", cluster.topic);
        if cluster.items.is_empty() {
            let _ = writeln!(out, "No off-site coverage found.\n");
            continue;
        }
        for item in &cluster.items {
            let _ = writeln!(
                out,
                "- [{}]({}){} - {}/100",
                item.title.as_deref().unwrap_or(&item.url),
                item.url,
                item.platform
                    .as_deref()
                    .map(|p| format!(" ({})", p))
                    .unwrap_or_default(),
                item.total
            );
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Authority\n");
    if signals.is_empty() {
        let _ = writeln!(out, "No authority signals found.");
    }
    for signal in signals {
        let _ = writeln!(out, "- {}: {}", kind_label(signal.kind), signal.text);
    }
    out
}

#[async_trait]
impl StepExecutor for FinalizeExecutor {
    fn step(&self) -> Step {
        Step::Finalize
    }

    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome {
        let outputs = &ctx.job.outputs;
        let (Some(crawl), Some(analysis)) = (outputs.crawl(), outputs.analyze()) else {
            return StepOutcome::fatal("finalize requires crawl and analyze output");
        };
        let offsite = outputs
            .discover()
            .map(|d| d.clusters.clone())
            .unwrap_or_default();

        // Signals
        ctx.progress
            .report_fraction("Extracting authority signals", 0.0)
            .await;
        let about = about_pages(&crawl.pages);
        let matched: Vec<AuthoritySignal> = about.iter().flat_map(|p| match_signals(p)).collect();

        let judged = match about.first() {
            Some(first) => {
                let content = format_authority_content(&ctx.scan.business_name, &about);
                let value = match self.analyzer.analyze(AnalysisTask::Authority, &content).await {
                    Ok(value) => value,
                    Err(e) => return analysis_failure("authority signals", e),
                };
                match parse_signals(&value, &first.url) {
                    Ok(signals) => signals,
                    Err(message) => {
                        return StepOutcome::unknown(format!("authority signals: {}", message))
                    }
                }
            }
            None => Vec::new(),
        };
        let signals = merge_signals([matched, judged]);

        // Report and artifact
        ctx.progress
            .report_fraction("Building audit report", 0.4)
            .await;
        let report = AuditReport::build(
            &ctx.scan.domain,
            &ctx.scan.business_name,
            &analysis.clusters,
            ctx.now,
        );
        let artifact = render_artifact(ctx.scan, &report, &analysis.clusters, &offsite, &signals);

        // Persist
        ctx.progress.report_fraction("Saving results", 0.7).await;
        let results = ScanResults {
            clusters: analysis.clusters.clone(),
            offsite,
            artifact: artifact.clone(),
        };
        // Re-running finalize for the same scan reuses its version.
        let artifact_version = match self.store.save_scan_results(ctx.scan.id, &results).await {
            Ok(version) => version,
            Err(e) => return StepOutcome::transient(format!("saving scan results: {}", e)),
        };

        let counts = report.counts();
        info!(
            job_id = %ctx.job.id,
            scan_id = %ctx.scan.id,
            overall_score = report.overall_score,
            artifact_version,
            signals = signals.len(),
            "scan results saved"
        );

        StepOutcome::Success(StepOutput::Finalize(FinalizeOutput {
            authority_signals: signals,
            artifact_version,
            recommendations: counts,
            artifact,
            report,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::engine::retry::FailureKind;
    use crate::testing::{hub_score_response, sample_scan, sample_site, MockAnalyzer, StepFixture};
    use crate::steps::analyze::parse_hub_score;
    use crate::types::output::{
        AnalyzeOutput, CrawlOutput, StepOutputs, Topic,
    };
    use crate::types::scan::ScanStatus;

    fn ready_outputs() -> StepOutputs {
        let score = parse_hub_score(&hub_score_response([20, 10, 15, 22])).unwrap();
        let mut outputs = StepOutputs::default();
        StepOutput::Crawl(CrawlOutput {
            pages: sample_site(),
            truncated: false,
        })
        .apply_to(&mut outputs);
        StepOutput::Analyze(AnalyzeOutput {
            topics: vec![],
            clusters: vec![TopicCluster {
                topic: Topic {
                    name: "Water heater installation".into(),
                    keywords: vec![],
                },
                hub_url: "https://acme-plumbing.test/services/water-heaters".into(),
                hub_title: Some("Water heater installation".into()),
                relevance: 0.9,
                member_urls: vec![],
                score,
            }],
        })
        .apply_to(&mut outputs);
        outputs
    }

    fn executor(fixture: &StepFixture, analyzer: MockAnalyzer) -> FinalizeExecutor {
        FinalizeExecutor::new(fixture.store.clone(), Arc::new(analyzer))
    }

    #[test]
    fn about_pages_match_path_or_title() {
        let site = sample_site();
        let urls: Vec<&str> = about_pages(&site).iter().map(|p| p.url.as_str()).collect();
        assert_eq!(urls, vec!["https://acme-plumbing.test/about"]);

        let team = vec![CrawledPage::new("https://x.test/people", "").with_title("Meet the team")];
        assert_eq!(about_pages(&team).len(), 1);
    }

    #[test]
    fn pattern_matching_finds_each_kind() {
        let site = sample_site();
        let about = site.iter().find(|p| p.url.ends_with("/about")).unwrap();
        let signals = match_signals(about);

        let kinds: HashSet<SignalKind> = signals.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SignalKind::Credential));
        assert!(kinds.contains(&SignalKind::Award));
        assert!(kinds.contains(&SignalKind::Tenure));
        assert!(signals
            .iter()
            .any(|s| s.kind == SignalKind::Tenure && s.text.contains("since 1998")));
        assert!(signals.iter().all(|s| s.source_url == about.url));
    }

    #[test]
    fn parse_signals_skips_unknown_kinds() {
        let value = serde_json::json!({
            "signals": [
                { "kind": "award", "text": "Best of Metro 2023" },
                { "kind": "vibe", "text": "Friendly" },
                { "kind": "tenure", "text": "  " },
            ]
        });
        let signals = parse_signals(&value, "https://x.test/about").unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Award);
        assert!(parse_signals(&serde_json::json!([]), "u").is_err());
    }

    #[test]
    fn merge_drops_case_insensitive_duplicates() {
        let signal = |kind, text: &str| AuthoritySignal {
            kind,
            text: text.into(),
            source_url: "u".into(),
        };
        let merged = merge_signals([
            vec![signal(SignalKind::Award, "Best of Metro")],
            vec![
                signal(SignalKind::Award, "best of metro"),
                signal(SignalKind::Tenure, "Best of Metro"),
            ],
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[tokio::test]
    async fn saves_results_and_returns_the_report() {
        let fixture = StepFixture::new(sample_scan(), Step::Finalize, ready_outputs())
            .await
            .unwrap();
        let executor = executor(&fixture, MockAnalyzer::standard([20, 10, 15, 22]));

        let StepOutcome::Success(StepOutput::Finalize(output)) = executor.run(&fixture.ctx()).await
        else {
            panic!("expected finalize success");
        };

        assert_eq!(output.artifact_version, 1);
        // gaps 5, 15, 10, 3
        assert_eq!(output.recommendations.high, 1);
        assert_eq!(output.recommendations.medium, 1);
        assert_eq!(output.recommendations.low, 2);
        assert!(!output.authority_signals.is_empty());
        assert_eq!(output.report.overall_score, 67);
        assert!(output.artifact.starts_with("# Acme Plumbing"));
        assert!(output.artifact.contains("overall citation score 67/100"));
        let saved = fixture.store.saved_results(fixture.scan.id).unwrap().unwrap();
        assert_eq!(saved.artifact, output.artifact);

        // Completion belongs to the controller.
        let scan = fixture.store.get_scan(fixture.scan.id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Pending);
        assert!(scan.artifact.is_none());
    }

    #[tokio::test]
    async fn rerun_reuses_the_artifact_version() {
        let fixture = StepFixture::new(sample_scan(), Step::Finalize, ready_outputs())
            .await
            .unwrap();
        let executor = executor(&fixture, MockAnalyzer::standard([20, 10, 15, 22]));

        for _ in 0..2 {
            let StepOutcome::Success(StepOutput::Finalize(output)) =
                executor.run(&fixture.ctx()).await
            else {
                panic!("expected finalize success");
            };
            assert_eq!(output.artifact_version, 1);
        }
        assert_eq!(
            fixture.store.latest_artifact_version(fixture.scan.project_id).unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn analyzer_timeout_is_transient_and_scan_stays_pending() {
        let fixture = StepFixture::new(sample_scan(), Step::Finalize, ready_outputs())
            .await
            .unwrap();
        let analyzer = MockAnalyzer::standard([20, 10, 15, 22]).with_failures(vec![AnalysisError::Timeout]);
        let executor = executor(&fixture, analyzer);

        assert!(matches!(
            executor.run(&fixture.ctx()).await,
            StepOutcome::Retryable {
                kind: FailureKind::Transient,
                ..
            }
        ));
        let scan = fixture.store.get_scan(fixture.scan.id).await.unwrap().unwrap();
        assert_eq!(scan.status, ScanStatus::Pending);
        assert!(fixture.store.saved_results(fixture.scan.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_analysis_is_fatal() {
        let fixture = StepFixture::new(sample_scan(), Step::Finalize, StepOutputs::default())
            .await
            .unwrap();
        let executor = executor(&fixture, MockAnalyzer::new());
        assert!(matches!(executor.run(&fixture.ctx()).await, StepOutcome::Fatal(_)));
    }
}
