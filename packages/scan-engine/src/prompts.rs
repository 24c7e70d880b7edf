//! Prompts and content framing for the analysis collaborator.
//!
//! The `*_PROMPT` constants are sent as instructions; the `format_*`
//! helpers build the content half of each request.

use crate::types::page::CrawledPage;

/// Prompt for deriving business-priority topics.
pub const TOPICS_PROMPT: &str = r#"You are reviewing a small business website.

From the homepage and services content, identify the 3-6 topics this business
most wants to be found for. Prefer concrete services over generic themes.

Output JSON:
{
    "topics": [
        { "name": "short topic name", "keywords": ["keyword", "keyword"] }
    ]
}"#;

/// Prompt for scoring one hub page across four dimensions.
pub const HUB_SCORE_PROMPT: &str = r#"Score this page as a source an AI assistant would cite when answering questions about the topic.

Score each dimension from 0 to 25:
- content_depth: completeness and specificity of the information
- structured_clarity: headings, lists, direct answers to likely questions
- authority_signals: credentials, experience, evidence of expertise
- citation_readiness: quotable facts, figures, clear attribution

Output JSON:
{
    "content_depth": { "score": 0, "issues": ["..."], "recommendations": ["..."] },
    "structured_clarity": { "score": 0, "issues": ["..."], "recommendations": ["..."] },
    "authority_signals": { "score": 0, "issues": ["..."], "recommendations": ["..."] },
    "citation_readiness": { "score": 0, "issues": ["..."], "recommendations": ["..."] }
}"#;

/// Prompt for extracting authority signals.
pub const AUTHORITY_PROMPT: &str = r#"List the authority signals stated on these about/team pages.

Only include what the text states. Do not infer.
- credential: licenses, certifications, degrees, memberships
- award: awards, rankings, recognitions
- tenure: years in business, founding year, years of experience

Output JSON:
{
    "signals": [
        { "kind": "credential" | "award" | "tenure", "text": "verbatim or close paraphrase" }
    ]
}"#;

/// Per-page excerpt cap when several pages share one request.
const EXCERPT_CHARS: usize = 2_000;

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn format_pages(pages: &[&CrawledPage]) -> String {
    pages
        .iter()
        .map(|p| format!("## {}\n{}", p.url, truncate(&p.text(), EXCERPT_CHARS)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_topics_content(business_name: &str, pages: &[&CrawledPage]) -> String {
    format!("Business: {}\n\n{}", business_name, format_pages(pages))
}

pub fn format_hub_content(topic: &str, page: &CrawledPage) -> String {
    format!(
        "Topic: {}\nURL: {}\n\n{}",
        topic,
        page.url,
        truncate(&page.text(), EXCERPT_CHARS * 2)
    )
}

pub fn format_authority_content(business_name: &str, pages: &[&CrawledPage]) -> String {
    format!("Business: {}\n\n{}", business_name, format_pages(pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }

    #[test]
    fn test_format_topics_content() {
        let home = CrawledPage::new("https://acme.test/", "We fix roofs").with_title("Acme");
        let content = format_topics_content("Acme Roofing", &[&home]);
        assert!(content.starts_with("Business: Acme Roofing"));
        assert!(content.contains("## https://acme.test/"));
        assert!(content.contains("We fix roofs"));
    }
}
