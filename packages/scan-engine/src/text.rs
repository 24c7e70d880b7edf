//! Lightweight text matching used by hub selection and off-site scoring.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use url::Url;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z0-9]+").unwrap();
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of",
    "on", "or", "our", "that", "the", "to", "we", "with", "you", "your",
];

/// Lowercased word tokens with stopwords removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Fraction of `keywords` (0.0 to 1.0) that appear in `text`.
///
/// A multi-word keyword counts when every one of its tokens is present.
pub fn keyword_score(keywords: &[String], text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let hits = keywords
        .iter()
        .filter(|kw| {
            let kw_tokens = tokenize(kw);
            !kw_tokens.is_empty() && kw_tokens.iter().all(|t| tokens.contains(t))
        })
        .count();
    hits as f64 / keywords.len() as f64
}

/// Cosine similarity of term-frequency vectors (0.0 to 1.0).
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let tf = |text: &str| {
        let mut counts: HashMap<String, f64> = HashMap::new();
        for token in tokenize(text) {
            *counts.entry(token).or_insert(0.0) += 1.0;
        }
        counts
    };
    let va = tf(a);
    let vb = tf(b);
    if va.is_empty() || vb.is_empty() {
        return 0.0;
    }

    let dot: f64 = va
        .iter()
        .filter_map(|(k, x)| vb.get(k).map(|y| x * y))
        .sum();
    let norm_a = va.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = vb.values().map(|x| x * x).sum::<f64>().sqrt();
    dot / (norm_a * norm_b)
}

/// Host of a URL without a leading `www.`.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Known social and content platforms with an authority weight (0-25).
const PLATFORMS: &[(&str, &str, u8)] = &[
    ("youtube.com", "YouTube", 25),
    ("youtu.be", "YouTube", 25),
    ("linkedin.com", "LinkedIn", 22),
    ("medium.com", "Medium", 20),
    ("reddit.com", "Reddit", 20),
    ("yelp.com", "Yelp", 20),
    ("facebook.com", "Facebook", 18),
    ("instagram.com", "Instagram", 16),
    ("x.com", "X", 16),
    ("twitter.com", "X", 16),
    ("substack.com", "Substack", 18),
    ("tiktok.com", "TikTok", 14),
    ("pinterest.com", "Pinterest", 12),
];

/// A recognized platform: display name and authority weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub name: &'static str,
    pub authority: u8,
}

/// Match a URL's host (or any parent domain) against the platform list.
pub fn platform_for(url: &str) -> Option<Platform> {
    let host = host_of(url)?;
    PLATFORMS
        .iter()
        .find(|(domain, _, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, name, authority)| Platform {
            name,
            authority: *authority,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_drops_stopwords_and_case() {
        assert_eq!(
            tokenize("The Best Roof Repair in Town"),
            vec!["best", "roof", "repair", "town"]
        );
    }

    #[test]
    fn keyword_score_counts_full_phrase_matches() {
        let keywords = vec!["roof repair".to_string(), "gutters".to_string()];
        assert_eq!(keyword_score(&keywords, "Expert repair for every roof"), 0.5);
        assert_eq!(keyword_score(&keywords, "nothing relevant"), 0.0);
        assert_eq!(keyword_score(&[], "anything"), 0.0);
    }

    #[test]
    fn cosine_similarity_bounds() {
        assert!((cosine_similarity("roof repair", "roof repair") - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity("roof", "plumbing"), 0.0);
        assert_eq!(cosine_similarity("", "roof"), 0.0);
    }

    #[test]
    fn platform_matches_subdomains() {
        let p = platform_for("https://www.youtube.com/watch?v=1").unwrap();
        assert_eq!(p.name, "YouTube");
        assert_eq!(platform_for("https://acme.medium.com/post").unwrap().name, "Medium");
        assert!(platform_for("https://notyoutube.com/").is_none());
        assert!(platform_for("not a url").is_none());
    }
}
