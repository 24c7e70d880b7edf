//! Audit report emitted alongside the summary artifact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::output::{Dimension, RecommendationCounts, TopicCluster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Bucket a dimension's gap from its maximum. A zero gap needs no work.
    pub fn for_gap(gap: u8) -> Option<Self> {
        match gap {
            0 => None,
            1..=7 => Some(Priority::Low),
            8..=14 => Some(Priority::Medium),
            _ => Some(Priority::High),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub topic: String,
    pub hub_url: String,
    pub dimension: Dimension,
    pub gap: u8,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub domain: String,
    pub business_name: String,
    /// Mean hub total across clusters, 0-100.
    pub overall_score: u8,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
}

impl AuditReport {
    /// Build the report from scored clusters, highest priority first.
    pub fn build(
        domain: &str,
        business_name: &str,
        clusters: &[TopicCluster],
        generated_at: DateTime<Utc>,
    ) -> Self {
        let mut recommendations = Vec::new();

        for cluster in clusters {
            for dim in &cluster.score.dimensions {
                let gap = dim.gap();
                let Some(priority) = Priority::for_gap(gap) else {
                    continue;
                };
                let text = dim.recommendations.first().cloned().unwrap_or_else(|| {
                    format!(
                        "Improve {} on {}",
                        dim.dimension.label().to_lowercase(),
                        cluster.hub_url
                    )
                });
                recommendations.push(Recommendation {
                    priority,
                    topic: cluster.topic.name.clone(),
                    hub_url: cluster.hub_url.clone(),
                    dimension: dim.dimension,
                    gap,
                    text,
                });
            }
        }

        recommendations.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.gap.cmp(&a.gap)));

        let overall_score = if clusters.is_empty() {
            0
        } else {
            let sum: u32 = clusters.iter().map(|c| c.score.total as u32).sum();
            (sum / clusters.len() as u32) as u8
        };

        Self {
            domain: domain.to_string(),
            business_name: business_name.to_string(),
            overall_score,
            recommendations,
            generated_at,
        }
    }

    pub fn counts(&self) -> RecommendationCounts {
        let mut counts = RecommendationCounts::default();
        for rec in &self.recommendations {
            match rec.priority {
                Priority::High => counts.high += 1,
                Priority::Medium => counts.medium += 1,
                Priority::Low => counts.low += 1,
            }
        }
        counts
    }
}
