//! Analysis collaborator.
//!
//! The engine only knows three kinds of judgment. The prompt text for each
//! lives in [`crate::prompts`]; the collaborator returns structured JSON the
//! step executors validate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::prompts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisTask {
    /// Business-priority topics from homepage and services content.
    Topics,
    /// Four-dimension citation score for one hub page.
    HubScore,
    /// Credentials, awards and tenure from about/team content.
    Authority,
}

impl AnalysisTask {
    pub fn prompt(&self) -> &'static str {
        match self {
            AnalysisTask::Topics => prompts::TOPICS_PROMPT,
            AnalysisTask::HubScore => prompts::HUB_SCORE_PROMPT,
            AnalysisTask::Authority => prompts::AUTHORITY_PROMPT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisTask::Topics => "topics",
            AnalysisTask::HubScore => "hub_score",
            AnalysisTask::Authority => "authority",
        }
    }
}

/// Returns a structured judgment for content under a task's prompt.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(
        &self,
        task: AnalysisTask,
        content: &str,
    ) -> Result<serde_json::Value, AnalysisError>;
}
