//! Scan model - one analysis run for a project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::output::{ClusterOffsite, TopicCluster};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "scan_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: Uuid,
    pub project_id: Uuid,
    pub domain: String,
    pub business_name: String,
    /// Where completion and failure notices go.
    pub notification_recipient: Option<String>,
    /// Operator-supplied off-site URLs considered during discovery.
    pub manual_urls: Vec<String>,
    pub status: ScanStatus,
    /// Rendered summary file, set only by a successful finalize.
    pub artifact: Option<String>,
    pub audit_report: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for requesting a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScan {
    pub project_id: Uuid,
    pub domain: String,
    pub business_name: String,
    #[serde(default)]
    pub notification_recipient: Option<String>,
    #[serde(default)]
    pub manual_urls: Vec<String>,
}

impl NewScan {
    pub fn new(project_id: Uuid, domain: impl Into<String>, business_name: impl Into<String>) -> Self {
        Self {
            project_id,
            domain: domain.into(),
            business_name: business_name.into(),
            notification_recipient: None,
            manual_urls: Vec::new(),
        }
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.notification_recipient = Some(recipient.into());
        self
    }

    pub fn with_manual_urls(mut self, urls: Vec<String>) -> Self {
        self.manual_urls = urls;
        self
    }

    pub fn into_scan(self) -> Scan {
        Scan {
            id: Uuid::now_v7(),
            project_id: self.project_id,
            domain: self.domain,
            business_name: self.business_name,
            notification_recipient: self.notification_recipient,
            manual_urls: self.manual_urls,
            status: ScanStatus::Pending,
            artifact: None,
            audit_report: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Per-entity rows written by finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResults {
    pub clusters: Vec<TopicCluster>,
    pub offsite: Vec<ClusterOffsite>,
    pub artifact: String,
}
