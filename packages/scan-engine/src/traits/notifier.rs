//! Notification collaborator.
//!
//! Delivery failures are logged by callers and never change job state.

use async_trait::async_trait;

use crate::error::NotifyError;

pub const TEMPLATE_SCAN_COMPLETE: &str = "scan_complete";
pub const TEMPLATE_SCAN_FAILED: &str = "scan_failed";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError>;
}

/// Notifier that drops every message.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(
        &self,
        recipient: &str,
        template_id: &str,
        _data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        tracing::debug!(recipient, template_id, "notification dropped (no notifier configured)");
        Ok(())
    }
}
