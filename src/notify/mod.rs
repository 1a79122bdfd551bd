pub mod log;
pub mod webhook;

pub use self::log::LogNotifier;
pub use webhook::WebhookNotifier;

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use crate::config::credentials::{redact_url, resolve_webhook_url};
use crate::config::types::{NotifierConfig, NotifierKind};
use crate::errors::ScanlineError;
use crate::models::finding::Finding;
use crate::models::image::ImageRef;
use crate::pipeline::diff::{FindingDiff, SeverityChange};

/// Notification payload describing what changed for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMessage {
    pub image: ImageRef,
    pub job_id: String,
    pub new_findings: Vec<Finding>,
    pub resolved_findings: Vec<Finding>,
    pub severity_changes: Vec<SeverityChange>,
    pub regressed_findings: Vec<Finding>,
    pub detected_at: DateTime<Utc>,
}

impl ChangeMessage {
    pub fn from_diff(image: ImageRef, job_id: &str, diff: &FindingDiff, detected_at: DateTime<Utc>) -> Self {
        Self {
            image,
            job_id: job_id.to_string(),
            new_findings: diff.new.clone(),
            resolved_findings: diff.resolved.clone(),
            severity_changes: diff.severity_changes.clone(),
            regressed_findings: diff.regressed.clone(),
            detected_at,
        }
    }

    /// One-line human summary, e.g. "2 new, 1 resolved".
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.new_findings.is_empty() {
            parts.push(format!("{} new", self.new_findings.len()));
        }
        if !self.regressed_findings.is_empty() {
            parts.push(format!("{} regressed", self.regressed_findings.len()));
        }
        if !self.severity_changes.is_empty() {
            parts.push(format!("{} severity changes", self.severity_changes.len()));
        }
        if !self.resolved_findings.is_empty() {
            parts.push(format!("{} resolved", self.resolved_findings.len()));
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// The notification delivery channel seam.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, message: &ChangeMessage) -> Result<(), ScanlineError>;
}

/// Build the configured notification channel.
pub fn create_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, ScanlineError> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Webhook => {
            let url = resolve_webhook_url(config.webhook_url.as_deref()).ok_or_else(|| {
                ScanlineError::Config("notifier.kind is webhook but no webhook URL is set".into())
            })?;
            info!(url = %redact_url(&url), "Using webhook notifier");
            Ok(Arc::new(WebhookNotifier::new(&url, Duration::from_secs(config.timeout_secs))?))
        }
    }
}
