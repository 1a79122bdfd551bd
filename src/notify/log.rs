use async_trait::async_trait;
use tracing::info;
use crate::errors::ScanlineError;
use super::{ChangeMessage, Notifier};

/// Writes change messages to the log instead of delivering them.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, message: &ChangeMessage) -> Result<(), ScanlineError> {
        info!(
            image = %message.image,
            digest = %message.image.digest,
            job_id = %message.job_id,
            new = message.new_findings.len(),
            resolved = message.resolved_findings.len(),
            severity_changes = message.severity_changes.len(),
            regressed = message.regressed_findings.len(),
            "Findings changed: {}", message.summary()
        );
        Ok(())
    }
}
