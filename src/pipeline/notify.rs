use std::sync::Arc;
use tracing::{info, warn};
use crate::errors::ScanlineError;
use crate::notify::{ChangeMessage, Notifier};

/// Formats and dispatches change messages. Delivery failures go back to the
/// caller; nothing is retried here.
pub struct NotifyStage {
    notifier: Arc<dyn Notifier>,
}

impl NotifyStage {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn channel(&self) -> &str {
        self.notifier.name()
    }

    pub async fn dispatch(&self, message: &ChangeMessage) -> Result<(), ScanlineError> {
        info!(
            channel = self.notifier.name(),
            job_id = %message.job_id,
            digest = %message.image.digest,
            "Dispatching change notification: {}", message.summary()
        );
        self.notifier.notify(message).await.inspect_err(|e| {
            warn!(channel = self.notifier.name(), job_id = %message.job_id, error = %e, "Notification delivery failed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use crate::models::image::ImageRef;
    use crate::pipeline::diff::FindingDiff;

    struct Refusing;

    #[async_trait]
    impl Notifier for Refusing {
        fn name(&self) -> &str {
            "refusing"
        }

        async fn notify(&self, _message: &ChangeMessage) -> Result<(), ScanlineError> {
            Err(ScanlineError::Notification("503".into()))
        }
    }

    fn message() -> ChangeMessage {
        let image = ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: None,
            digest: "sha256:d1".to_string(),
        };
        ChangeMessage::from_diff(image, "job-1", &FindingDiff::default(), Utc::now())
    }

    #[tokio::test]
    async fn test_dispatch_surfaces_failure() {
        let stage = NotifyStage::new(Arc::new(Refusing));
        let err = stage.dispatch(&message()).await.unwrap_err();
        assert!(matches!(err, ScanlineError::Notification(_)));
    }

    #[tokio::test]
    async fn test_dispatch_to_log_channel() {
        let stage = NotifyStage::new(Arc::new(crate::notify::LogNotifier));
        assert_eq!(stage.channel(), "log");
        assert!(stage.dispatch(&message()).await.is_ok());
    }
}
