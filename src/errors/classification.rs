use super::types::ScanlineError;

/// Where a failure sits in the pipeline's error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retried through queue redelivery up to the redrive bound.
    Transient,
    /// Needs manual intervention; routed straight to the dead-letter queue.
    Persistent,
    /// The request itself is bad; the job is failed and never requeued.
    NonRetryable,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub class: FailureClass,
}

impl ErrorClassification {
    pub fn retryable(&self) -> bool {
        self.class == FailureClass::Transient
    }
}

impl ScanlineError {
    /// Classify this error to determine its type and how the pipeline reacts to it.
    pub fn classify(&self) -> ErrorClassification {
        use FailureClass::*;

        let (error_type, class) = match self {
            // Transient: redelivered
            ScanlineError::ScannerTimeout(_) => ("ScannerTimeoutError", Transient),
            ScanlineError::RegistryPull(_) => ("RegistryPullError", Transient),
            ScanlineError::Scanner(_) => ("ScannerError", Transient),
            ScanlineError::Throttled(_) => ("ThrottledError", Transient),
            ScanlineError::Network(_) => ("NetworkError", Transient),
            ScanlineError::Queue(_) => ("QueueError", Transient),
            ScanlineError::Notification(_) => ("NotificationError", Transient),
            ScanlineError::Database(_) => ("DatabaseError", Transient),
            ScanlineError::Io(_) => ("IoError", Transient),
            ScanlineError::Internal(_) => ("InternalError", Transient),

            // Persistent: dead-lettered without burning retries
            ScanlineError::WriteConflict(_) => ("WriteConflictError", Persistent),
            ScanlineError::InvalidTransition(_) => ("InvalidTransitionError", Persistent),

            // Non-retryable: job failed immediately
            ScanlineError::Config(_) => ("ConfigError", NonRetryable),
            ScanlineError::InvalidEvent(_) => ("InvalidEventError", NonRetryable),
            ScanlineError::UnknownImage(_) => ("UnknownImageError", NonRetryable),
            ScanlineError::NotFound(_) => ("NotFoundError", NonRetryable),
            ScanlineError::Json(_) => ("JsonError", NonRetryable),
            ScanlineError::Yaml(_) => ("YamlError", NonRetryable),
        };

        ErrorClassification { error_type, class }
    }
}
