use std::time::Duration;
use std::future::Future;

use super::classification::ErrorClassification;
use super::types::ScanlineError;
use tracing::warn;

impl ErrorClassification {
    /// Calculate the retry delay for this error classification based on the
    /// current attempt number (0-indexed).
    ///
    /// - ThrottledError: 30s + (attempt * 10s), capped at 120s
    /// - Default: exponential backoff 2^attempt + random jitter (0-1s), capped at 30s
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        match self.error_type {
            "ThrottledError" => {
                let secs = 30 + (attempt as u64 * 10);
                Duration::from_secs(secs.min(120))
            }
            _ => {
                let base: f64 = 2.0_f64.powi(attempt as i32);
                let jitter: f64 = rand::random::<f64>();
                let secs = (base + jitter).min(30.0);
                Duration::from_secs_f64(secs)
            }
        }
    }
}

/// Retry configuration for in-process operations such as queue publishes.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Upper bound applied to every computed delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Execute an async operation with bounded retry.
///
/// Retries only if the error is classified as transient and we haven't
/// exceeded max_retries.
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut factory: F,
) -> Result<T, ScanlineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScanlineError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut last_error = None;

    for attempt in 0..max_attempts {
        match factory().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let classification = e.classify();

                if !classification.retryable() || attempt + 1 >= max_attempts {
                    if !classification.retryable() {
                        warn!(
                            operation = operation_name,
                            error_type = classification.error_type,
                            "Non-retryable error, failing immediately"
                        );
                    } else {
                        warn!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            max = max_attempts,
                            "Max retries exhausted"
                        );
                    }
                    return Err(e);
                }

                let delay = classification.retry_delay(attempt).min(config.max_delay);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = max_attempts,
                    error_type = classification.error_type,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after error"
                );

                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| ScanlineError::Internal("Retry loop exited unexpectedly".into())))
}

/// What a stage does with a message whose processing failed transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedriveDecision {
    /// Return the message to its queue, visible again after `delay`.
    Redeliver { delay: Duration },
    /// Move the message to the stage's dead-letter queue.
    DeadLetter,
}

/// Dead-letter policy driven by the failure counter stored on the job record,
/// independent of any queue transport.
#[derive(Debug, Clone, Copy)]
pub struct RedrivePolicy {
    pub max_receive_count: u32,
    pub redelivery_delay: Duration,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            max_receive_count: 3,
            redelivery_delay: Duration::from_secs(30),
        }
    }
}

impl RedrivePolicy {
    /// `failures` is the job's retry count including the failure just observed.
    pub fn decide(&self, failures: u32) -> RedriveDecision {
        if failures >= self.max_receive_count {
            RedriveDecision::DeadLetter
        } else {
            RedriveDecision::Redeliver { delay: self.redelivery_delay }
        }
    }

    /// A delivery that already exceeds the budget (implicit redelivery after a
    /// crash or visibility timeout) must not be processed again.
    pub fn exhausted(&self, receive_count: u32) -> bool {
        receive_count > self.max_receive_count
    }
}
