use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};
use crate::config::types::RetentionConfig;
use crate::db::{Database, Expiry};
use crate::errors::{FailureClass, RedriveDecision, RedrivePolicy, ScanlineError};
use crate::models::message::{DeadLetter, JobMessage, QueueName};
use crate::queue::{Delivery, MessageQueue};
use super::state::JobState;

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Processed and handed to the next stage.
    Forwarded,
    /// Returned to the queue after a transient failure.
    Redelivered,
    DeadLettered,
    /// Non-retryable failure; the job is `Failed`.
    Failed,
    /// The job had already moved past this stage, or no longer exists.
    Duplicate,
}

pub(crate) struct Redriver<T> {
    pub db: Database,
    pub queue: Arc<dyn MessageQueue<T>>,
    pub queue_name: QueueName,
    /// The job state a delivery of this queue is processed in.
    pub working_state: JobState,
    pub policy: RedrivePolicy,
    pub retention: RetentionConfig,
}

impl<T> Redriver<T>
where
    T: JobMessage + Serialize + Clone + Send + Sync + 'static,
{
    /// A failed ack means the message will come back; the stage treats that
    /// redelivery as a duplicate.
    pub async fn ack(&self, delivery: &Delivery<T>) {
        if let Err(e) = self.queue.ack(&delivery.receipt).await {
            warn!(queue = %self.queue_name, message_id = %delivery.message_id, error = %e, "Ack failed");
        }
    }

    pub async fn drop_duplicate(&self, delivery: &Delivery<T>, state: Option<JobState>) -> Disposition {
        debug!(
            queue = %self.queue_name,
            job_id = %delivery.body.job_id(),
            state = ?state,
            "Duplicate delivery, acknowledging"
        );
        self.ack(delivery).await;
        Disposition::Duplicate
    }

    /// Route a failed delivery by the error's class.
    pub async fn fail(
        &self,
        delivery: &Delivery<T>,
        err: ScanlineError,
        now: DateTime<Utc>,
    ) -> Result<Disposition, ScanlineError> {
        let body = &delivery.body;
        let classification = err.classify();

        match classification.class {
            FailureClass::NonRetryable => {
                warn!(
                    queue = %self.queue_name,
                    job_id = %body.job_id(),
                    digest = %body.digest(),
                    error_type = classification.error_type,
                    error = %err,
                    "Non-retryable failure, failing job"
                );
                self.db.record_job_failure(body.digest(), body.job_id(), &err.to_string(), now)?;
                self.db.close_job(
                    body.digest(),
                    body.job_id(),
                    self.working_state,
                    JobState::Failed,
                    now,
                    Expiry::from_retention(&self.retention, now),
                )?;
                self.ack(delivery).await;
                Ok(Disposition::Failed)
            }
            FailureClass::Persistent => self.dead_letter(delivery, Some(err.to_string()), now).await,
            FailureClass::Transient => {
                let job = self.db.record_job_failure(body.digest(), body.job_id(), &err.to_string(), now)?;
                match self.policy.decide(job.retry_count) {
                    RedriveDecision::Redeliver { delay } => {
                        warn!(
                            queue = %self.queue_name,
                            job_id = %body.job_id(),
                            failures = job.retry_count,
                            max = self.policy.max_receive_count,
                            error_type = classification.error_type,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transient failure, redelivering"
                        );
                        if let Err(e) = self.queue.release(&delivery.receipt, delay).await {
                            warn!(queue = %self.queue_name, error = %e, "Release failed, waiting for visibility timeout");
                        }
                        Ok(Disposition::Redelivered)
                    }
                    RedriveDecision::DeadLetter => self.dead_letter(delivery, Some(err.to_string()), now).await,
                }
            }
        }
    }

    /// Park the delivery in the dead-letter queue and mark the job `DeadLettered`.
    pub async fn dead_letter(
        &self,
        delivery: &Delivery<T>,
        last_error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Disposition, ScanlineError> {
        let body = &delivery.body;
        let letter = DeadLetter {
            message_id: delivery.message_id.clone(),
            queue: self.queue_name,
            job_id: body.job_id().to_string(),
            digest: body.digest().to_string(),
            payload: serde_json::to_value(body)?,
            delivery_count: delivery.receive_count,
            last_error,
            dead_lettered_at: now,
        };

        self.db.dead_letter_job(&letter, self.working_state, now, Expiry::from_retention(&self.retention, now))?;
        error!(
            queue = %self.queue_name,
            job_id = %letter.job_id,
            digest = %letter.digest,
            deliveries = letter.delivery_count,
            error = letter.last_error.as_deref().unwrap_or("receive count exceeded"),
            "Message dead-lettered"
        );
        self.ack(delivery).await;
        Ok(Disposition::DeadLettered)
    }
}
