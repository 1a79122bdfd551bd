use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use crate::config::types::{QueueConfig, RetentionConfig, ScannerConfig};
use crate::db::Database;
use crate::errors::ScanlineError;
use crate::models::finding::RawFinding;
use crate::models::message::{InspectRequest, QueueName, ScanRequest};
use crate::queue::{Delivery, MessageQueue};
use crate::scanner::ScanEngine;
use super::redrive::{Disposition, Redriver};
use super::state::JobState;

/// Runs the scanning engine for one scan request at a time.
pub struct ScanStage {
    engine: Arc<dyn ScanEngine>,
    inspect_queue: Arc<dyn MessageQueue<InspectRequest>>,
    engine_timeout: Duration,
    redriver: Redriver<ScanRequest>,
}

impl ScanStage {
    pub fn new(
        db: Database,
        engine: Arc<dyn ScanEngine>,
        scan_queue: Arc<dyn MessageQueue<ScanRequest>>,
        inspect_queue: Arc<dyn MessageQueue<InspectRequest>>,
        queue_config: &QueueConfig,
        scanner: &ScannerConfig,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            engine,
            inspect_queue,
            engine_timeout: scanner.timeout(),
            redriver: Redriver {
                db,
                queue: scan_queue,
                queue_name: QueueName::Scan,
                working_state: JobState::Scanning,
                policy: queue_config.redrive(),
                retention,
            },
        }
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue<ScanRequest>> {
        &self.redriver.queue
    }

    /// Process one delivery. Safe to call again for the same message.
    pub async fn handle(&self, delivery: Delivery<ScanRequest>, now: DateTime<Utc>) -> Result<Disposition, ScanlineError> {
        let db = &self.redriver.db;
        let request = &delivery.body;

        let job = match db.get_job(&request.digest, &request.job_id)? {
            Some(job) => job,
            None => return Ok(self.redriver.drop_duplicate(&delivery, None).await),
        };

        match job.state {
            JobState::Pending => {
                db.transition_job(&request.digest, &request.job_id, JobState::Pending, JobState::Scanning, now, None)?;
            }
            JobState::Scanning => {
                debug!(job_id = %job.job_id, receive_count = delivery.receive_count, "Resuming scan after redelivery");
            }
            other => return Ok(self.redriver.drop_duplicate(&delivery, Some(other)).await),
        }

        if self.redriver.policy.exhausted(delivery.receive_count) {
            return self.redriver.dead_letter(&delivery, job.last_error.clone(), now).await;
        }

        info!(
            job_id = %request.job_id,
            image = %request.image,
            engine = self.engine.name(),
            attempt = delivery.receive_count,
            "Scanning image"
        );

        let raw = match tokio::time::timeout(self.engine_timeout, self.engine.scan(&request.image)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.redriver.fail(&delivery, e, now).await,
            Err(_) => {
                let err = ScanlineError::ScannerTimeout(format!(
                    "{} exceeded {}s", request.image, self.engine_timeout.as_secs()
                ));
                return self.redriver.fail(&delivery, err, now).await;
            }
        };

        let count = raw.len();
        if let Err(e) = self.forward(request, raw, now).await {
            return self.redriver.fail(&delivery, e, now).await;
        }

        // Inspect may already have advanced the job if it picked the result up first
        match db.transition_job(&request.digest, &request.job_id, JobState::Scanning, JobState::Inspecting, now, None) {
            Ok(_) | Err(ScanlineError::WriteConflict(_)) => {}
            Err(e) => return Err(e),
        }

        info!(job_id = %request.job_id, digest = %request.digest, raw_findings = count, "Scan complete");
        self.redriver.ack(&delivery).await;
        Ok(Disposition::Forwarded)
    }

    async fn forward(&self, request: &ScanRequest, raw: Vec<RawFinding>, now: DateTime<Utc>) -> Result<(), ScanlineError> {
        self.redriver.db.mark_image_scanned(&request.digest, now)?;
        let message_id = self.inspect_queue.send(InspectRequest {
            job_id: request.job_id.clone(),
            digest: request.digest.clone(),
            image: request.image.clone(),
            raw_findings: raw,
            scanned_at: now,
        }).await?;
        debug!(job_id = %request.job_id, message_id = %message_id, "Inspect request published");
        Ok(())
    }
}
