use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use crate::config::ScanlineConfig;
use crate::db::{Database, Expiry};
use crate::errors::ScanlineError;
use crate::models::message::{InspectRequest, QueueName, ScanRequest};
use crate::notify::Notifier;
use crate::queue::{MemoryQueue, MessageQueue};
use crate::scanner::ScanEngine;
use super::ingest::{IngestOutcome, IngestStage, IngestTrigger, TriggerEvent};
use super::inspect::InspectStage;
use super::notify::NotifyStage;
use super::reconcile::{ChangeSignal, ReconcileStage, SweepReport};
use super::scan::ScanStage;
use super::state::JobState;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub queue: QueueName,
    pub ready: usize,
    pub in_flight: usize,
    pub dead_letters: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    /// Pending or Scanning jobs whose scan request was sent again.
    pub republished: usize,
    /// Inspecting jobs failed and resubmitted; their raw result was only in memory.
    pub restarted: usize,
}

/// Wires the queues and stages together and runs one worker task per stage.
pub struct PipelineRuntime {
    db: Database,
    config: ScanlineConfig,
    scan_queue: Arc<MemoryQueue<ScanRequest>>,
    inspect_queue: Arc<MemoryQueue<InspectRequest>>,
    ingest: Arc<IngestStage>,
    scan: Arc<ScanStage>,
    inspect: Arc<InspectStage>,
    reconcile: Arc<ReconcileStage>,
    changes: Mutex<Option<mpsc::Receiver<ChangeSignal>>>,
}

impl PipelineRuntime {
    pub fn new(
        db: Database,
        config: ScanlineConfig,
        engine: Arc<dyn ScanEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let scan_queue = Arc::new(MemoryQueue::new(
            QueueName::Scan.as_str(),
            config.queues.scan.policy().visibility_timeout,
        ));
        let inspect_queue = Arc::new(MemoryQueue::new(
            QueueName::Inspect.as_str(),
            config.queues.inspect.policy().visibility_timeout,
        ));
        let (changes_tx, changes_rx) = mpsc::channel(CHANGE_CHANNEL_CAPACITY);

        let ingest = IngestStage::new(db.clone(), scan_queue.clone(), &config.ingest);
        let scan = ScanStage::new(
            db.clone(),
            engine,
            scan_queue.clone(),
            inspect_queue.clone(),
            &config.queues.scan,
            &config.scanner,
            config.retention.clone(),
        );
        let inspect = InspectStage::new(
            db.clone(),
            inspect_queue.clone(),
            &config.queues.inspect,
            &config.inspect,
            config.retention.clone(),
            Some(changes_tx),
        );
        let reconcile = ReconcileStage::new(
            db.clone(),
            NotifyStage::new(notifier),
            config.schedule.clone(),
            config.retention.clone(),
        );

        Self {
            db,
            config,
            scan_queue,
            inspect_queue,
            ingest: Arc::new(ingest),
            scan: Arc::new(scan),
            inspect: Arc::new(inspect),
            reconcile: Arc::new(reconcile),
            changes: Mutex::new(Some(changes_rx)),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn ingest(&self) -> &IngestStage {
        &self.ingest
    }

    pub fn reconcile(&self) -> &ReconcileStage {
        &self.reconcile
    }

    /// Route a decoded trigger to ingest, or to the rescan pass for schedule events.
    pub async fn ingest_event(&self, event: &TriggerEvent, now: DateTime<Utc>) -> Result<Vec<IngestOutcome>, ScanlineError> {
        match event {
            TriggerEvent::Push { images, .. } => self.ingest.handle(&IngestTrigger::Push(images.clone()), now).await,
            TriggerEvent::Schedule { .. } => self.run_rescan(now).await,
            TriggerEvent::Ignored { reason } => {
                warn!(reason = %reason, "Ignoring trigger event");
                Ok(Vec::new())
            }
        }
    }

    /// Hand every image due for rescanning to ingest.
    pub async fn run_rescan(&self, now: DateTime<Utc>) -> Result<Vec<IngestOutcome>, ScanlineError> {
        let due = self.reconcile.rescan_due(now)?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        info!(images = due.len(), "Triggering rescan");
        self.ingest.handle(&IngestTrigger::Rescan(due), now).await
    }

    pub async fn queue_status(&self) -> Result<Vec<QueueStatus>, ScanlineError> {
        let scan = self.scan_queue.depth().await;
        let inspect = self.inspect_queue.depth().await;
        Ok(vec![
            QueueStatus {
                queue: QueueName::Scan,
                ready: scan.ready,
                in_flight: scan.in_flight,
                dead_letters: self.db.dead_letter_depth(QueueName::Scan)?,
            },
            QueueStatus {
                queue: QueueName::Inspect,
                ready: inspect.ready,
                in_flight: inspect.in_flight,
                dead_letters: self.db.dead_letter_depth(QueueName::Inspect)?,
            },
        ])
    }

    /// Resume jobs left open by a previous process. The queues are in memory,
    /// so every open job lost its message.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport, ScanlineError> {
        let mut report = RecoveryReport::default();

        for state in [JobState::Pending, JobState::Scanning] {
            for job in self.db.jobs_by_state(state)? {
                match self.ingest.publish(&job, now).await {
                    Ok(()) => report.republished += 1,
                    Err(e) => warn!(job_id = %job.job_id, error = %e, "Recovery publish failed"),
                }
            }
        }

        for job in self.db.jobs_by_state(JobState::Inspecting)? {
            self.db.record_job_failure(&job.digest, &job.job_id, "raw scan result lost on restart", now)?;
            self.db.close_job(
                &job.digest,
                &job.job_id,
                JobState::Inspecting,
                JobState::Failed,
                now,
                Expiry::from_retention(&self.config.retention, now),
            )?;
            self.ingest.submit(&job.image, job.requested_by, now).await?;
            report.restarted += 1;
        }

        if report.republished > 0 || report.restarted > 0 {
            info!(republished = report.republished, restarted = report.restarted, "Recovered open jobs");
        }
        Ok(report)
    }

    /// Spawn the stage workers. Callable once.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, ScanlineError> {
        let changes = self.changes
            .lock()
            .map_err(|_| ScanlineError::Internal("runtime lock poisoned".into()))?
            .take()
            .ok_or_else(|| ScanlineError::Internal("pipeline runtime already started".into()))?;

        info!(
            scan_visibility_secs = self.config.queues.scan.visibility_timeout_secs,
            reconcile_interval_secs = self.config.schedule.reconcile_interval_secs,
            rescan_interval_secs = self.config.schedule.rescan_interval_secs,
            "Starting pipeline workers"
        );

        Ok(vec![
            tokio::spawn(self.clone().scan_worker(cancel.clone())),
            tokio::spawn(self.clone().inspect_worker(cancel.clone())),
            tokio::spawn(self.clone().reconcile_worker(changes, cancel.clone())),
            tokio::spawn(self.clone().rescan_worker(cancel)),
        ])
    }

    async fn scan_worker(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = self.scan.queue().receive() => delivery,
            };
            match delivery {
                Ok(delivery) => {
                    let job_id = delivery.body.job_id.clone();
                    if let Err(e) = self.scan.handle(delivery, Utc::now()).await {
                        error!(job_id = %job_id, error = %e, "Scan stage error, message left for redelivery");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Scan queue receive failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("Scan worker stopped");
    }

    async fn inspect_worker(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = self.inspect.queue().receive() => delivery,
            };
            match delivery {
                Ok(delivery) => {
                    let job_id = delivery.body.job_id.clone();
                    if let Err(e) = self.inspect.handle(delivery, Utc::now()).await {
                        error!(job_id = %job_id, error = %e, "Inspect stage error, message left for redelivery");
                    }
                }
                Err(e) => {
                    error!(error = %e, "Inspect queue receive failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
        info!("Inspect worker stopped");
    }

    async fn reconcile_worker(self: Arc<Self>, mut changes: mpsc::Receiver<ChangeSignal>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.schedule.reconcile_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(signal) = changes.recv() => {
                    if let Err(e) = self.reconcile.reconcile_job(&signal.digest, &signal.job_id, Utc::now()).await {
                        error!(job_id = %signal.job_id, error = %e, "Reconcile failed, left for the sweep");
                    }
                }
                _ = ticker.tick() => {
                    match self.reconcile.sweep(Utc::now()).await {
                        Ok(SweepReport { errors, .. }) if errors > 0 => warn!(errors, "Reconcile sweep finished with errors"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Reconcile sweep failed"),
                    }
                }
            }
        }
        info!("Reconcile worker stopped");
    }

    async fn rescan_worker(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.schedule.rescan_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_rescan(Utc::now()).await {
                        error!(error = %e, "Rescan trigger failed");
                    }
                }
            }
        }
        info!("Rescan worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::models::finding::RawFinding;
    use crate::models::image::ImageRef;
    use crate::models::job::ScanJob;
    use crate::notify::LogNotifier;
    use crate::pipeline::state::Trigger;

    struct CleanEngine;

    #[async_trait]
    impl ScanEngine for CleanEngine {
        fn name(&self) -> &str {
            "clean"
        }

        async fn scan(&self, _image: &ImageRef) -> Result<Vec<RawFinding>, ScanlineError> {
            Ok(vec![])
        }
    }

    fn runtime(db: &Database) -> Arc<PipelineRuntime> {
        Arc::new(PipelineRuntime::new(
            db.clone(),
            ScanlineConfig::default(),
            Arc::new(CleanEngine),
            Arc::new(LogNotifier),
        ))
    }

    fn image(digest: &str) -> ImageRef {
        ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: None,
            digest: digest.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ignored_event_produces_nothing() {
        let db = Database::in_memory().unwrap();
        let rt = runtime(&db);
        let outcomes = rt
            .ingest_event(&TriggerEvent::Ignored { reason: "DeleteImage".into() }, Utc::now())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
        assert!(db.list_images().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_event_rescans_due_images() {
        let db = Database::in_memory().unwrap();
        let rt = runtime(&db);
        let now = Utc::now();
        db.upsert_image(&image("sha256:d1"), now, None).unwrap();

        let outcomes = rt.ingest_event(&TriggerEvent::Schedule { fired_at: Some(now) }, now).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], IngestOutcome::Enqueued { .. }));
        let job = db.open_job("sha256:d1").unwrap().unwrap();
        assert_eq!(job.requested_by, Trigger::ScheduledRescan);
    }

    #[tokio::test]
    async fn test_recover_republishes_and_restarts() {
        let db = Database::in_memory().unwrap();
        let rt = runtime(&db);
        let now = Utc::now();

        db.upsert_image(&image("sha256:pending"), now, None).unwrap();
        db.create_job(&ScanJob::new(&image("sha256:pending"), Trigger::RegistryPush, now)).unwrap();

        db.upsert_image(&image("sha256:inspecting"), now, None).unwrap();
        let stuck = ScanJob::new(&image("sha256:inspecting"), Trigger::RegistryPush, now);
        db.create_job(&stuck).unwrap();
        db.transition_job("sha256:inspecting", &stuck.job_id, JobState::Pending, JobState::Scanning, now, None).unwrap();
        db.transition_job("sha256:inspecting", &stuck.job_id, JobState::Scanning, JobState::Inspecting, now, None).unwrap();

        let report = rt.recover(now).await.unwrap();
        assert_eq!(report, RecoveryReport { republished: 1, restarted: 1 });

        let old = db.get_job("sha256:inspecting", &stuck.job_id).unwrap().unwrap();
        assert_eq!(old.state, JobState::Failed);
        let fresh = db.open_job("sha256:inspecting").unwrap().unwrap();
        assert_ne!(fresh.job_id, stuck.job_id);
        assert_eq!(fresh.state, JobState::Pending);

        let status = rt.queue_status().await.unwrap();
        assert_eq!(status[0].queue, QueueName::Scan);
        assert_eq!(status[0].ready, 2);
    }

    #[tokio::test]
    async fn test_start_twice_is_an_error() {
        let db = Database::in_memory().unwrap();
        let rt = runtime(&db);
        let cancel = CancellationToken::new();
        let handles = rt.start(cancel.clone()).unwrap();
        assert!(rt.start(cancel.clone()).is_err());
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
