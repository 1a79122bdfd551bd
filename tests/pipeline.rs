use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use scanline::config::{IngestConfig, InspectConfig, QueueConfig, RetentionConfig, ScanlineConfig, ScannerConfig, ScheduleConfig};
use scanline::db::Database;
use scanline::errors::ScanlineError;
use scanline::models::finding::{FindingKey, RawFinding};
use scanline::models::image::ImageRef;
use scanline::models::message::{InspectRequest, QueueName, ScanRequest};
use scanline::notify::{ChangeMessage, Notifier};
use scanline::pipeline::{
    Disposition, IngestOutcome, IngestStage, IngestTrigger, InspectStage, JobState, NotifyStage,
    PipelineRuntime, ReconcileOutcome, ReconcileStage, ScanStage, TriggerEvent,
};
use scanline::queue::{MemoryQueue, MessageQueue};
use scanline::scanner::ScanEngine;
use tokio_util::sync::CancellationToken;

/// Engine answering from a fixed table; unknown digests time out.
#[derive(Default)]
struct StubEngine {
    results: HashMap<String, Vec<RawFinding>>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ScanEngine for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    async fn scan(&self, image: &ImageRef) -> Result<Vec<RawFinding>, ScanlineError> {
        self.calls.lock().unwrap().push(image.digest.clone());
        self.results
            .get(&image.digest)
            .cloned()
            .ok_or_else(|| ScanlineError::ScannerTimeout(format!("{} took too long", image.digest)))
    }
}

#[derive(Default, Clone)]
struct RecordingNotifier {
    messages: Arc<Mutex<Vec<ChangeMessage>>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn notify(&self, message: &ChangeMessage) -> Result<(), ScanlineError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }
}

fn raw(vuln: &str, pkg: &str, severity: &str) -> RawFinding {
    RawFinding {
        vuln_id: vuln.to_string(),
        package: pkg.to_string(),
        pkg_source: None,
        installed_version: Some("1.0.0".to_string()),
        fixed_version: None,
        severity: severity.to_string(),
        title: None,
        reference: None,
    }
}

fn image(digest: &str) -> ImageRef {
    ImageRef {
        registry: "registry.example.com".to_string(),
        repository: "team/app".to_string(),
        tag: Some("v1".to_string()),
        digest: digest.to_string(),
    }
}

struct Harness {
    db: Database,
    scan_queue: Arc<MemoryQueue<ScanRequest>>,
    inspect_queue: Arc<MemoryQueue<InspectRequest>>,
    ingest: IngestStage,
    scan: ScanStage,
    inspect: InspectStage,
    reconcile: ReconcileStage,
    notifier: RecordingNotifier,
}

fn harness(engine: StubEngine) -> Harness {
    harness_with_retention(engine, RetentionConfig::default())
}

fn harness_with_retention(engine: StubEngine, retention: RetentionConfig) -> Harness {
    let db = Database::in_memory().unwrap();
    let scan_queue = Arc::new(MemoryQueue::new("scan", Duration::from_secs(300)));
    let inspect_queue = Arc::new(MemoryQueue::new("inspect", Duration::from_secs(300)));
    let queue_config = QueueConfig { redelivery_delay_secs: 0, ..Default::default() };
    let notifier = RecordingNotifier::default();

    Harness {
        ingest: IngestStage::new(db.clone(), scan_queue.clone(), &IngestConfig::default()),
        scan: ScanStage::new(
            db.clone(),
            Arc::new(engine),
            scan_queue.clone(),
            inspect_queue.clone(),
            &queue_config,
            &ScannerConfig::default(),
            retention.clone(),
        ),
        inspect: InspectStage::new(
            db.clone(),
            inspect_queue.clone(),
            &queue_config,
            &InspectConfig::default(),
            retention.clone(),
            None,
        ),
        reconcile: ReconcileStage::new(
            db.clone(),
            NotifyStage::new(Arc::new(notifier.clone())),
            ScheduleConfig::default(),
            retention.clone(),
        ),
        db,
        scan_queue,
        inspect_queue,
        notifier,
    }
}

fn job_id(outcome: &IngestOutcome) -> String {
    match outcome {
        IngestOutcome::Enqueued { job_id, .. }
        | IngestOutcome::Republished { job_id, .. }
        | IngestOutcome::Deduplicated { job_id, .. }
        | IngestOutcome::PublishFailed { job_id, .. } => job_id.clone(),
    }
}

#[tokio::test]
async fn test_end_to_end_success() {
    let mut engine = StubEngine::default();
    engine.results.insert("sha256:d1".to_string(), vec![
        raw("CVE-2024-0001", "openssl", "HIGH"),
        raw("CVE-2024-0002", "zlib", "LOW"),
    ]);
    let h = harness(engine);
    let now = Utc::now();

    let outcomes = h.ingest.handle(&IngestTrigger::Push(vec![image("sha256:d1")]), now).await.unwrap();
    let id = job_id(&outcomes[0]);
    assert_eq!(h.db.get_job("sha256:d1", &id).unwrap().unwrap().state, JobState::Pending);

    let delivery = h.scan_queue.receive().await.unwrap();
    assert_eq!(h.scan.handle(delivery, now).await.unwrap(), Disposition::Forwarded);
    let job = h.db.get_job("sha256:d1", &id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Inspecting);
    assert!(job.expires_at.is_none());

    let delivery = h.inspect_queue.receive().await.unwrap();
    assert_eq!(h.inspect.handle(delivery, now).await.unwrap(), Disposition::Forwarded);
    let job = h.db.get_job("sha256:d1", &id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Reconciled);
    assert!(job.expires_at.is_none());

    let outcome = h.reconcile.reconcile_job("sha256:d1", &id, now).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Notified { delivered: true, .. }));
    let job = h.db.get_job("sha256:d1", &id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Notified);
    assert!(job.expires_at.is_some());

    let messages = h.notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].new_findings.len(), 2);
    assert_eq!(messages[0].image.digest, "sha256:d1");

    let image = h.db.get_image("sha256:d1").unwrap().unwrap();
    assert_eq!(image.scan_status, Some(JobState::Notified));

    let report = h.db.latest_scan_report("sha256:d1").unwrap().unwrap();
    assert_eq!(report.job_id, id);
    assert_eq!(report.total, 2);
    let exposures = h.db.exposures_for_vuln("CVE-2024-0001").unwrap();
    assert_eq!(exposures.len(), 1);
    assert_eq!(exposures[0].image.digest, "sha256:d1");
}

#[tokio::test]
async fn test_end_to_end_dead_letter_after_three_timeouts() {
    let h = harness(StubEngine::default());
    let now = Utc::now();

    let outcomes = h.ingest.handle(&IngestTrigger::Push(vec![image("sha256:d2")]), now).await.unwrap();
    let id = job_id(&outcomes[0]);

    let mut dispositions = Vec::new();
    for _ in 0..3 {
        let delivery = h.scan_queue.receive().await.unwrap();
        dispositions.push(h.scan.handle(delivery, now).await.unwrap());
    }
    assert_eq!(dispositions, vec![Disposition::Redelivered, Disposition::Redelivered, Disposition::DeadLettered]);

    let job = h.db.get_job("sha256:d2", &id).unwrap().unwrap();
    assert_eq!(job.state, JobState::DeadLettered);
    let letters = h.db.dead_letters(QueueName::Scan).unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].delivery_count, 3);
    assert_eq!(letters[0].payload["digest"], "sha256:d2");
    assert_eq!(h.inspect_queue.depth().await.ready, 0);
    assert_eq!(h.scan_queue.depth().await.ready, 0);
    assert!(h.db.findings_for_digest("sha256:d2").unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_push_while_in_flight_is_deduplicated() {
    let h = harness(StubEngine::default());
    let now = Utc::now();

    h.ingest.handle(&IngestTrigger::Push(vec![image("sha256:d1")]), now).await.unwrap();
    let delivery = h.scan_queue.receive().await.unwrap();
    drop(delivery);

    let again = h.ingest.handle(&IngestTrigger::Push(vec![image("sha256:d1")]), now).await.unwrap();
    assert!(matches!(again[0], IngestOutcome::Deduplicated { .. }));

    let open: Vec<_> = h.db.jobs_for_digest("sha256:d1").unwrap()
        .into_iter()
        .filter(|job| job.state.is_in_flight())
        .collect();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn test_rescan_reports_resolved_new_and_unchanged() {
    let mut engine = StubEngine::default();
    engine.results.insert("sha256:d1".to_string(), vec![
        raw("A", "pkg-a", "HIGH"),
        raw("B", "pkg-b", "LOW"),
    ]);
    let mut h = harness(engine);
    let now = Utc::now();

    let first = h.ingest.handle(&IngestTrigger::Push(vec![image("sha256:d1")]), now).await.unwrap();
    let delivery = h.scan_queue.receive().await.unwrap();
    h.scan.handle(delivery, now).await.unwrap();
    let delivery = h.inspect_queue.receive().await.unwrap();
    h.inspect.handle(delivery, now).await.unwrap();
    h.reconcile.reconcile_job("sha256:d1", &job_id(&first[0]), now).await.unwrap();

    let mut rescan_engine = StubEngine::default();
    rescan_engine.results.insert("sha256:d1".to_string(), vec![
        raw("A", "pkg-a", "HIGH"),
        raw("C", "pkg-c", "MEDIUM"),
    ]);
    h.scan = ScanStage::new(
        h.db.clone(),
        Arc::new(rescan_engine),
        h.scan_queue.clone(),
        h.inspect_queue.clone(),
        &QueueConfig::default(),
        &ScannerConfig::default(),
        RetentionConfig::default(),
    );

    let later = now + chrono::Duration::hours(25);
    let due = h.reconcile.rescan_due(later).unwrap();
    assert_eq!(due.len(), 1);
    let second = h.ingest.handle(&IngestTrigger::Rescan(due), later).await.unwrap();
    assert!(matches!(second[0], IngestOutcome::Enqueued { .. }));

    let delivery = h.scan_queue.receive().await.unwrap();
    h.scan.handle(delivery, later).await.unwrap();
    let delivery = h.inspect_queue.receive().await.unwrap();
    h.inspect.handle(delivery, later).await.unwrap();
    let outcome = h.reconcile.reconcile_job("sha256:d1", &job_id(&second[0]), later).await.unwrap();

    let ReconcileOutcome::Notified { diff, .. } = outcome else { panic!("expected a notification") };
    assert_eq!(diff.resolved_keys().into_iter().collect::<Vec<_>>(), vec![FindingKey::new("B", "pkg-b")]);
    assert_eq!(diff.new_keys().into_iter().collect::<Vec<_>>(), vec![FindingKey::new("C", "pkg-c")]);
    assert_eq!(diff.unchanged, vec![FindingKey::new("A", "pkg-a")]);
    assert_eq!(h.notifier.messages.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_purge_spares_image_with_job_in_flight() {
    let mut engine = StubEngine::default();
    engine.results.insert("sha256:d1".to_string(), vec![raw("CVE-2024-0001", "openssl", "HIGH")]);
    let retention = RetentionConfig { image_ttl_secs: Some(60), ..Default::default() };
    let h = harness_with_retention(engine, retention);
    let t0 = Utc::now();

    let outcomes = h.ingest.handle(&IngestTrigger::Push(vec![image("sha256:d1")]), t0).await.unwrap();
    let id = job_id(&outcomes[0]);
    let delivery = h.scan_queue.receive().await.unwrap();
    h.scan.handle(delivery, t0).await.unwrap();
    assert_eq!(h.db.get_image("sha256:d1").unwrap().unwrap().expires_at, None);

    let report = h.db.purge_expired(t0 + chrono::Duration::seconds(120)).unwrap();
    assert_eq!(report.images, 0);
    assert!(h.db.get_image("sha256:d1").unwrap().is_some());

    let delivery = h.inspect_queue.receive().await.unwrap();
    assert_eq!(h.inspect.handle(delivery, t0).await.unwrap(), Disposition::Forwarded);
    assert_eq!(h.db.get_job("sha256:d1", &id).unwrap().unwrap().state, JobState::Reconciled);

    let done = t0 + chrono::Duration::seconds(130);
    h.reconcile.reconcile_job("sha256:d1", &id, done).await.unwrap();
    let image = h.db.get_image("sha256:d1").unwrap().unwrap();
    assert_eq!(image.expires_at, Some(done + chrono::Duration::seconds(60)));

    // once terminal, the deadline applies
    let report = h.db.purge_expired(done + chrono::Duration::seconds(61)).unwrap();
    assert_eq!(report.images, 1);
    assert!(h.db.findings_for_digest("sha256:d1").unwrap().is_empty());
}

#[tokio::test]
async fn test_ecr_push_event_decodes() {
    let event = TriggerEvent::from_json(&json!({
        "source": "aws.ecr",
        "detail": {
            "eventName": "PutImage",
            "eventTime": "2024-05-01T10:00:00Z",
            "resources": [{"ARN": "arn:aws:ecr:eu-west-1:123456789012:repository/payments/api"}],
            "responseElements": {"image": {"imageId": {"imageDigest": "sha256:e1", "imageTag": "2024.05"}}}
        }
    })).unwrap();

    let TriggerEvent::Push { images, .. } = event else { panic!("expected push") };
    assert_eq!(images, vec![ImageRef {
        registry: "123456789012.dkr.ecr.eu-west-1.amazonaws.com".to_string(),
        repository: "payments/api".to_string(),
        tag: Some("2024.05".to_string()),
        digest: "sha256:e1".to_string(),
    }]);
}

#[tokio::test]
async fn test_runtime_processes_push_to_notified() {
    let mut engine = StubEngine::default();
    engine.results.insert("sha256:d1".to_string(), vec![raw("CVE-2024-0001", "openssl", "CRITICAL")]);

    let db = Database::in_memory().unwrap();
    let notifier = RecordingNotifier::default();
    let runtime = Arc::new(PipelineRuntime::new(
        db.clone(),
        ScanlineConfig::default(),
        Arc::new(engine),
        Arc::new(notifier.clone()),
    ));
    let cancel = CancellationToken::new();
    let workers = runtime.start(cancel.clone()).unwrap();

    let event = TriggerEvent::from_json(&json!({
        "repository": "registry.example.com/team/app",
        "digest": "sha256:d1",
        "tag": "v1"
    })).unwrap();
    let outcomes = runtime.ingest_event(&event, Utc::now()).await.unwrap();
    let id = job_id(&outcomes[0]);

    let mut state = JobState::Pending;
    for _ in 0..100 {
        state = db.get_job("sha256:d1", &id).unwrap().unwrap().state;
        if state == JobState::Notified {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(state, JobState::Notified);
    assert_eq!(notifier.messages.lock().unwrap().len(), 1);

    cancel.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}
