use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use crate::config::types::{InspectConfig, QueueConfig, RetentionConfig};
use crate::db::Database;
use crate::errors::ScanlineError;
use crate::models::finding::{FindingKey, NormalizedFinding, RawFinding, Severity};
use crate::models::message::{InspectRequest, QueueName};
use crate::queue::{Delivery, MessageQueue};
use super::reconcile::ChangeSignal;
use super::redrive::{Disposition, Redriver};
use super::state::JobState;

/// Normalize raw scanner output into a finding set keyed by
/// (vulnerability id, package), sorted by key.
pub fn normalize(raw: &[RawFinding], ignored_prefixes: &[String]) -> Vec<NormalizedFinding> {
    let ignored: Vec<String> = ignored_prefixes.iter().map(|p| p.to_ascii_uppercase()).collect();
    let mut by_key: BTreeMap<FindingKey, NormalizedFinding> = BTreeMap::new();

    for finding in raw {
        let vuln_id = finding.vuln_id.trim().to_ascii_uppercase();
        let package = finding.package.trim();
        if vuln_id.is_empty() || package.is_empty() {
            continue;
        }
        if ignored.iter().any(|prefix| vuln_id.starts_with(prefix.as_str())) {
            debug!(vuln_id = %vuln_id, package = %package, "Ignoring finding");
            continue;
        }

        let normalized = NormalizedFinding {
            key: FindingKey::new(vuln_id, package),
            severity: Severity::parse(&finding.severity),
            title: non_empty(finding.title.as_deref()),
            description_ref: non_empty(finding.reference.as_deref()),
            installed_version: non_empty(finding.installed_version.as_deref()),
            fixed_version: non_empty(finding.fixed_version.as_deref()),
        };

        match by_key.entry(normalized.key.clone()) {
            Entry::Vacant(e) => { e.insert(normalized); }
            Entry::Occupied(mut e) => {
                // Keep higher severity (lower rank number)
                if normalized.severity.rank() < e.get().severity.rank() {
                    e.insert(normalized);
                }
            }
        }
    }

    by_key.into_values().collect()
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Persists normalized finding sets and signals reconcile.
pub struct InspectStage {
    ignored_prefixes: Vec<String>,
    changes: Option<mpsc::Sender<ChangeSignal>>,
    redriver: Redriver<InspectRequest>,
}

impl InspectStage {
    pub fn new(
        db: Database,
        inspect_queue: Arc<dyn MessageQueue<InspectRequest>>,
        queue_config: &QueueConfig,
        inspect: &InspectConfig,
        retention: RetentionConfig,
        changes: Option<mpsc::Sender<ChangeSignal>>,
    ) -> Self {
        Self {
            ignored_prefixes: inspect.ignored_prefixes.clone(),
            changes,
            redriver: Redriver {
                db,
                queue: inspect_queue,
                queue_name: QueueName::Inspect,
                working_state: JobState::Inspecting,
                policy: queue_config.redrive(),
                retention,
            },
        }
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue<InspectRequest>> {
        &self.redriver.queue
    }

    pub async fn handle(&self, delivery: Delivery<InspectRequest>, now: DateTime<Utc>) -> Result<Disposition, ScanlineError> {
        let db = &self.redriver.db;
        let request = &delivery.body;

        let job = match db.get_job(&request.digest, &request.job_id)? {
            Some(job) => job,
            None => return Ok(self.redriver.drop_duplicate(&delivery, None).await),
        };

        match job.state {
            // scan published the result but did not get to record the transition
            JobState::Scanning => {
                db.transition_job(&request.digest, &request.job_id, JobState::Scanning, JobState::Inspecting, now, None)?;
            }
            JobState::Inspecting => {}
            other => return Ok(self.redriver.drop_duplicate(&delivery, Some(other)).await),
        }

        if self.redriver.policy.exhausted(delivery.receive_count) {
            return self.redriver.dead_letter(&delivery, job.last_error.clone(), now).await;
        }

        let findings = normalize(&request.raw_findings, &self.ignored_prefixes);
        let seq = match db.replace_finding_set(&request.digest, &request.job_id, &findings, now) {
            Ok(seq) => seq,
            Err(e) => return self.redriver.fail(&delivery, e, now).await,
        };

        info!(
            job_id = %request.job_id,
            digest = %request.digest,
            raw = request.raw_findings.len(),
            findings = findings.len(),
            set_seq = seq,
            "Finding set persisted"
        );
        self.redriver.ack(&delivery).await;

        if let Some(changes) = &self.changes {
            let signal = ChangeSignal { digest: request.digest.clone(), job_id: request.job_id.clone() };
            if let Err(e) = changes.try_send(signal) {
                warn!(job_id = %request.job_id, error = %e, "Change signal dropped, left for the reconcile sweep");
            }
        }
        Ok(Disposition::Forwarded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::models::image::ImageRef;
    use crate::models::job::ScanJob;
    use crate::pipeline::state::Trigger;
    use crate::queue::MemoryQueue;

    fn raw(vuln: &str, pkg: &str, severity: &str) -> RawFinding {
        RawFinding {
            vuln_id: vuln.to_string(),
            package: pkg.to_string(),
            pkg_source: Some("debian 12".to_string()),
            installed_version: Some("1.0".to_string()),
            fixed_version: Some(" ".to_string()),
            severity: severity.to_string(),
            title: Some("  Heap overflow ".to_string()),
            reference: None,
        }
    }

    #[test]
    fn test_normalize_dedups_keeping_higher_severity() {
        let findings = normalize(
            &[
                raw("CVE-2024-1", "openssl", "MEDIUM"),
                raw("cve-2024-1 ", "openssl", "CRITICAL"),
                raw("CVE-2024-1", "openssl", "LOW"),
                raw("CVE-2024-1", "zlib", "LOW"),
            ],
            &[],
        );

        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].key, FindingKey::new("CVE-2024-1", "openssl"));
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].title.as_deref(), Some("Heap overflow"));
        assert_eq!(findings[0].fixed_version, None);
        assert_eq!(findings[1].key.package, "zlib");
    }

    #[test]
    fn test_normalize_drops_ignored_and_empty_ids() {
        let findings = normalize(
            &[
                raw("TEMP-0000001-ABCDEF", "bash", "LOW"),
                raw("temp-0000002", "bash", "LOW"),
                raw("", "bash", "HIGH"),
                raw("CVE-2024-2", "  ", "HIGH"),
                raw("GHSA-xxxx", "lodash", "HIGH"),
            ],
            &["TEMP-".to_string()],
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].key.vuln_id, "GHSA-XXXX");
    }

    struct Fixture {
        db: Database,
        queue: Arc<MemoryQueue<InspectRequest>>,
        stage: InspectStage,
        signals: mpsc::Receiver<ChangeSignal>,
    }

    fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let queue = Arc::new(MemoryQueue::new("inspect", Duration::from_secs(300)));
        let (tx, rx) = mpsc::channel(8);
        let queue_config = QueueConfig { redelivery_delay_secs: 0, ..Default::default() };
        let stage = InspectStage::new(
            db.clone(),
            queue.clone(),
            &queue_config,
            &InspectConfig::default(),
            RetentionConfig::default(),
            Some(tx),
        );
        Fixture { db, queue, stage, signals: rx }
    }

    fn scanning_job(db: &Database, digest: &str) -> (ImageRef, ScanJob) {
        let image = ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: None,
            digest: digest.to_string(),
        };
        let now = Utc::now();
        db.upsert_image(&image, now, None).unwrap();
        let job = ScanJob::new(&image, Trigger::RegistryPush, now);
        db.create_job(&job).unwrap();
        db.transition_job(digest, &job.job_id, JobState::Pending, JobState::Scanning, now, None).unwrap();
        (image, job)
    }

    fn request(image: &ImageRef, job: &ScanJob, raw_findings: Vec<RawFinding>) -> InspectRequest {
        InspectRequest {
            job_id: job.job_id.clone(),
            digest: job.digest.clone(),
            image: image.clone(),
            raw_findings,
            scanned_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inspect_persists_and_signals() {
        let mut f = fixture();
        let (image, job) = scanning_job(&f.db, "sha256:d1");
        f.db.transition_job("sha256:d1", &job.job_id, JobState::Scanning, JobState::Inspecting, Utc::now(), None).unwrap();
        f.queue.send(request(&image, &job, vec![raw("CVE-2024-1", "openssl", "HIGH")])).await.unwrap();

        let delivery = f.queue.receive().await.unwrap();
        assert_eq!(f.stage.handle(delivery, Utc::now()).await.unwrap(), Disposition::Forwarded);

        let stored = f.db.get_job("sha256:d1", &job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Reconciled);
        assert_eq!(f.db.current_findings("sha256:d1").unwrap().len(), 1);
        let signal = f.signals.try_recv().unwrap();
        assert_eq!(signal.job_id, job.job_id);
    }

    #[tokio::test]
    async fn test_redelivered_result_does_not_duplicate_findings() {
        let f = fixture();
        let (image, job) = scanning_job(&f.db, "sha256:d1");
        let body = request(&image, &job, vec![
            raw("CVE-2024-1", "openssl", "HIGH"),
            raw("CVE-2024-2", "zlib", "LOW"),
        ]);
        f.queue.send(body.clone()).await.unwrap();
        f.queue.send(body).await.unwrap();

        // job still Scanning: inspect advances it itself
        let first = f.queue.receive().await.unwrap();
        assert_eq!(f.stage.handle(first, Utc::now()).await.unwrap(), Disposition::Forwarded);
        let before = f.db.findings_for_digest("sha256:d1").unwrap();

        let second = f.queue.receive().await.unwrap();
        assert_eq!(f.stage.handle(second, Utc::now()).await.unwrap(), Disposition::Duplicate);
        let after = f.db.findings_for_digest("sha256:d1").unwrap();

        assert_eq!(before, after);
        assert_eq!(after.len(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_delivery_is_dead_lettered() {
        let f = fixture();
        let (image, job) = scanning_job(&f.db, "sha256:d2");
        f.queue.send(request(&image, &job, vec![raw("CVE-2024-1", "openssl", "HIGH")])).await.unwrap();
        let mut delivery = f.queue.receive().await.unwrap();
        delivery.receive_count = 4;

        assert_eq!(f.stage.handle(delivery, Utc::now()).await.unwrap(), Disposition::DeadLettered);

        let letters = f.db.dead_letters(QueueName::Inspect).unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].job_id, job.job_id);
        assert_eq!(letters[0].delivery_count, 4);
        assert!(f.db.dead_letters(QueueName::Scan).unwrap().is_empty());

        let stored = f.db.get_job("sha256:d2", &job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::DeadLettered);
        assert!(stored.expires_at.is_some());
        assert!(f.db.findings_for_digest("sha256:d2").unwrap().is_empty());
        assert_eq!(f.queue.depth().await.in_flight, 0);
    }

    #[tokio::test]
    async fn test_missing_image_fails_job() {
        let f = fixture();
        let image = ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: None,
            digest: "sha256:gone".to_string(),
        };
        let now = Utc::now();
        let job = ScanJob::new(&image, Trigger::RegistryPush, now);
        f.db.create_job(&job).unwrap();
        f.db.transition_job("sha256:gone", &job.job_id, JobState::Pending, JobState::Scanning, now, None).unwrap();
        f.queue.send(request(&image, &job, vec![raw("CVE-2024-1", "openssl", "HIGH")])).await.unwrap();

        let delivery = f.queue.receive().await.unwrap();
        assert_eq!(f.stage.handle(delivery, now).await.unwrap(), Disposition::Failed);

        let stored = f.db.get_job("sha256:gone", &job.job_id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert!(stored.last_error.is_some());
        assert!(f.db.dead_letters(QueueName::Inspect).unwrap().is_empty());
    }
}
