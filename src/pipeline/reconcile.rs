use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use crate::config::types::{RetentionConfig, ScheduleConfig};
use crate::db::{Database, Expiry, PurgeReport};
use crate::errors::ScanlineError;
use crate::models::finding::{Finding, FindingStatus};
use crate::models::image::ImageRef;
use crate::notify::ChangeMessage;
use super::diff::{compute_diff, FindingDiff};
use super::notify::NotifyStage;
use super::state::JobState;

/// Sent by inspect when a job reaches `Reconciled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSignal {
    pub digest: String,
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// A non-empty diff was handed to notify. `delivered` is false when the
    /// channel reported a failure.
    Notified { diff: FindingDiff, delivered: bool },
    /// Nothing changed; the job is `Notified` without a message.
    Unchanged,
    /// The job is not `Reconciled` (already handled, or gone).
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub reconciled: usize,
    pub notified: usize,
    pub errors: usize,
    pub purged: PurgeReport,
}

pub struct ReconcileStage {
    db: Database,
    notify: NotifyStage,
    schedule: ScheduleConfig,
    retention: RetentionConfig,
}

impl ReconcileStage {
    pub fn new(db: Database, notify: NotifyStage, schedule: ScheduleConfig, retention: RetentionConfig) -> Self {
        Self { db, notify, schedule, retention }
    }

    /// Diff one job's finding set against the reconciled state, notify, and
    /// move the job to `Notified`.
    pub async fn reconcile_job(&self, digest: &str, job_id: &str, now: DateTime<Utc>) -> Result<ReconcileOutcome, ScanlineError> {
        let job = match self.db.get_job(digest, job_id)? {
            Some(job) if job.state == JobState::Reconciled => job,
            other => {
                debug!(job_id = %job_id, state = ?other.map(|j| j.state), "Nothing to reconcile");
                return Ok(ReconcileOutcome::Skipped);
            }
        };

        let seq = self.db.get_image(digest)?.and_then(|image| image.finding_set_seq);
        let (previous, current) = split_finding_state(self.db.findings_for_digest(digest)?, seq);
        let diff = compute_diff(&previous, &current);

        let outcome = if diff.is_empty() {
            ReconcileOutcome::Unchanged
        } else {
            let message = ChangeMessage::from_diff(job.image.clone(), job_id, &diff, now);
            // delivery failures are not retried; the job still advances
            let delivered = self.notify.dispatch(&message).await.is_ok();
            ReconcileOutcome::Notified { diff: diff.clone(), delivered }
        };

        match self.db.apply_reconcile(digest, job_id, &diff, now, Expiry::from_retention(&self.retention, now)) {
            Ok(_) => {}
            Err(ScanlineError::WriteConflict(e)) => {
                warn!(job_id = %job_id, error = %e, "Job reconciled concurrently");
                return Ok(ReconcileOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }

        info!(
            job_id = %job_id,
            digest = %digest,
            new = diff.new.len(),
            resolved = diff.resolved.len(),
            severity_changes = diff.severity_changes.len(),
            regressed = diff.regressed.len(),
            unchanged = diff.unchanged.len(),
            "Reconciled"
        );
        Ok(outcome)
    }

    /// Reconcile every job waiting in `Reconciled`, then purge expired records.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ScanlineError> {
        let mut report = SweepReport::default();

        for job in self.db.jobs_by_state(JobState::Reconciled)? {
            match self.reconcile_job(&job.digest, &job.job_id, now).await {
                Ok(ReconcileOutcome::Skipped) => {}
                Ok(ReconcileOutcome::Unchanged) => report.reconciled += 1,
                Ok(ReconcileOutcome::Notified { .. }) => {
                    report.reconciled += 1;
                    report.notified += 1;
                }
                Err(e) => {
                    error!(job_id = %job.job_id, digest = %job.digest, error = %e, "Reconcile failed");
                    report.errors += 1;
                }
            }
        }

        report.purged = self.db.purge_expired(now)?;
        if report.reconciled > 0 || report.purged.records > 0 {
            info!(
                reconciled = report.reconciled,
                notified = report.notified,
                purged = report.purged.records,
                "Reconcile sweep finished"
            );
        }
        Ok(report)
    }

    /// Images due for periodic rescanning: never scanned, last scanned before
    /// the rescan window, or holding a job whose scan request was never sent.
    pub fn rescan_due(&self, now: DateTime<Utc>) -> Result<Vec<ImageRef>, ScanlineError> {
        let cutoff = now - self.schedule.rescan_after();
        let mut due: BTreeMap<String, ImageRef> = BTreeMap::new();

        for image in self.db.list_images()? {
            let stale = image.last_scanned_at.map_or(true, |at| at < cutoff);
            if stale {
                due.insert(image.digest.clone(), image.image_ref());
            }
        }
        for job in self.db.unpublished_jobs()? {
            due.entry(job.digest.clone()).or_insert(job.image);
        }

        debug!(count = due.len(), "Images due for rescan");
        Ok(due.into_values().collect())
    }
}

/// Split stored findings into the reconciled state (present or resolved,
/// at their last reported severity) and the newest finding set.
fn split_finding_state(findings: Vec<Finding>, seq: Option<i64>) -> (Vec<Finding>, Vec<Finding>) {
    let mut previous = Vec::new();
    let mut current = Vec::new();

    for finding in findings {
        if Some(finding.set_seq) == seq {
            current.push(finding.clone());
        }
        if finding.present || finding.status == FindingStatus::Resolved {
            let mut before = finding;
            before.severity = before.baseline_severity.unwrap_or(before.severity);
            previous.push(before);
        }
    }
    (previous, current)
}
