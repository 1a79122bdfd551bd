use chrono::{DateTime, Utc};
use rusqlite::Connection;
use crate::errors::ScanlineError;
use crate::models::finding::{Finding, FindingStatus, NormalizedFinding};
use crate::models::image::ImageRef;
use crate::models::job::ScanJob;
use crate::models::report::{ScanReport, VulnExposure};
use crate::pipeline::diff::FindingDiff;
use crate::pipeline::state::JobState;
use super::images::{load_image, put_image};
use super::jobs::transition;
use super::retention::Expiry;
use super::records::{self, SecondaryKey};
use super::reports::put_scan_report;
use super::schema::keys;
use super::sequence::next_sequence;
use super::Database;

fn put_finding(conn: &Connection, finding: &Finding) -> Result<(), ScanlineError> {
    records::put(
        conn,
        &keys::finding(&finding.digest),
        &finding.key().to_string(),
        Some(SecondaryKey {
            pk2: keys::finding_status(finding.status.as_str()),
            sk2: keys::finding_status_sort(&finding.digest, &finding.vuln_id, &finding.package),
        }),
        finding,
        None,
    )
}

fn put_exposure(conn: &Connection, exposure: &VulnExposure) -> Result<(), ScanlineError> {
    records::put(
        conn,
        &keys::exposure(&exposure.image.digest),
        &format!("{}|{}", exposure.vuln_id, exposure.package),
        Some(SecondaryKey {
            pk2: keys::vuln(&exposure.vuln_id),
            sk2: keys::vuln_sort(&exposure.image.digest, &exposure.package),
        }),
        exposure,
        None,
    )
}

fn load_findings(conn: &Connection, digest: &str) -> Result<Vec<Finding>, ScanlineError> {
    records::query_partition(conn, &keys::finding(digest))
}

impl Database {
    /// Write the complete finding set of one inspect run, its scan report,
    /// and move the job `Inspecting → Reconciled`, all in one transaction.
    /// Returns the status sequence stamped on the set.
    ///
    /// Existing findings keep their first-seen time and reconcile status;
    /// findings missing from the set are left for reconcile to resolve.
    pub fn replace_finding_set(
        &self,
        digest: &str,
        job_id: &str,
        findings: &[NormalizedFinding],
        now: DateTime<Utc>,
    ) -> Result<i64, ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let seq = next_sequence(&tx)?;
        let pk = keys::finding(digest);

        for normalized in findings {
            let sk = normalized.key.to_string();
            let finding = match records::get::<Finding>(&tx, &pk, &sk)? {
                Some(mut existing) => {
                    existing.severity = normalized.severity;
                    existing.title = normalized.title.clone();
                    existing.description_ref = normalized.description_ref.clone();
                    existing.installed_version = normalized.installed_version.clone();
                    existing.fixed_version = normalized.fixed_version.clone();
                    existing.last_seen_at = now;
                    existing.set_seq = seq;
                    existing
                }
                None => Finding {
                    digest: digest.to_string(),
                    vuln_id: normalized.key.vuln_id.clone(),
                    package: normalized.key.package.clone(),
                    severity: normalized.severity,
                    title: normalized.title.clone(),
                    description_ref: normalized.description_ref.clone(),
                    installed_version: normalized.installed_version.clone(),
                    fixed_version: normalized.fixed_version.clone(),
                    first_seen_at: now,
                    last_seen_at: now,
                    present: false,
                    set_seq: seq,
                    baseline_severity: None,
                    status: FindingStatus::Pending,
                    resolved_at: None,
                },
            };
            put_finding(&tx, &finding)?;
        }

        let mut image = load_image(&tx, digest)?
            .ok_or_else(|| ScanlineError::NotFound(format!("image {}", digest)))?;
        image.finding_set_seq = Some(seq);
        put_image(&tx, &image)?;

        let job = transition(&tx, digest, job_id, JobState::Inspecting, JobState::Reconciled, now, Expiry::default())?;
        put_scan_report(&tx, &ScanReport::summarize(&job, findings, seq, now))?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit finding set: {}", e)))?;
        Ok(seq)
    }

    /// Every finding ever recorded for a digest, resolved ones included.
    pub fn findings_for_digest(&self, digest: &str) -> Result<Vec<Finding>, ScanlineError> {
        let conn = self.lock()?;
        load_findings(&conn, digest)
    }

    /// The newest finding set of a digest.
    pub fn current_findings(&self, digest: &str) -> Result<Vec<Finding>, ScanlineError> {
        let conn = self.lock()?;
        let seq = match load_image(&conn, digest)?.and_then(|image| image.finding_set_seq) {
            Some(seq) => seq,
            None => return Ok(Vec::new()),
        };
        Ok(load_findings(&conn, digest)?
            .into_iter()
            .filter(|f| f.set_seq == seq)
            .collect())
    }

    /// Images affected by one vulnerability, across every digest.
    pub fn exposures_for_vuln(&self, vuln_id: &str) -> Result<Vec<VulnExposure>, ScanlineError> {
        let conn = self.lock()?;
        records::query_index(&conn, &keys::vuln(vuln_id))
    }

    pub fn findings_by_status(&self, status: FindingStatus) -> Result<Vec<Finding>, ScanlineError> {
        let conn = self.lock()?;
        records::query_index(&conn, &keys::finding_status(status.as_str()))
    }

    /// Persist a reconcile pass: current findings become present with their
    /// severity as the new baseline, resolved findings are flagged (not
    /// deleted), the vulnerability index is refreshed, and the job moves
    /// `Reconciled → Notified`. One transaction.
    pub fn apply_reconcile(
        &self,
        digest: &str,
        job_id: &str,
        diff: &FindingDiff,
        now: DateTime<Utc>,
        expiry: Expiry,
    ) -> Result<ScanJob, ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let image = load_image(&tx, digest)?;
        let seq = image.as_ref().and_then(|image| image.finding_set_seq);
        let image_ref: Option<ImageRef> = image.as_ref().map(|image| image.image_ref());
        let new_keys = diff.new_keys();
        let regressed_keys = diff.regressed_keys();
        let resolved_keys = diff.resolved_keys();

        for mut finding in load_findings(&tx, digest)? {
            let key = finding.key();
            if Some(finding.set_seq) == seq {
                finding.present = true;
                finding.baseline_severity = Some(finding.severity);
                finding.resolved_at = None;
                finding.status = if new_keys.contains(&key) {
                    FindingStatus::New
                } else if regressed_keys.contains(&key) {
                    FindingStatus::Regressed
                } else {
                    FindingStatus::Open
                };
            } else if resolved_keys.contains(&key) {
                finding.present = false;
                finding.status = FindingStatus::Resolved;
                finding.resolved_at = Some(now);
            } else {
                continue;
            }
            put_finding(&tx, &finding)?;
            if let Some(image_ref) = &image_ref {
                put_exposure(&tx, &VulnExposure::of(image_ref, &finding, now))?;
            }
        }

        let job = transition(&tx, digest, job_id, JobState::Reconciled, JobState::Notified, now, expiry)?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit reconcile: {}", e)))?;
        Ok(job)
    }
}
