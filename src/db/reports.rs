use rusqlite::Connection;
use crate::errors::ScanlineError;
use crate::models::report::ScanReport;
use super::records::{self, SecondaryKey};
use super::schema::keys;
use super::Database;

pub(crate) fn put_scan_report(conn: &Connection, report: &ScanReport) -> Result<(), ScanlineError> {
    let sort = keys::report_sort(report.inspected_at, &report.report_id);
    records::put(
        conn,
        &keys::report(&report.image.digest),
        &sort,
        Some(SecondaryKey {
            pk2: keys::report_repository(&report.image.repository_path()),
            sk2: sort.clone(),
        }),
        report,
        None,
    )
}

impl Database {
    /// Scan history of one digest, newest first.
    pub fn scan_reports_for_digest(&self, digest: &str) -> Result<Vec<ScanReport>, ScanlineError> {
        let conn = self.lock()?;
        let mut reports: Vec<ScanReport> = records::query_partition(&conn, &keys::report(digest))?;
        reports.reverse();
        Ok(reports)
    }

    pub fn latest_scan_report(&self, digest: &str) -> Result<Option<ScanReport>, ScanlineError> {
        Ok(self.scan_reports_for_digest(digest)?.into_iter().next())
    }

    /// Scan history of every digest in `{registry}/{repository}`, newest first.
    pub fn scan_reports_by_repository(&self, repository_path: &str) -> Result<Vec<ScanReport>, ScanlineError> {
        let conn = self.lock()?;
        let mut reports: Vec<ScanReport> = records::query_index(&conn, &keys::report_repository(repository_path))?;
        reports.reverse();
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use crate::models::finding::{FindingKey, NormalizedFinding, Severity};
    use crate::models::image::ImageRef;
    use crate::models::job::ScanJob;
    use crate::pipeline::state::{JobState, Trigger};

    fn image(digest: &str, tag: &str) -> ImageRef {
        ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "team/app".to_string(),
            tag: Some(tag.to_string()),
            digest: digest.to_string(),
        }
    }

    fn inspect_once(db: &Database, img: &ImageRef, vulns: &[&str], at: chrono::DateTime<Utc>) -> ScanJob {
        db.upsert_image(img, at, None).unwrap();
        let job = ScanJob::new(img, Trigger::RegistryPush, at);
        db.create_job(&job).unwrap();
        db.transition_job(&img.digest, &job.job_id, JobState::Pending, JobState::Scanning, at, None).unwrap();
        db.transition_job(&img.digest, &job.job_id, JobState::Scanning, JobState::Inspecting, at, None).unwrap();
        let findings: Vec<NormalizedFinding> = vulns.iter().map(|v| NormalizedFinding {
            key: FindingKey::new(*v, "openssl"),
            severity: Severity::High,
            title: None,
            description_ref: None,
            installed_version: None,
            fixed_version: None,
        }).collect();
        db.replace_finding_set(&img.digest, &job.job_id, &findings, at).unwrap();
        db.transition_job(&img.digest, &job.job_id, JobState::Reconciled, JobState::Notified, at, None).unwrap();
        job
    }

    #[test]
    fn test_db_finding_set_writes_scan_report() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        let img = image("sha256:d1", "v1");
        let first = inspect_once(&db, &img, &["CVE-1", "CVE-2"], now);
        let second = inspect_once(&db, &img, &["CVE-1"], now + Duration::hours(1));

        let reports = db.scan_reports_for_digest("sha256:d1").unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].job_id, second.job_id);
        assert_eq!(reports[0].total, 1);
        assert_eq!(reports[1].job_id, first.job_id);
        assert_eq!(reports[1].count(Severity::High), 2);
        assert!(reports[0].set_seq > reports[1].set_seq);

        let latest = db.latest_scan_report("sha256:d1").unwrap().unwrap();
        assert_eq!(latest.job_id, second.job_id);
        assert!(db.latest_scan_report("sha256:none").unwrap().is_none());
    }

    #[test]
    fn test_db_scan_reports_by_repository() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        inspect_once(&db, &image("sha256:d1", "v1"), &["CVE-1"], now);
        inspect_once(&db, &image("sha256:d2", "v2"), &[], now + Duration::minutes(5));

        let reports = db.scan_reports_by_repository("registry.example.com/team/app").unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].image.digest, "sha256:d2");
        assert!(db.scan_reports_by_repository("registry.example.com/other").unwrap().is_empty());
    }
}
