use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::finding::{Finding, FindingStatus, NormalizedFinding, Severity};
use super::image::ImageRef;
use super::job::ScanJob;
use crate::pipeline::state::Trigger;

/// Summary of one inspect run, kept per digest as scan history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub report_id: String,
    pub job_id: String,
    pub image: ImageRef,
    pub requested_by: Trigger,
    pub inspected_at: DateTime<Utc>,
    /// Status sequence of the finding set this report describes.
    pub set_seq: i64,
    pub total: usize,
    /// Finding count per severity label; zero counts are omitted.
    pub by_severity: BTreeMap<String, usize>,
}

impl ScanReport {
    pub fn summarize(job: &ScanJob, findings: &[NormalizedFinding], set_seq: i64, now: DateTime<Utc>) -> Self {
        let mut by_severity = BTreeMap::new();
        for finding in findings {
            *by_severity.entry(finding.severity.as_str().to_string()).or_insert(0) += 1;
        }
        Self {
            report_id: uuid::Uuid::new_v4().to_string(),
            job_id: job.job_id.clone(),
            image: job.image.clone(),
            requested_by: job.requested_by,
            inspected_at: now,
            set_seq,
            total: findings.len(),
            by_severity,
        }
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(severity.as_str()).copied().unwrap_or(0)
    }
}

/// One image affected by one vulnerability, as of the last reconcile pass.
/// Indexed by vulnerability id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnExposure {
    pub vuln_id: String,
    pub package: String,
    pub image: ImageRef,
    pub severity: Severity,
    pub status: FindingStatus,
    pub installed_version: Option<String>,
    pub fixed_version: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VulnExposure {
    pub fn of(image: &ImageRef, finding: &Finding, now: DateTime<Utc>) -> Self {
        Self {
            vuln_id: finding.vuln_id.clone(),
            package: finding.package.clone(),
            image: image.clone(),
            severity: finding.severity,
            status: finding.status,
            installed_version: finding.installed_version.clone(),
            fixed_version: finding.fixed_version.clone(),
            first_seen_at: finding.first_seen_at,
            updated_at: now,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == FindingStatus::Resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::finding::FindingKey;

    fn normalized(vuln: &str, severity: Severity) -> NormalizedFinding {
        NormalizedFinding {
            key: FindingKey::new(vuln, "openssl"),
            severity,
            title: None,
            description_ref: None,
            installed_version: None,
            fixed_version: None,
        }
    }

    #[test]
    fn test_summarize_counts_by_severity() {
        let image = ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: Some("v1".to_string()),
            digest: "sha256:d1".to_string(),
        };
        let job = ScanJob::new(&image, Trigger::RegistryPush, Utc::now());
        let report = ScanReport::summarize(&job, &[
            normalized("CVE-1", Severity::High),
            normalized("CVE-2", Severity::High),
            normalized("CVE-3", Severity::Low),
        ], 7, Utc::now());

        assert_eq!(report.total, 3);
        assert_eq!(report.set_seq, 7);
        assert_eq!(report.count(Severity::High), 2);
        assert_eq!(report.count(Severity::Low), 1);
        assert_eq!(report.count(Severity::Critical), 0);
        assert!(!report.by_severity.contains_key("critical"));
        assert_eq!(report.job_id, job.job_id);
    }
}
