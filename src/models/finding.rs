use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level for a vulnerability, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    /// Returns a numeric rank where lower values indicate higher severity.
    /// Critical = 0, High = 1, Medium = 2, Low = 3, Unknown = 4.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Unknown => 4,
        }
    }

    /// Parse a scanner-reported severity label, case-insensitively.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" => Severity::Medium,
            "low" | "negligible" => Severity::Low,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconciled status of a finding; drives the `finding_status:*` index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    /// Written by an inspect run, not yet seen by reconcile.
    Pending,
    /// First reported by the latest reconcile pass.
    New,
    /// Present and already reported.
    Open,
    /// Absent from the newest finding set.
    Resolved,
    /// Resolved earlier, present again.
    Regressed,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingStatus::Pending => "pending",
            FindingStatus::New => "new",
            FindingStatus::Open => "open",
            FindingStatus::Resolved => "resolved",
            FindingStatus::Regressed => "regressed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FindingStatus::Pending),
            "new" => Some(FindingStatus::New),
            "open" => Some(FindingStatus::Open),
            "resolved" => Some(FindingStatus::Resolved),
            "regressed" => Some(FindingStatus::Regressed),
            _ => None,
        }
    }
}

/// Natural identity of a finding within one image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FindingKey {
    pub vuln_id: String,
    pub package: String,
}

impl FindingKey {
    pub fn new(vuln_id: impl Into<String>, package: impl Into<String>) -> Self {
        Self { vuln_id: vuln_id.into(), package: package.into() }
    }
}

impl std::fmt::Display for FindingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}|{}", self.vuln_id, self.package)
    }
}

/// A vulnerability exactly as the scanning engine reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    pub vuln_id: String,
    pub package: String,
    /// Scanner target the package was found in (e.g. "alpine 3.18", "app/go.sum").
    #[serde(default)]
    pub pkg_source: Option<String>,
    #[serde(default)]
    pub installed_version: Option<String>,
    #[serde(default)]
    pub fixed_version: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Primary advisory URL.
    #[serde(default)]
    pub reference: Option<String>,
}

/// A normalized vulnerability ready to be written as part of a finding set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFinding {
    pub key: FindingKey,
    pub severity: Severity,
    pub title: Option<String>,
    pub description_ref: Option<String>,
    pub installed_version: Option<String>,
    pub fixed_version: Option<String>,
}

/// A persisted finding for one image digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub digest: String,
    pub vuln_id: String,
    pub package: String,
    pub severity: Severity,
    pub title: Option<String>,
    pub description_ref: Option<String>,
    pub installed_version: Option<String>,
    pub fixed_version: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    /// Present as of the last reconcile pass.
    pub present: bool,
    /// Status sequence of the newest finding set that contained this finding.
    pub set_seq: i64,
    /// Severity as of the last reconcile pass.
    pub baseline_severity: Option<Severity>,
    pub status: FindingStatus,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Finding {
    pub fn key(&self) -> FindingKey {
        FindingKey::new(&self.vuln_id, &self.package)
    }
}
