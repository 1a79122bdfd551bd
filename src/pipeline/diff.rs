use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};
use crate::models::finding::{Finding, FindingKey, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityChange {
    pub finding: Finding,
    pub previous: Severity,
    pub current: Severity,
}

/// Changes between the previously reconciled finding state of an image and
/// its newest finding set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindingDiff {
    pub new: Vec<Finding>,
    pub resolved: Vec<Finding>,
    pub severity_changes: Vec<SeverityChange>,
    pub regressed: Vec<Finding>,
    pub unchanged: Vec<FindingKey>,
}

impl FindingDiff {
    /// True when nothing is worth notifying about.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.resolved.is_empty()
            && self.severity_changes.is_empty()
            && self.regressed.is_empty()
    }

    pub fn new_keys(&self) -> BTreeSet<FindingKey> {
        self.new.iter().map(Finding::key).collect()
    }

    pub fn resolved_keys(&self) -> BTreeSet<FindingKey> {
        self.resolved.iter().map(Finding::key).collect()
    }

    pub fn regressed_keys(&self) -> BTreeSet<FindingKey> {
        self.regressed.iter().map(Finding::key).collect()
    }
}

/// Diff `previous` (the reconciled state: present findings plus resolved ones,
/// each with the severity last reported) against `current` (the newest set).
///
/// - in both, previously present: unchanged or a severity change
/// - in both, previously resolved: regressed
/// - only in current: new
/// - previously present, missing from current: resolved
pub fn compute_diff(previous: &[Finding], current: &[Finding]) -> FindingDiff {
    let prior: BTreeMap<FindingKey, &Finding> = previous.iter().map(|f| (f.key(), f)).collect();
    let current_keys: BTreeSet<FindingKey> = current.iter().map(Finding::key).collect();

    let mut diff = FindingDiff::default();

    for finding in current {
        let key = finding.key();
        match prior.get(&key) {
            Some(before) if before.present => {
                if before.severity != finding.severity {
                    diff.severity_changes.push(SeverityChange {
                        finding: finding.clone(),
                        previous: before.severity,
                        current: finding.severity,
                    });
                } else {
                    diff.unchanged.push(key);
                }
            }
            Some(_) => diff.regressed.push(finding.clone()),
            None => diff.new.push(finding.clone()),
        }
    }

    for before in previous {
        if before.present && !current_keys.contains(&before.key()) {
            diff.resolved.push(before.clone());
        }
    }

    diff
}
