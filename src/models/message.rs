use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::finding::RawFinding;
use super::image::ImageRef;
use crate::pipeline::state::Trigger;

/// Body of a scan queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub job_id: String,
    pub digest: String,
    pub image: ImageRef,
    pub requested_by: Trigger,
    pub requested_at: DateTime<Utc>,
}

/// Body of an inspect queue message: the raw scanner output for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectRequest {
    pub job_id: String,
    pub digest: String,
    pub image: ImageRef,
    pub raw_findings: Vec<RawFinding>,
    pub scanned_at: DateTime<Utc>,
}

/// Queue bodies that belong to one job.
pub trait JobMessage {
    fn job_id(&self) -> &str;
    fn digest(&self) -> &str;
}

impl JobMessage for ScanRequest {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn digest(&self) -> &str {
        &self.digest
    }
}

impl JobMessage for InspectRequest {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn digest(&self) -> &str {
        &self.digest
    }
}

/// Queues that have a dead-letter companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Scan,
    Inspect,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Inspect => "inspect",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(Self::Scan),
            "inspect" => Some(Self::Inspect),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message parked in a dead-letter queue: original payload plus delivery count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message_id: String,
    pub queue: QueueName,
    pub job_id: String,
    pub digest: String,
    pub payload: serde_json::Value,
    pub delivery_count: u32,
    pub last_error: Option<String>,
    pub dead_lettered_at: DateTime<Utc>,
}
