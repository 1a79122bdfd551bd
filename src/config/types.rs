use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::RedrivePolicy;
use crate::queue::QueuePolicy;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ScanlineConfig {
    pub store: StoreConfig,
    pub queues: QueuesConfig,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
    pub scanner: ScannerConfig,
    pub notifier: NotifierConfig,
    pub ingest: IngestConfig,
    pub inspect: InspectConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: "./scanline-data/scanline.db".to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct QueuesConfig {
    pub scan: QueueConfig,
    pub inspect: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub visibility_timeout_secs: u64,
    pub max_receive_count: u32,
    /// Delay before a failed message becomes visible again.
    pub redelivery_delay_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 300,
            max_receive_count: 3,
            redelivery_delay_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            max_receive_count: self.max_receive_count,
        }
    }

    pub fn redrive(&self) -> RedrivePolicy {
        RedrivePolicy {
            max_receive_count: self.max_receive_count,
            redelivery_delay: Duration::from_secs(self.redelivery_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// How often the rescan-due trigger fires.
    pub rescan_interval_secs: u64,
    /// How often the reconcile sweep runs.
    pub reconcile_interval_secs: u64,
    /// Age of the last scan after which an image is due again.
    pub rescan_after_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rescan_interval_secs: 86_400,
            reconcile_interval_secs: 3_600,
            rescan_after_secs: 86_400,
        }
    }
}

impl ScheduleConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_secs(self.rescan_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn rescan_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rescan_after_secs as i64)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Lifetime of a job record after it reaches a terminal state.
    pub job_ttl_secs: u64,
    /// Lifetime of an image record after its last registry push. Unset keeps images forever.
    pub image_ttl_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            job_ttl_secs: 7 * 86_400,
            image_ttl_secs: None,
        }
    }
}

impl RetentionConfig {
    pub fn job_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::seconds(self.job_ttl_secs as i64)
    }

    pub fn image_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.image_ttl_secs.map(|ttl| now + chrono::Duration::seconds(ttl as i64))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub binary: String,
    pub cache_dir: String,
    /// Hard deadline for one engine invocation; must stay below the scan
    /// queue's visibility timeout.
    pub timeout_secs: u64,
    pub skip_db_update: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            binary: "trivy".to_string(),
            cache_dir: "/tmp/scanline/trivy".to_string(),
            timeout_secs: 240,
            skip_db_update: false,
        }
    }
}

impl ScannerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotifierKind {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub kind: NotifierKind,
    /// Literal URL or `$ENV_VAR`; falls back to `SCANLINE_WEBHOOK_URL`.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            kind: NotifierKind::Log,
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Extra publish attempts before a job is left unpublished for the rescan trigger.
    pub publish_retries: u32,
    pub publish_max_delay_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            publish_retries: 3,
            publish_max_delay_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InspectConfig {
    /// Vulnerability id prefixes dropped during normalization.
    pub ignored_prefixes: Vec<String>,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self { ignored_prefixes: vec!["TEMP-".to_string()] }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
