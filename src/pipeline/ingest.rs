use std::sync::{Arc, LazyLock};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use crate::config::types::IngestConfig;
use crate::db::Database;
use crate::errors::{with_retry, RetryConfig, ScanlineError};
use crate::models::image::ImageRef;
use crate::models::job::ScanJob;
use crate::models::message::ScanRequest;
use crate::queue::MessageQueue;
use super::state::{JobState, Trigger};

/// A decoded trigger payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    /// One or more images were pushed to a registry.
    Push { images: Vec<ImageRef>, pushed_at: Option<DateTime<Utc>> },
    /// The periodic rescan timer fired.
    Schedule { fired_at: Option<DateTime<Utc>> },
    /// A well-formed event that needs no action.
    Ignored { reason: String },
}

impl TriggerEvent {
    /// Decode a generic push event, an ECR CloudWatch event or a schedule event.
    pub fn from_json(value: &Value) -> Result<Self, ScanlineError> {
        if !value.is_object() {
            return Err(ScanlineError::InvalidEvent("event must be a JSON object".into()));
        }

        if value.get("kind").and_then(Value::as_str) == Some("schedule") {
            return Ok(TriggerEvent::Schedule { fired_at: parse_time(value.get("time")) });
        }

        match value.get("source").and_then(Value::as_str) {
            Some("aws.ecr") => decode_ecr(value),
            Some("aws.events") => Ok(TriggerEvent::Schedule { fired_at: parse_time(value.get("time")) }),
            Some(other) if value.get("digest").is_none() => Ok(TriggerEvent::Ignored {
                reason: format!("unsupported event source '{}'", other),
            }),
            _ => decode_push(value),
        }
    }
}

fn parse_time(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn required_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, ScanlineError> {
    value.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ScanlineError::InvalidEvent(format!("missing '{}'", field)))
}

/// `algorithm:encoded`, the OCI content digest grammar.
static DIGEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$").expect("valid regex")
});

fn validate_digest(digest: &str) -> Result<&str, ScanlineError> {
    if DIGEST_RE.is_match(digest) {
        Ok(digest)
    } else {
        Err(ScanlineError::InvalidEvent(format!("malformed image digest '{}'", digest)))
    }
}

/// `{repository, digest, tag?, timestamp?, registry?}`. A repository of the
/// form `host/path` carries its registry when `registry` is absent.
fn decode_push(value: &Value) -> Result<TriggerEvent, ScanlineError> {
    let repository = required_str(value, "repository")?;
    let digest = validate_digest(required_str(value, "digest")?)?;

    let (registry, repository) = match value.get("registry").and_then(Value::as_str) {
        Some(registry) if !registry.is_empty() => (registry.to_string(), repository.to_string()),
        _ => match repository.split_once('/') {
            Some((host, path)) if host.contains('.') || host.contains(':') => (host.to_string(), path.to_string()),
            _ => ("docker.io".to_string(), repository.to_string()),
        },
    };

    let tag = value.get("tag")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    Ok(TriggerEvent::Push {
        images: vec![ImageRef { registry, repository, tag, digest: digest.to_string() }],
        pushed_at: parse_time(value.get("timestamp")),
    })
}

/// Split `arn:aws:ecr:{region}:{account}:repository/{name}` into the registry
/// host and repository name.
pub fn parse_repository_arn(arn: &str) -> Result<(String, String), ScanlineError> {
    let parts: Vec<&str> = arn.split(':').collect();
    if parts.len() != 6 || parts[0] != "arn" || parts[2] != "ecr" {
        return Err(ScanlineError::InvalidEvent(format!("malformed repository ARN: {}", arn)));
    }
    let name = parts[5]
        .strip_prefix("repository/")
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ScanlineError::InvalidEvent(format!("malformed repository ARN: {}", arn)))?;

    Ok((format!("{}.dkr.ecr.{}.amazonaws.com", parts[4], parts[3]), name.to_string()))
}

fn decode_ecr(value: &Value) -> Result<TriggerEvent, ScanlineError> {
    let detail = value.get("detail")
        .ok_or_else(|| ScanlineError::InvalidEvent("ECR event without detail".into()))?;

    let event_name = detail.get("eventName").and_then(Value::as_str).unwrap_or("");
    if event_name != "PutImage" {
        return Ok(TriggerEvent::Ignored { reason: format!("ECR event '{}' is not PutImage", event_name) });
    }

    let image_id = detail.pointer("/responseElements/image/imageId")
        .ok_or_else(|| ScanlineError::InvalidEvent("PutImage event without imageId".into()))?;
    let digest = validate_digest(required_str(image_id, "imageDigest")?)?;
    let tag = image_id.get("imageTag")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let resources = detail.get("resources")
        .and_then(Value::as_array)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ScanlineError::InvalidEvent("PutImage event without resources".into()))?;

    let mut images = Vec::with_capacity(resources.len());
    for resource in resources {
        let arn = required_str(resource, "ARN")?;
        let (registry, repository) = parse_repository_arn(arn)?;
        images.push(ImageRef { registry, repository, tag: tag.clone(), digest: digest.to_string() });
    }

    Ok(TriggerEvent::Push { images, pushed_at: parse_time(detail.get("eventTime")) })
}

/// What Ingest is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestTrigger {
    Push(Vec<ImageRef>),
    Rescan(Vec<ImageRef>),
    Replay(Vec<ImageRef>),
}

impl IngestTrigger {
    fn parts(&self) -> (&[ImageRef], Trigger) {
        match self {
            IngestTrigger::Push(images) => (images, Trigger::RegistryPush),
            IngestTrigger::Rescan(images) => (images, Trigger::ScheduledRescan),
            IngestTrigger::Replay(images) => (images, Trigger::ManualReplay),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Enqueued { digest: String, job_id: String },
    /// An earlier job for the digest was never published; it was sent now.
    Republished { digest: String, job_id: String },
    /// The digest already has an open job.
    Deduplicated { digest: String, job_id: String },
    /// The job stays `Pending` and unpublished until the next rescan tick.
    PublishFailed { digest: String, job_id: String, error: String },
}

/// Result of writing a trigger to the store without publishing.
#[derive(Debug, Clone)]
pub enum Recorded {
    Created(ScanJob),
    Open(ScanJob),
}

/// Upsert the image and make sure the digest has an open job. Used directly
/// by the CLI, which has no queue to publish to. The image deadline is left
/// to the job's terminal transition.
pub fn record(
    db: &Database,
    image: &ImageRef,
    requested_by: Trigger,
    now: DateTime<Utc>,
) -> Result<Recorded, ScanlineError> {
    db.upsert_image(image, now, None)?;

    let candidate = ScanJob::new(image, requested_by, now);
    let (job, created) = db.open_or_create_job(&candidate)?;
    Ok(if created { Recorded::Created(job) } else { Recorded::Open(job) })
}

/// Turns registry pushes and rescan ticks into `Pending` jobs and scan
/// requests, with at most one open job per digest.
pub struct IngestStage {
    db: Database,
    scan_queue: Arc<dyn MessageQueue<ScanRequest>>,
    retry: RetryConfig,
}

impl IngestStage {
    pub fn new(
        db: Database,
        scan_queue: Arc<dyn MessageQueue<ScanRequest>>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            db,
            scan_queue,
            retry: RetryConfig {
                max_retries: config.publish_retries,
                max_delay: Duration::from_secs(config.publish_max_delay_secs),
            },
        }
    }

    /// Produce one scan request per image in the trigger.
    pub async fn handle(&self, trigger: &IngestTrigger, now: DateTime<Utc>) -> Result<Vec<IngestOutcome>, ScanlineError> {
        let (images, requested_by) = trigger.parts();
        let mut outcomes = Vec::with_capacity(images.len());
        for image in images {
            outcomes.push(self.submit(image, requested_by, now).await?);
        }
        Ok(outcomes)
    }

    pub async fn submit(&self, image: &ImageRef, requested_by: Trigger, now: DateTime<Utc>) -> Result<IngestOutcome, ScanlineError> {
        match record(&self.db, image, requested_by, now)? {
            Recorded::Created(job) => {
                info!(digest = %job.digest, job_id = %job.job_id, trigger = %requested_by, "Scan job created");
                Ok(match self.publish(&job, now).await {
                    Ok(()) => IngestOutcome::Enqueued { digest: job.digest, job_id: job.job_id },
                    Err(e) => IngestOutcome::PublishFailed { digest: job.digest, job_id: job.job_id, error: e.to_string() },
                })
            }
            Recorded::Open(job) if job.state == JobState::Pending && !job.published => {
                info!(digest = %job.digest, job_id = %job.job_id, "Republishing unpublished scan job");
                Ok(match self.publish(&job, now).await {
                    Ok(()) => IngestOutcome::Republished { digest: job.digest, job_id: job.job_id },
                    Err(e) => IngestOutcome::PublishFailed { digest: job.digest, job_id: job.job_id, error: e.to_string() },
                })
            }
            Recorded::Open(job) => {
                debug!(digest = %job.digest, job_id = %job.job_id, state = %job.state, "Scan already in flight, deduplicated");
                Ok(IngestOutcome::Deduplicated { digest: job.digest, job_id: job.job_id })
            }
        }
    }

    /// Send the scan request with bounded retry and mark the job published.
    pub async fn publish(&self, job: &ScanJob, now: DateTime<Utc>) -> Result<(), ScanlineError> {
        let request = ScanRequest {
            job_id: job.job_id.clone(),
            digest: job.digest.clone(),
            image: job.image.clone(),
            requested_by: job.requested_by,
            requested_at: now,
        };

        let sent = with_retry("publish_scan_request", &self.retry, || {
            let request = request.clone();
            async move { self.scan_queue.send(request).await }
        }).await;

        match sent {
            Ok(message_id) => {
                debug!(job_id = %job.job_id, message_id = %message_id, "Scan request published");
                self.db.set_job_published(&job.digest, &job.job_id, true)
            }
            Err(e) => {
                warn!(job_id = %job.job_id, digest = %job.digest, error = %e, "Publish failed, job left for the rescan trigger");
                Err(e)
            }
        }
    }
}
