use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use super::image::ImageRef;
use crate::pipeline::state::{JobState, Trigger};

/// One pipeline run for one image digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: String,
    pub digest: String,
    pub image: ImageRef,
    pub requested_by: Trigger,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Failed deliveries in the current stage.
    pub retry_count: u32,
    /// Whether the scan request was accepted by the scan queue.
    pub published: bool,
    pub last_error: Option<String>,
    /// Set only once the job reaches a terminal state.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ScanJob {
    pub fn new(image: &ImageRef, requested_by: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            digest: image.digest.clone(),
            image: image.clone(),
            requested_by,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            published: false,
            last_error: None,
            expires_at: None,
        }
    }
}
