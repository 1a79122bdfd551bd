use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::pipeline::state::JobState;

/// Identifies an image in a registry. The digest is the stable identity;
/// repository and tag may move without the digest changing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: String,
}

impl ImageRef {
    /// "{registry}/{repository}@{digest}", the pull reference handed to the scanner.
    pub fn reference(&self) -> String {
        format!("{}/{}@{}", self.registry, self.repository, self.digest)
    }

    /// "{registry}/{repository}:{tag}", or the digest reference when untagged.
    pub fn tagged(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}/{}:{}", self.registry, self.repository, tag),
            None => self.reference(),
        }
    }

    /// "{registry}/{repository}", the key used by the by-repository index.
    pub fn repository_path(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tagged())
    }
}

/// Stored image record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: String,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    /// State of the most recent job for this digest.
    pub scan_status: Option<JobState>,
    /// Status sequence of the current finding set.
    pub finding_set_seq: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Image {
    pub fn new(image: &ImageRef, now: DateTime<Utc>) -> Self {
        Self {
            registry: image.registry.clone(),
            repository: image.repository.clone(),
            tag: image.tag.clone(),
            digest: image.digest.clone(),
            first_seen_at: now,
            updated_at: now,
            last_scanned_at: None,
            scan_status: None,
            finding_set_seq: None,
            expires_at: None,
        }
    }

    pub fn image_ref(&self) -> ImageRef {
        ImageRef {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: self.tag.clone(),
            digest: self.digest.clone(),
        }
    }
}
