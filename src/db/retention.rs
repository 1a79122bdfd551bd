use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use crate::config::types::RetentionConfig;
use crate::errors::ScanlineError;
use crate::models::job::ScanJob;
use super::schema::keys;
use super::records;
use super::Database;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeReport {
    pub records: usize,
    pub images: usize,
    /// Expired images kept because a job for the digest is still open.
    pub kept_open: usize,
}

/// Deadlines stamped when a job reaches a terminal state. The image deadline
/// is only written on terminal transitions; opening a job clears it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Expiry {
    pub job: Option<DateTime<Utc>>,
    pub image: Option<DateTime<Utc>>,
}

impl Expiry {
    pub fn from_retention(retention: &RetentionConfig, now: DateTime<Utc>) -> Self {
        Self {
            job: Some(retention.job_expiry(now)),
            image: retention.image_expiry(now),
        }
    }

    pub fn job_only(job: Option<DateTime<Utc>>) -> Self {
        Self { job, image: None }
    }
}

impl Database {
    /// Delete every record whose expiry has passed. An expired image takes
    /// its findings with it, unless the digest still has a non-terminal job.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<PurgeReport, ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;
        let cutoff = now.timestamp();

        let expired_images: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT pk FROM records WHERE sk = ?1 AND pk >= 'image:' AND pk < 'image;' AND expires_at IS NOT NULL AND expires_at <= ?2"
            ).map_err(|e| ScanlineError::Database(format!("Query failed: {}", e)))?;
            let rows = stmt.query_map(rusqlite::params![keys::IMAGE_SK, cutoff], |row: &rusqlite::Row| {
                row.get::<_, String>(0)
            }).map_err(|e| ScanlineError::Database(format!("Query error: {}", e)))?;

            let mut digests = Vec::new();
            for row in rows {
                let pk = row.map_err(|e| ScanlineError::Database(format!("Row error: {}", e)))?;
                digests.push(pk["image:".len()..].to_string());
            }
            digests
        };

        let mut report = PurgeReport::default();
        for digest in &expired_images {
            let jobs: Vec<ScanJob> = records::query_partition(&tx, &keys::job(digest))?;
            if jobs.iter().any(|job| !job.state.is_terminal()) {
                debug!(digest = %digest, "Expired image has an open job, keeping it");
                report.kept_open += 1;
                continue;
            }
            for pk in [keys::finding(digest), keys::exposure(digest), keys::report(digest)] {
                report.records += records::delete_partition(&tx, &pk)?;
            }
            if records::delete(&tx, &keys::image(digest), keys::IMAGE_SK)? {
                report.records += 1;
                report.images += 1;
            }
        }

        // image rows were handled above
        report.records += tx.execute(
            "DELETE FROM records WHERE expires_at IS NOT NULL AND expires_at <= ?1
             AND NOT (sk = ?2 AND pk >= 'image:' AND pk < 'image;')",
            rusqlite::params![cutoff, keys::IMAGE_SK],
        ).map_err(|e| ScanlineError::Database(format!("Purge failed: {}", e)))?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit purge: {}", e)))?;
        Ok(report)
    }
}
