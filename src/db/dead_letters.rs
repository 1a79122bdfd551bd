use chrono::{DateTime, Utc};
use rusqlite::Connection;
use crate::errors::ScanlineError;
use crate::models::job::ScanJob;
use crate::models::message::{DeadLetter, QueueName};
use crate::pipeline::state::JobState;
use super::jobs::transition;
use super::records::{self, SecondaryKey};
use super::retention::Expiry;
use super::schema::keys;
use super::Database;

fn put_dead_letter(conn: &Connection, letter: &DeadLetter) -> Result<(), ScanlineError> {
    records::put(
        conn,
        &keys::dead_letter(letter.queue.as_str()),
        &letter.message_id,
        Some(SecondaryKey {
            pk2: keys::dead_letter_digest(&letter.digest),
            sk2: keys::dead_letter_digest_sort(letter.queue.as_str(), &letter.message_id),
        }),
        letter,
        None,
    )
}

impl Database {
    /// Park a message in its dead-letter queue and move the job from `from`
    /// to `DeadLettered` in the same transaction. Keyed by message id, so a
    /// repeated call for the same message leaves exactly one entry.
    pub fn dead_letter_job(
        &self,
        letter: &DeadLetter,
        from: JobState,
        now: DateTime<Utc>,
        expiry: Expiry,
    ) -> Result<ScanJob, ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        put_dead_letter(&tx, letter)?;
        let job = transition(&tx, &letter.digest, &letter.job_id, from, JobState::DeadLettered, now, expiry)?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit dead letter: {}", e)))?;
        Ok(job)
    }

    pub fn dead_letters(&self, queue: QueueName) -> Result<Vec<DeadLetter>, ScanlineError> {
        let conn = self.lock()?;
        records::query_partition(&conn, &keys::dead_letter(queue.as_str()))
    }

    pub fn dead_letters_for_digest(&self, digest: &str) -> Result<Vec<DeadLetter>, ScanlineError> {
        let conn = self.lock()?;
        records::query_index(&conn, &keys::dead_letter_digest(digest))
    }

    pub fn dead_letter_depth(&self, queue: QueueName) -> Result<usize, ScanlineError> {
        Ok(self.dead_letters(queue)?.len())
    }

    pub fn remove_dead_letter(&self, queue: QueueName, message_id: &str) -> Result<bool, ScanlineError> {
        let conn = self.lock()?;
        records::delete(&conn, &keys::dead_letter(queue.as_str()), message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::image::ImageRef;
    use crate::pipeline::state::Trigger;

    fn scanning_job(db: &Database, digest: &str) -> ScanJob {
        let image = ImageRef {
            registry: "registry.example.com".to_string(),
            repository: "app".to_string(),
            tag: None,
            digest: digest.to_string(),
        };
        let now = Utc::now();
        db.upsert_image(&image, now, None).unwrap();
        let job = ScanJob::new(&image, Trigger::RegistryPush, now);
        db.create_job(&job).unwrap();
        db.transition_job(digest, &job.job_id, JobState::Pending, JobState::Scanning, now, None).unwrap()
    }

    fn letter(job: &ScanJob, message_id: &str) -> DeadLetter {
        DeadLetter {
            message_id: message_id.to_string(),
            queue: QueueName::Scan,
            job_id: job.job_id.clone(),
            digest: job.digest.clone(),
            payload: serde_json::json!({"job_id": job.job_id}),
            delivery_count: 3,
            last_error: Some("timeout".to_string()),
            dead_lettered_at: Utc::now(),
        }
    }

    #[test]
    fn test_db_dead_letter_job() {
        let db = Database::in_memory().unwrap();
        let job = scanning_job(&db, "sha256:d2");
        let now = Utc::now();
        let dead = db.dead_letter_job(&letter(&job, "m-1"), JobState::Scanning, now, Expiry::job_only(Some(now))).unwrap();

        assert_eq!(dead.state, JobState::DeadLettered);
        assert_eq!(dead.expires_at, Some(now));
        assert_eq!(db.dead_letter_depth(QueueName::Scan).unwrap(), 1);
        assert_eq!(db.dead_letter_depth(QueueName::Inspect).unwrap(), 0);
        assert_eq!(db.dead_letters_for_digest("sha256:d2").unwrap().len(), 1);
    }

    #[test]
    fn test_db_dead_letter_rolled_back_when_transition_fails() {
        let db = Database::in_memory().unwrap();
        let job = scanning_job(&db, "sha256:d2");
        let now = Utc::now();
        db.dead_letter_job(&letter(&job, "m-1"), JobState::Scanning, now, Expiry::default()).unwrap();

        // second attempt for a different message: job is already terminal
        let err = db.dead_letter_job(&letter(&job, "m-2"), JobState::Scanning, now, Expiry::default()).unwrap_err();
        assert!(matches!(err, ScanlineError::WriteConflict(_)));
        assert_eq!(db.dead_letter_depth(QueueName::Scan).unwrap(), 1);
    }

    #[test]
    fn test_db_remove_dead_letter() {
        let db = Database::in_memory().unwrap();
        let job = scanning_job(&db, "sha256:d2");
        db.dead_letter_job(&letter(&job, "m-1"), JobState::Scanning, Utc::now(), Expiry::default()).unwrap();

        assert!(db.remove_dead_letter(QueueName::Scan, "m-1").unwrap());
        assert!(!db.remove_dead_letter(QueueName::Scan, "m-1").unwrap());
        assert!(db.dead_letters(QueueName::Scan).unwrap().is_empty());
    }
}
