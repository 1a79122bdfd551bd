use chrono::{DateTime, Utc};
use rusqlite::Connection;
use crate::errors::ScanlineError;
use crate::models::job::ScanJob;
use crate::pipeline::state::JobState;
use super::images::{load_image, put_image};
use super::records::{self, SecondaryKey};
use super::retention::Expiry;
use super::schema::keys;
use super::Database;

pub(crate) fn put_job(conn: &Connection, job: &ScanJob) -> Result<(), ScanlineError> {
    records::put(
        conn,
        &keys::job(&job.digest),
        &job.job_id,
        Some(SecondaryKey {
            pk2: keys::job_status(job.state.as_str()),
            sk2: keys::job_status_sort(job.updated_at, &job.job_id),
        }),
        job,
        job.expires_at,
    )
}

pub(crate) fn load_job(conn: &Connection, digest: &str, job_id: &str) -> Result<ScanJob, ScanlineError> {
    records::get(conn, &keys::job(digest), job_id)?
        .ok_or_else(|| ScanlineError::NotFound(format!("job {} for {}", job_id, digest)))
}

/// Mirror a job state onto its image. The image only carries a deadline
/// while none of its jobs is open.
fn mark_image(conn: &Connection, digest: &str, state: JobState, now: DateTime<Utc>, image_expires_at: Option<DateTime<Utc>>) -> Result<(), ScanlineError> {
    if let Some(mut image) = load_image(conn, digest)? {
        image.scan_status = Some(state);
        image.updated_at = now;
        if !state.is_terminal() {
            image.expires_at = None;
        } else if image_expires_at.is_some() {
            image.expires_at = image_expires_at;
        }
        put_image(conn, &image)?;
    }
    Ok(())
}

/// Move a job from `from` to `next` and mirror the state onto its image.
/// Fails with `WriteConflict` when the stored state is no longer `from`.
pub(crate) fn transition(
    conn: &Connection,
    digest: &str,
    job_id: &str,
    from: JobState,
    next: JobState,
    now: DateTime<Utc>,
    expiry: Expiry,
) -> Result<ScanJob, ScanlineError> {
    let mut job = load_job(conn, digest, job_id)?;
    if job.state != from {
        return Err(ScanlineError::WriteConflict(format!(
            "job {} is {}, expected {}", job_id, job.state, from
        )));
    }
    from.check_transition(next)?;

    job.state = next;
    job.updated_at = now;
    if next.is_terminal() {
        job.expires_at = expiry.job;
    } else {
        // the redrive budget is per stage
        job.retry_count = 0;
    }
    put_job(conn, &job)?;
    mark_image(conn, digest, next, now, expiry.image)?;
    Ok(job)
}

impl Database {
    /// Insert a new `Pending` job and mark its image as pending.
    pub fn create_job(&self, job: &ScanJob) -> Result<(), ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        put_job(&tx, job)?;
        mark_image(&tx, &job.digest, job.state, job.updated_at, None)?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit job: {}", e)))?;
        Ok(())
    }

    /// Insert `candidate` unless the digest already has a non-terminal job.
    /// Returns the open job and whether it was just created. Check and insert
    /// happen in one transaction.
    pub fn open_or_create_job(&self, candidate: &ScanJob) -> Result<(ScanJob, bool), ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;

        let jobs: Vec<ScanJob> = records::query_partition(&tx, &keys::job(&candidate.digest))?;
        if let Some(open) = jobs.into_iter().find(|job| !job.state.is_terminal()) {
            return Ok((open, false));
        }

        put_job(&tx, candidate)?;
        mark_image(&tx, &candidate.digest, candidate.state, candidate.updated_at, None)?;

        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit job: {}", e)))?;
        Ok((candidate.clone(), true))
    }

    pub fn get_job(&self, digest: &str, job_id: &str) -> Result<Option<ScanJob>, ScanlineError> {
        let conn = self.lock()?;
        records::get(&conn, &keys::job(digest), job_id)
    }

    /// Every job ever recorded for a digest, newest first.
    pub fn jobs_for_digest(&self, digest: &str) -> Result<Vec<ScanJob>, ScanlineError> {
        let conn = self.lock()?;
        let mut jobs: Vec<ScanJob> = records::query_partition(&conn, &keys::job(digest))?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    /// The non-terminal job for a digest, if any.
    pub fn open_job(&self, digest: &str) -> Result<Option<ScanJob>, ScanlineError> {
        Ok(self.jobs_for_digest(digest)?
            .into_iter()
            .find(|job| !job.state.is_terminal()))
    }

    /// Jobs in one state, oldest update first, via the secondary index.
    pub fn jobs_by_state(&self, state: JobState) -> Result<Vec<ScanJob>, ScanlineError> {
        let conn = self.lock()?;
        records::query_index(&conn, &keys::job_status(state.as_str()))
    }

    pub fn job_state_counts(&self) -> Result<Vec<(JobState, usize)>, ScanlineError> {
        let conn = self.lock()?;
        let counts = records::count_index_prefix(&conn, "job_status:")?;
        Ok(counts
            .into_iter()
            .filter_map(|(state, count)| JobState::parse(&state).map(|s| (s, count)))
            .collect())
    }

    pub fn transition_job(
        &self,
        digest: &str,
        job_id: &str,
        from: JobState,
        next: JobState,
        now: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ScanJob, ScanlineError> {
        self.close_job(digest, job_id, from, next, now, Expiry::job_only(expires_at))
    }

    /// Like `transition_job`, also stamping the image deadline when `next`
    /// is terminal.
    pub fn close_job(
        &self,
        digest: &str,
        job_id: &str,
        from: JobState,
        next: JobState,
        now: DateTime<Utc>,
        expiry: Expiry,
    ) -> Result<ScanJob, ScanlineError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()
            .map_err(|e| ScanlineError::Database(format!("Failed to begin transaction: {}", e)))?;
        let job = transition(&tx, digest, job_id, from, next, now, expiry)?;
        tx.commit()
            .map_err(|e| ScanlineError::Database(format!("Failed to commit transition: {}", e)))?;
        Ok(job)
    }

    /// Count one failed delivery against the job's redrive budget.
    pub fn record_job_failure(
        &self,
        digest: &str,
        job_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<ScanJob, ScanlineError> {
        let conn = self.lock()?;
        let mut job = load_job(&conn, digest, job_id)?;
        job.retry_count += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        put_job(&conn, &job)?;
        Ok(job)
    }

    pub fn set_job_published(&self, digest: &str, job_id: &str, published: bool) -> Result<(), ScanlineError> {
        let conn = self.lock()?;
        let mut job = load_job(&conn, digest, job_id)?;
        job.published = published;
        put_job(&conn, &job)
    }

    /// `Pending` jobs whose scan request never reached the scan queue.
    pub fn unpublished_jobs(&self) -> Result<Vec<ScanJob>, ScanlineError> {
        Ok(self.jobs_by_state(JobState::Pending)?
            .into_iter()
            .filter(|job| !job.published)
            .collect())
    }
}
