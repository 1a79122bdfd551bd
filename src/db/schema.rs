/// Single table holding every record kind. `(pk, sk)` is the primary key,
/// `(pk2, sk2)` the secondary index. `expires_at` is unix seconds.
pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS records (
    pk TEXT NOT NULL,
    sk TEXT NOT NULL,
    pk2 TEXT,
    sk2 TEXT,
    doc TEXT NOT NULL,
    expires_at INTEGER,
    PRIMARY KEY (pk, sk)
);

CREATE INDEX IF NOT EXISTS idx_records_secondary ON records(pk2, sk2);
CREATE INDEX IF NOT EXISTS idx_records_expiry ON records(expires_at) WHERE expires_at IS NOT NULL;
";

pub mod keys {
    use chrono::{DateTime, SecondsFormat, Utc};

    pub const SEQUENCE_PK: &str = "meta:sequence";
    pub const SEQUENCE_SK: &str = "status";
    pub const IMAGE_SK: &str = "-";

    pub fn image(digest: &str) -> String {
        format!("image:{}", digest)
    }

    pub fn image_repository(repository_path: &str) -> String {
        format!("repo:{}", repository_path)
    }

    pub fn image_repository_sort(tag: Option<&str>, digest: &str) -> String {
        format!("{}@{}", tag.unwrap_or(""), digest)
    }

    pub fn job(digest: &str) -> String {
        format!("job:{}", digest)
    }

    pub fn job_status(state: &str) -> String {
        format!("job_status:{}", state)
    }

    pub fn job_status_sort(updated_at: DateTime<Utc>, job_id: &str) -> String {
        format!("{}/{}", updated_at.to_rfc3339_opts(SecondsFormat::Micros, true), job_id)
    }

    pub fn finding(digest: &str) -> String {
        format!("finding:{}", digest)
    }

    pub fn finding_status(status: &str) -> String {
        format!("finding_status:{}", status)
    }

    pub fn finding_status_sort(digest: &str, vuln_id: &str, package: &str) -> String {
        format!("{}|{}|{}", digest, vuln_id, package)
    }

    pub fn dead_letter(queue: &str) -> String {
        format!("dlq:{}", queue)
    }

    pub fn dead_letter_digest(digest: &str) -> String {
        format!("dlq_digest:{}", digest)
    }

    pub fn dead_letter_digest_sort(queue: &str, message_id: &str) -> String {
        format!("{}/{}", queue, message_id)
    }

    pub fn exposure(digest: &str) -> String {
        format!("exposure:{}", digest)
    }

    pub fn vuln(vuln_id: &str) -> String {
        format!("vuln:{}", vuln_id)
    }

    pub fn vuln_sort(digest: &str, package: &str) -> String {
        format!("{}|{}", digest, package)
    }

    pub fn report(digest: &str) -> String {
        format!("report:{}", digest)
    }

    pub fn report_repository(repository_path: &str) -> String {
        format!("report_repo:{}", repository_path)
    }

    /// Sorts reports oldest first within a partition.
    pub fn report_sort(inspected_at: DateTime<Utc>, report_id: &str) -> String {
        format!("{}/{}", inspected_at.to_rfc3339_opts(SecondsFormat::Micros, true), report_id)
    }
}
